use crate::{GatewayArgs, SizingArgs};
use safescale_config::{ConfigError, ProbeKind, TenantConfig};
use safescale_core::{GatewayOptions, Immediate, ReadinessProbe, Service, TcpProbe};
use safescale_iaas::{LocalFolder, SizingRequirements};
use safescale_stack_sandbox::SandboxStack;
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr so that JSON output stays parseable.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Builds the service of a tenant: its provider stack, its metadata folder
/// and its readiness probe.
pub async fn connect(tenant: &TenantConfig) -> anyhow::Result<Arc<Service>> {
    let state_file = tenant.state_file()?;
    let stack = SandboxStack::open(&state_file)
        .await
        .map_err(safescale_iaas::Error::from)?;

    let metadata_root = tenant.metadata_root()?;
    tracing::debug!(
        "tenant '{}': stack state {}, metadata in {}",
        tenant.name,
        state_file.display(),
        metadata_root.display()
    );
    let folder = LocalFolder::new(metadata_root);

    let probe: Arc<dyn ReadinessProbe> = match tenant.probe() {
        ProbeKind::Tcp => Arc::new(TcpProbe::new(
            tenant.readiness.ssh_port,
            tenant.timeouts.ssh_connect(),
        )),
        ProbeKind::Immediate => Arc::new(Immediate),
    };

    let service = Service::new(Arc::new(stack), Arc::new(folder), tenant.timeouts.clone())
        .with_probe(probe);
    Ok(Arc::new(service))
}

/// Exit status for a failed command: 2 when the caller asked for something
/// wrong, 1 when the infrastructure failed.
pub fn exit_code(error: &anyhow::Error) -> u8 {
    for cause in error.chain() {
        if let Some(e) = cause.downcast_ref::<safescale_iaas::Error>() {
            return if e.kind().is_user_error() { 2 } else { 1 };
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return 2;
        }
    }
    1
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

impl From<&SizingArgs> for SizingRequirements {
    fn from(args: &SizingArgs) -> Self {
        SizingRequirements {
            min_cores: args.cpu,
            min_ram_size: args.ram,
            min_disk_size: args.disk,
            min_gpu: args.gpu,
            min_cpu_freq: args.cpu_freq,
        }
    }
}

impl From<&GatewayArgs> for GatewayOptions {
    fn from(args: &GatewayArgs) -> Self {
        GatewayOptions {
            sizing: SizingRequirements {
                min_cores: args.cpu,
                min_ram_size: args.ram,
                ..Default::default()
            },
            image: args.os.clone(),
            ha: args.ha,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_by_kind() {
        let user: anyhow::Error = safescale_iaas::Error::logic("network has 2 subnets").into();
        assert_eq!(exit_code(&user), 2);

        let infra: anyhow::Error = safescale_iaas::Error::infra("connection reset").into();
        assert_eq!(exit_code(&infra), 1);

        let config: anyhow::Error = ConfigError::Invalid("empty name".into()).into();
        assert_eq!(exit_code(&config), 2);

        assert_eq!(exit_code(&anyhow::anyhow!("something else")), 1);
    }

    #[test]
    fn test_exit_code_through_context() {
        let error = anyhow::Error::from(safescale_iaas::Error::not_found("host", "web"))
            .context("inspecting host");
        assert_eq!(exit_code(&error), 2);
    }

    #[test]
    fn test_gateway_options_from_args() {
        let args = GatewayArgs {
            os: "Debian 12".into(),
            cpu: 2,
            ram: 4.0,
            ha: true,
        };
        let options = GatewayOptions::from(&args);
        assert_eq!(options.sizing.min_cores, 2);
        assert_eq!(options.image, "Debian 12");
        assert!(options.ha);
    }
}
