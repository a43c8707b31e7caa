use crate::HostCommands;
use crate::utils::print_json;
use colored::Colorize;
use safescale_core::{HostCreateRequest, Service};
use safescale_iaas::Host;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn handle(
    service: &Arc<Service>,
    command: HostCommands,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let hosts = service.hosts();
    match command {
        HostCommands::Create {
            name,
            networks,
            public_ip,
            sizing,
            template,
            os,
            force,
            keep_on_failure,
        } => {
            println!("{}", format!("Creating host '{}'...", name).yellow());
            let request = HostCreateRequest {
                networks,
                public_ip,
                sizing: (&sizing).into(),
                template,
                image: os,
                force,
                keep_on_failure,
                ..HostCreateRequest::new(name)
            };
            let host = hosts.create(&request, cancel).await?;
            println!(
                "{}",
                format!("✓ host '{}' created ({})", host.name, host.id)
                    .green()
                    .bold()
            );
        }
        HostCommands::List { all } => {
            let listed = hosts.list(all, cancel).await?;
            let listed: Vec<&Host> = listed.iter().map(Arc::as_ref).collect();
            print_json(&listed)?;
        }
        HostCommands::Inspect { host } => {
            let host = hosts.inspect(&host, cancel).await?;
            print_json(host.as_ref())?;
        }
        HostCommands::Delete { hosts: names } => {
            for name in names {
                hosts.delete(&name, cancel).await?;
                println!("{}", format!("✓ host '{}' deleted", name).green().bold());
            }
        }
        HostCommands::Start { host } => {
            hosts.start(&host, cancel).await?;
            println!("{}", format!("✓ host '{}' started", host).green().bold());
        }
        HostCommands::Stop { host } => {
            hosts.stop(&host, cancel).await?;
            println!("{}", format!("✓ host '{}' stopped", host).green().bold());
        }
        HostCommands::Reboot { host } => {
            hosts.reboot(&host, cancel).await?;
            println!("{}", format!("✓ host '{}' rebooted", host).green().bold());
        }
        HostCommands::Resize { host, sizing } => {
            let resized = hosts.resize(&host, (&sizing).into(), cancel).await?;
            let effective = resized.properties.sizing.snapshot().effective;
            println!(
                "{}",
                format!(
                    "✓ host '{}' resized to {} cores, {} GB RAM",
                    resized.name, effective.cores, effective.ram_size
                )
                .green()
                .bold()
            );
        }
        HostCommands::Ssh { host } => {
            let config = hosts.ssh_config(&host, cancel).await?;
            print_json(&config)?;
        }
    }
    Ok(())
}
