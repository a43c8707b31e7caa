use crate::SubnetCommands;
use crate::utils::print_json;
use colored::Colorize;
use safescale_core::{Service, SubnetCreateRequest};
use safescale_iaas::Subnet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn handle(
    service: &Arc<Service>,
    command: SubnetCommands,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let networks = service.networks();
    match command {
        SubnetCommands::Create {
            network,
            name,
            cidr,
            gateway,
            keep_on_failure,
        } => {
            println!(
                "{}",
                format!("Creating subnet '{}' in network '{}'...", name, network).yellow()
            );
            let request = SubnetCreateRequest {
                name,
                cidr,
                gateway: (&gateway).into(),
                keep_on_failure,
            };
            let subnet = networks.create_subnet(&network, &request, cancel).await?;
            let gateways = subnet.gateways.snapshot().ids.len();
            println!(
                "{}",
                format!(
                    "✓ subnet '{}' created ({}, {} gateway(s))",
                    subnet.name, subnet.cidr, gateways
                )
                .green()
                .bold()
            );
        }
        SubnetCommands::Delete { network, subnet } => {
            networks.delete_subnet(&network, &subnet, cancel).await?;
            println!("{}", format!("✓ subnet '{}' deleted", subnet).green().bold());
        }
        SubnetCommands::Inspect { network, subnet } => {
            let subnet = networks.inspect_subnet(&network, &subnet, cancel).await?;
            print_json(subnet.as_ref())?;
        }
        SubnetCommands::List { network } => {
            let listed = networks.list_subnets(&network, cancel).await?;
            let listed: Vec<&Subnet> = listed.iter().map(Arc::as_ref).collect();
            print_json(&listed)?;
        }
    }
    Ok(())
}
