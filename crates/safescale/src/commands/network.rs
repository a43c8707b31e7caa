use crate::NetworkCommands;
use crate::utils::print_json;
use colored::Colorize;
use safescale_core::{NetworkCreateRequest, Service};
use safescale_iaas::Network;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn handle(
    service: &Arc<Service>,
    command: NetworkCommands,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let networks = service.networks();
    match command {
        NetworkCommands::Create {
            name,
            cidr,
            dns_servers,
            no_default_subnet,
            gateway,
            keep_on_failure,
        } => {
            println!("{}", format!("Creating network '{}'...", name).yellow());
            let request = NetworkCreateRequest {
                name,
                cidr,
                dns_servers,
                no_default_subnet,
                gateway: (&gateway).into(),
                keep_on_failure,
            };
            let network = networks.create(&request, cancel).await?;
            println!(
                "{}",
                format!("✓ network '{}' created ({})", network.name, network.cidr)
                    .green()
                    .bold()
            );
        }
        NetworkCommands::Delete { network } => {
            networks.delete(&network, cancel).await?;
            println!("{}", format!("✓ network '{}' deleted", network).green().bold());
        }
        NetworkCommands::Inspect { network } => {
            let network = networks.inspect(&network, cancel).await?;
            print_json(network.as_ref())?;
        }
        NetworkCommands::List { all } => {
            let listed = networks.list(all, cancel).await?;
            let listed: Vec<&Network> = listed.iter().map(Arc::as_ref).collect();
            print_json(&listed)?;
        }
    }
    Ok(())
}
