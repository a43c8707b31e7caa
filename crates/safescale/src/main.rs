mod commands;
mod utils;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use safescale_core::host::DEFAULT_IMAGE;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "safescale")]
#[command(about = "Hosts and networks on any IaaS, one command line", long_about = None)]
struct Cli {
    /// Log debug messages on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage hosts
    #[command(subcommand)]
    Host(HostCommands),
    /// Manage networks
    #[command(subcommand)]
    Network(NetworkCommands),
    /// Manage the subnets of a network
    #[command(subcommand)]
    Subnet(SubnetCommands),
    /// Host templates offered by the provider
    #[command(subcommand)]
    Template(CatalogCommands),
    /// OS images offered by the provider
    #[command(subcommand)]
    Image(CatalogCommands),
    /// Show version information
    Version,
}

/// Minimal sizing of a host.
#[derive(Args, Debug, Clone, Default)]
pub struct SizingArgs {
    /// Number of CPU cores
    #[arg(long, default_value_t = 0)]
    pub cpu: u32,
    /// RAM in GB
    #[arg(long, default_value_t = 0.0)]
    pub ram: f32,
    /// System disk in GB
    #[arg(long, default_value_t = 0)]
    pub disk: u32,
    /// Number of GPUs
    #[arg(long, default_value_t = 0)]
    pub gpu: u32,
    /// CPU frequency in GHz
    #[arg(long, default_value_t = 0.0)]
    pub cpu_freq: f32,
}

#[derive(Subcommand)]
pub enum HostCommands {
    /// Create a host and wait until it is ready
    Create {
        name: String,
        /// Network to join (repeatable, the first one is the default)
        #[arg(short, long = "network")]
        networks: Vec<String>,
        /// Give the host a public IP
        #[arg(long)]
        public_ip: bool,
        #[command(flatten)]
        sizing: SizingArgs,
        /// Template to use instead of selecting one from the sizing
        #[arg(short, long)]
        template: Option<String>,
        /// OS image
        #[arg(long, default_value = DEFAULT_IMAGE)]
        os: String,
        /// Ignore GPU and CPU frequency when selecting the template
        #[arg(short, long)]
        force: bool,
        /// Leave the host in place when creation fails
        #[arg(long)]
        keep_on_failure: bool,
    },
    /// List hosts
    List {
        /// Every host of the provider, not only the recorded ones
        #[arg(short, long)]
        all: bool,
    },
    /// Show a host
    Inspect { host: String },
    /// Delete hosts
    Delete {
        #[arg(required = true)]
        hosts: Vec<String>,
    },
    /// Start a host
    Start { host: String },
    /// Stop a host
    Stop { host: String },
    /// Reboot a host
    Reboot { host: String },
    /// Change the sizing of a host
    Resize {
        host: String,
        #[command(flatten)]
        sizing: SizingArgs,
    },
    /// Show how to reach a host over SSH
    Ssh { host: String },
}

#[derive(Subcommand)]
pub enum NetworkCommands {
    /// Create a network with its default subnet and gateway
    Create {
        name: String,
        /// Private IPv4 range of the network
        #[arg(long, default_value = "192.168.0.0/24")]
        cidr: String,
        /// DNS server (repeatable)
        #[arg(long = "dns")]
        dns_servers: Vec<String>,
        /// Do not create the subnet named like the network
        #[arg(long)]
        no_default_subnet: bool,
        #[command(flatten)]
        gateway: GatewayArgs,
        /// Leave what was built in place when creation fails
        #[arg(long)]
        keep_on_failure: bool,
    },
    /// Delete a network, with its default subnet
    Delete { network: String },
    /// Show a network
    Inspect { network: String },
    /// List networks
    List {
        /// Every network of the provider, not only the recorded ones
        #[arg(short, long)]
        all: bool,
    },
}

#[derive(Subcommand)]
pub enum SubnetCommands {
    /// Create a subnet with its gateways
    Create {
        network: String,
        name: String,
        /// IPv4 range, inside the network's
        #[arg(long)]
        cidr: String,
        #[command(flatten)]
        gateway: GatewayArgs,
        /// Leave what was built in place when creation fails
        #[arg(long)]
        keep_on_failure: bool,
    },
    /// Delete a subnet and its gateways
    Delete { network: String, subnet: String },
    /// Show a subnet
    Inspect { network: String, subnet: String },
    /// List the subnets of a network
    List { network: String },
}

/// How gateways are built.
#[derive(Args, Debug, Clone)]
pub struct GatewayArgs {
    /// OS image of the gateways
    #[arg(long = "gw-os", default_value = DEFAULT_IMAGE)]
    pub os: String,
    /// Minimal CPU cores of the gateways
    #[arg(long = "gw-cpu", default_value_t = 0)]
    pub cpu: u32,
    /// Minimal RAM of the gateways, in GB
    #[arg(long = "gw-ram", default_value_t = 0.0)]
    pub ram: f32,
    /// Two gateways sharing a virtual IP
    #[arg(long)]
    pub ha: bool,
}

#[derive(Subcommand)]
pub enum CatalogCommands {
    /// List the entries
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    utils::init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::from(utils::exit_code(&e))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Version needs no tenant
    if matches!(cli.command, Commands::Version) {
        println!("safescale {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let tenant = safescale_config::load()?;
    tracing::debug!("using tenant '{}'", tenant.name);
    let service = utils::connect(&tenant).await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", "Interrupted, cleaning up...".yellow());
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Host(command) => commands::host::handle(&service, command, &cancel).await,
        Commands::Network(command) => {
            commands::network::handle(&service, command, &cancel).await
        }
        Commands::Subnet(command) => commands::subnet::handle(&service, command, &cancel).await,
        Commands::Template(CatalogCommands::List) => commands::catalog::templates(&service).await,
        Commands::Image(CatalogCommands::List) => commands::catalog::images(&service).await,
        Commands::Version => unreachable!("Version is handled before loading the tenant"),
    }
}
