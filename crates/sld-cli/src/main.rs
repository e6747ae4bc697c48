use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "sld")]
#[command(about = "StopLossDesk operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },

    /// Order commands (talk to a running sld-daemon)
    Orders {
        /// Daemon base URL. Falls back to SLD_DAEMON_URL, then http://127.0.0.1:8080.
        #[arg(long, global = true)]
        daemon: Option<String>,

        #[command(subcommand)]
        cmd: OrdersCmd,
    },

    /// Run the websocket price simulator
    Sim {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:8081")]
        addr: String,

        /// Milliseconds between price rounds
        #[arg(long, default_value_t = 1_000)]
        interval_ms: u64,

        /// Chance (0..=1) of dropping a random client on each disruption check
        #[arg(long, default_value_t = 0.0)]
        disruption_probability: f64,

        /// Milliseconds between disruption checks
        #[arg(long, default_value_t = 5_000)]
        disruption_every_ms: u64,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations. Guardrail: refuses when Pending orders exist unless --yes is provided.
    Migrate {
        /// Acknowledge you are migrating a DB with live orders.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Load layers, apply env overrides and print the hash plus the redacted typed config
    Show {
        /// Paths in merge order (base -> env -> local)
        paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum OrdersCmd {
    /// List orders
    List {
        /// Only Pending orders
        #[arg(long, default_value_t = false)]
        pending: bool,
    },

    /// Print one order
    Get {
        #[arg(long)]
        id: String,
    },

    /// Place a stop-loss order
    Place {
        #[arg(long)]
        security: String,

        #[arg(long)]
        trigger_price: f64,

        #[arg(long)]
        quantity: i64,
    },

    /// Cancel a Pending order
    Cancel {
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => match cmd {
            DbCmd::Status => commands::db::status().await?,
            DbCmd::Migrate { yes } => commands::db::migrate(yes).await?,
        },

        Commands::Config { cmd } => match cmd {
            ConfigCmd::Show { paths } => commands::config_show(&paths)?,
        },

        Commands::Orders { daemon, cmd } => {
            let client = commands::orders::DaemonClient::new(commands::orders::daemon_url(daemon))?;
            match cmd {
                OrdersCmd::List { pending } => commands::orders::list(&client, pending).await?,
                OrdersCmd::Get { id } => commands::orders::get(&client, &id).await?,
                OrdersCmd::Place {
                    security,
                    trigger_price,
                    quantity,
                } => commands::orders::place(&client, security, trigger_price, quantity).await?,
                OrdersCmd::Cancel { id } => commands::orders::cancel(&client, &id).await?,
            }
        }

        Commands::Sim {
            addr,
            interval_ms,
            disruption_probability,
            disruption_every_ms,
        } => {
            let cfg = commands::sim::SimConfig::new(
                interval_ms,
                disruption_probability,
                disruption_every_ms,
            )?;
            commands::sim::run(&addr, cfg).await?
        }
    }

    Ok(())
}
