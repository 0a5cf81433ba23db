use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "andromeda")]
#[command(about = "Andromeda Messenger webhook", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the webhook server (GET /, GET /webhook, POST /webhook).
    Serve {
        /// Config file path (default: ANDROMEDA_CONFIG_PATH or ~/.andromeda/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from PORT env, config, or 3000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Print the resolved configuration (file + environment) with secrets masked.
    CheckConfig {
        /// Config file path (default: ANDROMEDA_CONFIG_PATH or ~/.andromeda/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("andromeda {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("serve failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::CheckConfig { config }) => {
            if let Err(e) = run_check_config(config) {
                log::error!("check-config failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = andromeda::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting webhook on {}:{} (config {})",
        config.gateway.bind,
        config.gateway.port,
        path.display()
    );
    andromeda::gateway::run_gateway(config).await
}

fn run_check_config(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = andromeda::config::load_config(config_path)?;
    let shown = andromeda::config::redacted(&config);
    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}
