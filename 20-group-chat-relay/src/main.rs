use anyhow::Result;
use clap::Parser;
use tracing::info;

use group_chat_relay::{
    cli::{Cli, Command},
    config::RelayConfig,
    server::RelayServer,
    terminal,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            let server = RelayServer::bind(RelayConfig::from(&args)).await?;
            let addr = server.local_addr()?;
            info!("relay listening on {}", addr);
            server.run_until_ctrl_c().await;
        }
        Command::Client(args) => terminal::run(args).await?,
    }

    Ok(())
}
