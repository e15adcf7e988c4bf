use std::env;
use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cores_reconciler::cli::{self, Cli, Commands, DbCommands, TxCommands};
use cores_reconciler::config::{Config, LogFormat};
use cores_reconciler::create_app;
use cores_reconciler::secrets::VaultSettings;
use cores_reconciler::startup::Services;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Tx(TxCommands::Complete { tx_id }) => {
            let services = Services::build(&config).await?;
            cli::handle_tx_complete(&services.reconciler, tx_id).await
        }
        Commands::Tx(TxCommands::Show { tx_id }) => {
            let services = Services::build(&config).await?;
            cli::handle_tx_show(services.repository.as_ref(), tx_id).await
        }
        Commands::Config => cli::handle_config_validate(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve(config: Config) -> Result<()> {
    let vault = VaultSettings::from_source(|key| env::var(key).ok())?;

    let services = Services::build(&config).await?;
    cores_reconciler::db::run_migrations(&services.pool).await?;

    let state = services.into_app_state(&config, vault.as_ref()).await?;
    let app = create_app(
        state,
        config.webhook_allowed_ips.clone(),
        config.trusted_proxy_depth,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
