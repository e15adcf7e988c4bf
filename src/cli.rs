use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::{AllowedIps, Config};
use crate::ports::TransactionRepository;
use crate::services::{ReconcileOutcome, Reconciler};

#[derive(Parser, Debug)]
#[command(name = "cores-reconciler")]
#[command(about = "Reconciles payment provider webhooks into cores ledger transfers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Transaction management commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand, Debug)]
pub enum TxCommands {
    /// Mark a transaction successful and credit it on the ledger
    Complete {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },

    /// Print a stored transaction as JSON
    Show {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },
}

#[derive(Subcommand, Debug)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_tx_complete(reconciler: &Reconciler, tx_id: Uuid) -> Result<()> {
    let outcome = reconciler
        .complete_manually(tx_id)
        .await
        .with_context(|| format!("failed to complete transaction {tx_id}"))?;

    match outcome {
        ReconcileOutcome::Skipped { transaction, .. } => {
            println!("Transaction {} was already successful", transaction.id);
        }
        other => {
            let tx = other.transaction();
            tracing::info!(transaction_id = %tx.id, value = tx.value, "transaction completed manually");
            println!("✓ Transaction {} completed, {} cores credited", tx.id, tx.value);
        }
    }
    Ok(())
}

pub async fn handle_tx_show(repository: &dyn TransactionRepository, tx_id: Uuid) -> Result<()> {
    let tx = repository
        .get_by_id(tx_id)
        .await
        .with_context(|| format!("failed to load transaction {tx_id}"))?;
    println!("{}", serde_json::to_string_pretty(&tx)?);
    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> Result<()> {
    let pool = crate::db::create_pool(config).await?;
    crate::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> Result<()> {
    println!("Configuration:");
    println!("  Server Port:          {}", config.server_port);
    println!("  Database URL:         {}", mask_password(&config.database_url));
    println!(
        "  Redis URL:            {}",
        config
            .redis_url
            .as_deref()
            .map(mask_password)
            .unwrap_or_else(|| "(in-process cache)".to_string())
    );
    println!("  Ledger URL:           {}", config.ledger_url);
    println!(
        "  Webhook Secret:       {}",
        if config.webhook_secret.is_some() { "set" } else { "from Vault" }
    );
    println!(
        "  Webhook Max Age:      {}",
        config
            .webhook_max_age
            .map(|age| format!("{}s", age.as_secs()))
            .unwrap_or_else(|| "unchecked".to_string())
    );
    println!(
        "  Webhook Sources:      {}",
        match &config.webhook_allowed_ips {
            AllowedIps::Any => "*".to_string(),
            AllowedIps::Cidrs(nets) => nets
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        }
    );
    println!(
        "  Ledger Breaker:       failure rate {} over {}s, cooldown {}s",
        config.ledger_breaker.failure_rate,
        config.ledger_breaker.window.as_secs(),
        config.ledger_breaker.cooldown.as_secs()
    );
    println!("  Balance Cache TTL:    {}s", config.balance_cache_ttl.as_secs());

    println!("✓ Configuration is valid");
    Ok(())
}

fn mask_password(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            // Only fails for URLs that cannot carry credentials.
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}
