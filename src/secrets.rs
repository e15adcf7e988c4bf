use std::collections::HashMap;

use anyhow::{Context, Result};
use vaultrs::auth::approle;
use vaultrs::client::{Client, VaultClient, VaultClientSettingsBuilder};
use vaultrs::kv2;

use crate::config::Config;
use crate::domain::Processor;

/// AppRole credentials for Vault, present only when `VAULT_ADDR` is set.
#[derive(Debug, Clone)]
pub struct VaultSettings {
    pub addr: String,
    pub role_id: String,
    pub secret_id: String,
    pub auth_mount: String,
    pub kv_mount: String,
}

impl VaultSettings {
    pub fn from_source<F>(get: F) -> Result<Option<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(addr) = get("VAULT_ADDR") else {
            return Ok(None);
        };

        Ok(Some(Self {
            addr,
            role_id: get("VAULT_ROLE_ID").context("VAULT_ROLE_ID is required with VAULT_ADDR")?,
            secret_id: get("VAULT_SECRET_ID")
                .context("VAULT_SECRET_ID is required with VAULT_ADDR")?,
            auth_mount: get("VAULT_AUTH_MOUNT").unwrap_or_else(|| "approle".to_string()),
            kv_mount: get("VAULT_KV_MOUNT").unwrap_or_else(|| "secret".to_string()),
        }))
    }
}

pub struct SecretsManager {
    client: VaultClient,
    kv_mount: String,
}

impl SecretsManager {
    pub async fn connect(settings: &VaultSettings) -> Result<Self> {
        let mut client = VaultClient::new(
            VaultClientSettingsBuilder::default()
                .address(&settings.addr)
                .build()
                .context("failed to build Vault client settings")?,
        )
        .context("failed to create Vault client")?;

        let auth = approle::login(
            &client,
            &settings.auth_mount,
            &settings.role_id,
            &settings.secret_id,
        )
        .await
        .context("failed to authenticate to Vault with AppRole")?;
        client.set_token(&auth.client_token);

        Ok(Self {
            client,
            kv_mount: settings.kv_mount.clone(),
        })
    }

    /// Reads `webhooks/<processor>` and returns its `secret` key.
    pub async fn webhook_secret(&self, processor: Processor) -> Result<String> {
        let path = secret_path(processor);
        let secret: HashMap<String, String> = kv2::read(&self.client, &self.kv_mount, &path)
            .await
            .with_context(|| format!("failed to read {path} from Vault"))?;

        secret
            .get("secret")
            .cloned()
            .with_context(|| format!("secret key not found in Vault {path}"))
    }
}

fn secret_path(processor: Processor) -> String {
    format!("webhooks/{}", processor.as_str())
}

/// The configured secret wins; Vault is consulted only when it is absent.
pub async fn resolve_webhook_secret(config: &Config, vault: Option<&VaultSettings>) -> Result<String> {
    if let Some(secret) = &config.webhook_secret {
        return Ok(secret.clone());
    }

    let settings = vault.context("PADDLE_WEBHOOK_SECRET must be set when Vault is not configured")?;
    let manager = SecretsManager::connect(settings).await?;
    let secret = manager.webhook_secret(Processor::Paddle).await?;
    tracing::info!(vault = %settings.addr, "webhook secret loaded from Vault");
    Ok(secret)
}
