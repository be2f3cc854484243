use anyhow::{Context, Result};
use credmgr::{Credential, CredentialManager, CredentialManagerConfig};
use time::format_description::well_known::Rfc3339;

pub mod acquire;
pub mod check;
pub mod import;
pub mod list;
pub mod refresh;
pub mod revoke;

/// Build the manager and load the persisted credentials. Every command but
/// `check` needs persistence: the CLI keeps no other state between runs.
async fn open_manager(config: &CredentialManagerConfig) -> Result<CredentialManager> {
    if config.persistence.is_none() {
        anyhow::bail!("credentials.persistence must be configured for this command");
    }
    let manager =
        CredentialManager::from_config(config).context("invalid credentials configuration")?;
    manager
        .load()
        .await
        .context("failed to load persisted credentials")?;
    Ok(manager)
}

/// Persist the store unless the manager already saves after every change.
/// Needed after a refresh: the endpoint may have rotated a single-use refresh
/// token.
async fn save_unless_auto_saved(
    manager: &CredentialManager,
    config: &CredentialManagerConfig,
) -> Result<()> {
    if !config.persistence.as_ref().is_some_and(|p| p.auto_save) {
        manager
            .save()
            .await
            .context("failed to save credentials")?;
    }
    Ok(())
}

fn format_expiry(credential: &Credential) -> String {
    match credential.expires_at() {
        None => "never".to_owned(),
        Some(at) => at.format(&Rfc3339).unwrap_or_else(|_| at.to_string()),
    }
}

fn print_credential(manager: &CredentialManager, credential: &Credential, show_token: bool) {
    println!("identity:   {}", credential.identity());
    if let Some(user_name) = credential.user_name() {
        println!("user name:  {user_name}");
    }
    println!("state:      {}", manager.state(credential.identity()));
    println!("expires at: {}", format_expiry(credential));
    if !credential.scopes().is_empty() {
        let scopes: Vec<&str> = credential.scopes().iter().map(String::as_str).collect();
        println!("scopes:     {}", scopes.join(" "));
    }
    if show_token {
        println!("token:      {}", credential.access_token().expose());
    }
}
