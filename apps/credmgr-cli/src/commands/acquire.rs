use anyhow::{Context, Result};
use clap::Args;
use credmgr::CredentialManagerConfig;

/// Print a valid credential, refreshing it first if needed.
#[derive(Args)]
pub struct AcquireArgs {
    identity: String,

    /// Also print the access token
    #[arg(long)]
    show_token: bool,
}

impl AcquireArgs {
    pub async fn run(&self, config: &CredentialManagerConfig) -> Result<()> {
        let manager = super::open_manager(config).await?;
        let before = manager.peek(&self.identity);
        let credential = manager
            .acquire(&self.identity)
            .await
            .with_context(|| format!("failed to acquire credential for '{}'", self.identity))?;
        let refreshed = before.is_none_or(|before| {
            before.access_token().expose() != credential.access_token().expose()
        });
        if refreshed {
            super::save_unless_auto_saved(&manager, config).await?;
        }
        super::print_credential(&manager, &credential, self.show_token);
        Ok(())
    }
}
