use anyhow::{Context, Result};
use clap::Args;
use credmgr::CredentialManagerConfig;

/// Refresh a credential now, even if it is still valid.
#[derive(Args)]
pub struct RefreshArgs {
    identity: String,

    /// Also print the new access token
    #[arg(long)]
    show_token: bool,
}

impl RefreshArgs {
    pub async fn run(&self, config: &CredentialManagerConfig) -> Result<()> {
        let manager = super::open_manager(config).await?;
        let credential = manager
            .force_refresh(&self.identity)
            .await
            .with_context(|| format!("failed to refresh credential for '{}'", self.identity))?;
        super::save_unless_auto_saved(&manager, config).await?;
        super::print_credential(&manager, &credential, self.show_token);
        Ok(())
    }
}
