use anyhow::Result;
use clap::Args;
use credmgr::CredentialManagerConfig;

/// Forget a credential and revoke it at the authorization server.
#[derive(Args)]
pub struct RevokeArgs {
    identity: String,
}

impl RevokeArgs {
    pub async fn run(&self, config: &CredentialManagerConfig) -> Result<()> {
        let manager = super::open_manager(config).await?;
        if !manager.revoke(&self.identity).await {
            anyhow::bail!("no credential stored for '{}'", self.identity);
        }
        super::save_unless_auto_saved(&manager, config).await?;
        println!("revoked {}", self.identity);
        Ok(())
    }
}
