use std::time::Duration;

use anyhow::Result;
use clap::Args;
use credmgr::{Credential, CredentialManagerConfig};
use time::OffsetDateTime;

/// Store a credential obtained elsewhere, e.g. from an authorization-code
/// login.
#[derive(Args)]
pub struct ImportArgs {
    identity: String,

    #[arg(long)]
    access_token: String,

    #[arg(long)]
    refresh_token: Option<String>,

    /// Remaining lifetime of the access token, e.g. `4h` or `3600s`
    #[arg(long, value_parser = humantime::parse_duration)]
    expires_in: Option<Duration>,

    /// Granted scope; repeat for several
    #[arg(long = "scope")]
    scopes: Vec<String>,

    /// Login name used with the chat password
    #[arg(long)]
    user_name: Option<String>,
}

impl ImportArgs {
    fn credential(&self, now: OffsetDateTime) -> Credential {
        let mut credential = Credential::new(self.identity.as_str(), self.access_token.as_str())
            .with_scopes(self.scopes.iter().map(String::as_str))
            .with_optional_user_name(self.user_name.clone());
        if let Some(refresh_token) = &self.refresh_token {
            credential = credential.with_refresh_token(refresh_token.as_str());
        }
        if let Some(lifetime) = self.expires_in {
            credential = credential.with_lifetime(now, lifetime);
        }
        credential
    }

    pub async fn run(&self, config: &CredentialManagerConfig) -> Result<()> {
        if self.access_token.is_empty() {
            anyhow::bail!("--access-token must not be empty");
        }
        let manager = super::open_manager(config).await?;
        manager
            .register(self.credential(OffsetDateTime::now_utc()))
            .await;
        super::save_unless_auto_saved(&manager, config).await?;
        println!("imported {}", self.identity);
        Ok(())
    }
}
