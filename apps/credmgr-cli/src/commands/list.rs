use anyhow::Result;
use credmgr::CredentialManagerConfig;

/// List stored identities with their state and remaining validity.
pub async fn run(config: &CredentialManagerConfig) -> Result<()> {
    let manager = super::open_manager(config).await?;
    let identities = manager.identities();
    if identities.is_empty() {
        println!("no credentials stored");
        return Ok(());
    }

    for identity in identities {
        let Some(credential) = manager.peek(&identity) else {
            continue;
        };
        let remaining = match manager.remaining(&credential) {
            None => "no expiry".to_owned(),
            Some(left) => {
                humantime::format_duration(std::time::Duration::from_secs(left.as_secs())).to_string()
            }
        };
        println!(
            "{identity}\t{}\t{remaining}\t{}",
            manager.state(&identity),
            credential.user_name().unwrap_or("-")
        );
    }
    Ok(())
}
