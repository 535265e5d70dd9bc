use anyhow::Result;

use agentfleet::pool::{Credential, CredentialPool};

use super::Context;

fn pool(ctx: &Context) -> CredentialPool {
    CredentialPool::new(ctx.store.clone(), ctx.keys.clone(), ctx.config.pool.clone())
}

pub async fn add_credential(ctx: &Context, id: String, platform: String, secret: String) -> Result<()> {
    let credential = Credential::new(id, platform, secret);
    pool(ctx).add_credential(&credential).await?;
    println!(
        "Registered credential {} for platform {}",
        credential.id, credential.platform
    );
    Ok(())
}

pub async fn list_credentials(ctx: &Context, platform: &str) -> Result<()> {
    let credentials = pool(ctx).list_credentials(platform).await?;
    if credentials.is_empty() {
        println!("No credentials registered for {platform}");
        return Ok(());
    }

    let limits = ctx.config.pool.limits_for(platform);
    println!(
        "{platform}: {} credentials (daily limit {}, min interval {}s, max failures {})",
        credentials.len(),
        limits.daily_limit,
        limits.min_interval_secs,
        limits.max_fail_count
    );
    println!(
        "{:<24} {:<8} {:>6} {:>10}  {}",
        "ID", "ACTIVE", "FAILS", "USED/DAY", "COOLDOWN UNTIL"
    );
    for credential in credentials {
        println!(
            "{:<24} {:<8} {:>6} {:>10}  {}",
            credential.id,
            if credential.is_active { "yes" } else { "no" },
            credential.fail_count,
            credential.use_count_today,
            credential
                .cooldown_until
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}

pub async fn reactivate_credential(ctx: &Context, id: &str) -> Result<()> {
    let credential = pool(ctx).reactivate(id).await?;
    println!(
        "Credential {} ({}) is active again",
        credential.id, credential.platform
    );
    Ok(())
}
