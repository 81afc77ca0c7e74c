use std::{process::ExitCode, time::Duration};

use tracing_subscriber::EnvFilter;

use teamline_notify::{
    config,
    diagnostics,
    error::{SyncError, SyncResult},
    SyncAgent,
};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "agent failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> SyncResult<()> {
    let config = config::read_config()?;

    let base_url = std::env::var("TEAMLINE_URL")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| config.base_url.clone());
    if base_url.trim().is_empty() {
        return Err(SyncError::Config(
            "no server URL configured; set TEAMLINE_URL or base_url in config.json".to_string(),
        ));
    }

    let token = std::env::var("TEAMLINE_TOKEN")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(Ok)
        .unwrap_or_else(|| {
            config::load_token(&config).map(|token| token.unwrap_or_default())
        })?;
    if token.trim().is_empty() {
        return Err(SyncError::Config(
            "no session token found; set TEAMLINE_TOKEN or store one in the keychain".to_string(),
        ));
    }

    let agent = SyncAgent::login(&base_url, &token).await?;
    tracing::info!(unread = agent.mirror.unread(), "session started");

    let mut updates = agent.mirror.subscribe();
    let mut diag_interval = tokio::time::interval(Duration::from_secs(60));
    diag_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    diag_interval.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let (unread, mirrored) = {
                    let snapshot = updates.borrow();
                    (snapshot.unread, snapshot.notifications.len())
                };
                tracing::info!(unread, mirrored, "mirror updated");
            }
            _ = diag_interval.tick() => {
                let diag = diagnostics::snapshot(&agent.connection, &agent.mirror);
                tracing::debug!(?diag, "runtime diagnostics");
            }
        }
    }

    tracing::info!("shutting down");
    agent.logout();
    Ok(())
}
