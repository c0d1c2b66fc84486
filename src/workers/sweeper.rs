//! Background lifecycle worker.
//!
//! Periodically reclaims expired codes, tokens, and challenges, and rotates
//! the signing key when its period is up. Only records whose lifetime has
//! ended are ever touched. The worker is cancellable: flip the shutdown
//! channel and await the handle to drain it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::interval;

use crate::services::keys::KeyManager;
use crate::store::Store;

pub struct Sweeper {
    store: Arc<dyn Store>,
    keys: Arc<KeyManager>,
    interval_secs: u64,
    shutdown: watch::Receiver<bool>,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn Store>,
        keys: Arc<KeyManager>,
        interval_secs: u64,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            keys,
            interval_secs,
            shutdown,
        }
    }

    /// Run until the shutdown channel flips.
    pub async fn run(mut self) {
        tracing::info!(
            interval_secs = self.interval_secs,
            "expiry sweeper started"
        );
        let mut ticker = interval(Duration::from_secs(self.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "sweep pass failed");
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("expiry sweeper stopped");
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let stats = self.store.sweep_expired(Utc::now()).await?;
        if stats.total() > 0 {
            tracing::debug!(
                codes = stats.codes,
                access_tokens = stats.access_tokens,
                refresh_tokens = stats.refresh_tokens,
                challenges = stats.challenges,
                "expired records reclaimed"
            );
        }

        if let Some(kid) = self.keys.rotate_if_due()? {
            for key in self.keys.stored_keys()? {
                self.store.put_signing_key(key).await?;
            }
            tracing::info!(%kid, "signing key rotated");
        }
        Ok(())
    }
}

/// Spawn the sweeper as a background task. Send `true` on the shutdown
/// channel and await the handle to stop it cleanly.
pub fn spawn_sweeper(
    store: Arc<dyn Store>,
    keys: Arc<KeyManager>,
    interval_secs: u64,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        Sweeper::new(store, keys, interval_secs, shutdown).run().await;
    })
}
