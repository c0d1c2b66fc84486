//! Outbound delivery of MFA codes.
//!
//! Real SMS/email transport lives outside the core; the orchestrator only
//! talks to this trait. Delivery is fire-and-forget with a bounded retry so
//! challenge issuance never blocks on a provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::models::FactorKind;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a one-time code to the given destination.
    async fn send_code(
        &self,
        kind: FactorKind,
        destination: &str,
        code: &str,
    ) -> anyhow::Result<()>;
}

/// Development notifier: records that a dispatch happened without ever
/// putting the code itself in the logs.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send_code(
        &self,
        kind: FactorKind,
        destination: &str,
        _code: &str,
    ) -> anyhow::Result<()> {
        tracing::info!(kind = %kind, destination = %mask(destination), "mfa code dispatched");
        Ok(())
    }
}

fn mask(destination: &str) -> String {
    let tail: String = destination
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{tail}")
}

const DELIVERY_ATTEMPTS: u32 = 3;

/// Spawn a background delivery with bounded retry. Errors are logged, never
/// surfaced: the challenge record is already stored and issuance must not
/// block on delivery confirmation.
pub fn dispatch_code(
    notifier: Arc<dyn Notifier>,
    kind: FactorKind,
    destination: String,
    code: String,
) {
    tokio::spawn(async move {
        for attempt in 1..=DELIVERY_ATTEMPTS {
            match notifier.send_code(kind, &destination, &code).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(kind = %kind, attempt, error = %e, "mfa code delivery failed");
                    if attempt < DELIVERY_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
                    }
                }
            }
        }
    });
}
