//! Write-through consumer of identity events.
//!
//! Whatever changed (groups, subscriptions, terms), the reaction is the
//! same: re-resolve the user's access from current state and persist the
//! bitmap. A lagged receiver misses events but never diverges, because
//! every event triggers a full re-resolution.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use gazette_core::access::resolve;
use gazette_core::{BitmapRepository, EventBus, IdentityEvent, Result, UserRepository};
use gazette_db::Database;

pub struct BitmapListener {
    db: Arc<Database>,
}

impl BitmapListener {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Recompute and persist one user's bitmap.
    pub async fn apply(&self, event: &IdentityEvent) -> Result<u64> {
        let user_id = event.user_id();
        let profile = self.db.users.access_profile(user_id).await?;
        let (mask, plan) = resolve(&profile);
        self.db.bitmaps.store(user_id, &mask).await?;
        tracing::info!(
            subsystem = "identity",
            user_id = %user_id,
            event_type = event.event_type(),
            plan = %plan,
            "Materialized user bitmap"
        );
        Ok(mask.as_u64())
    }

    /// Subscribe to the bus and process events until it closes.
    pub fn spawn(self, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(e) = self.apply(&event).await {
                            tracing::error!(
                                subsystem = "identity",
                                user_id = %event.user_id(),
                                error = %e,
                                "Failed to materialize bitmap"
                            );
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(
                            subsystem = "identity",
                            missed,
                            "Bitmap listener lagged; skipped events re-resolve on the next one"
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
