//! Expiry Sweep Task
//!
//! Background task that periodically drops expired slots from the
//! in-process backend. Reads already ignore expired slots; the sweep only
//! reclaims their memory.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::MemoryBackend;

/// Spawns a background task that sweeps expired slots every
/// `cleanup_interval_secs` seconds.
///
/// Returns the task handle so it can be aborted on shutdown.
///
/// # Example
/// ```ignore
/// let backend = MemoryBackend::new(1000);
/// let cleanup_handle = spawn_cleanup_task(backend.clone(), 1);
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(backend: MemoryBackend, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting expiry sweep with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = backend.cleanup_expired().await;
            if removed > 0 {
                info!("Expiry sweep: removed {} expired slots", removed);
            } else {
                debug!("Expiry sweep: no expired slots found");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CacheBackend;

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_slots() {
        let backend = MemoryBackend::new(100);
        backend
            .set("expire_soon", b"value".to_vec(), Duration::from_millis(200))
            .await
            .unwrap();

        let handle = spawn_cleanup_task(backend.clone(), 1);

        // Wait for the slot to expire and the sweep to run
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // The slot is physically gone, not merely hidden
        assert!(backend.is_empty().await);

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_live_slots() {
        let backend = MemoryBackend::new(100);
        backend
            .set("long_lived", b"value".to_vec(), Duration::from_secs(3600))
            .await
            .unwrap();

        let handle = spawn_cleanup_task(backend.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(
            backend.get("long_lived").await.unwrap(),
            Some(b"value".to_vec())
        );

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let handle = spawn_cleanup_task(MemoryBackend::new(100), 1);

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
