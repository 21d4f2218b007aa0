//! Background eviction of abandoned rooms
//!
//! Rooms are never torn down when their last peer leaves; they wait here.
//! The reaper wakes at half the configured timeout and removes rooms that
//! are empty and older than the timeout. A room with peers is never
//! touched, whatever its age - occupancy, not wall-clock, bounds a live
//! room's lifetime. Best-effort by design: an empty room can linger for up
//! to one full timeout after its last peer departs.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info};

use crate::registry::Registry;

/// Floor for the sweep interval so a tiny timeout cannot busy-loop
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Periodic garbage collector for empty rooms
pub struct RoomReaper {
    registry: Arc<Mutex<Registry>>,
    timeout: Duration,
}

impl RoomReaper {
    pub fn new(registry: Arc<Mutex<Registry>>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Run one sweep, returning how many rooms were removed.
    /// Called on a timer by [`RoomReaper::run`]; tests call it directly.
    pub fn sweep(&self) -> usize {
        let removed = self.registry.lock().sweep_stale(self.timeout);
        for room_id in &removed {
            info!("Room {} reaped (empty past timeout)", room_id);
        }
        removed.len()
    }

    /// Sweep on an interval until the shutdown channel fires
    /// (call from a tokio task).
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let period = (self.timeout / 2).max(MIN_SWEEP_INTERVAL);
        let mut tick = interval(period);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.sweep();
                }
                _ = shutdown.recv() => {
                    debug!("Room reaper stopped");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use serde_json::Value;
    use tokio::sync::mpsc;

    use crate::registry::Peer;

    fn shared_registry() -> Arc<Mutex<Registry>> {
        let registry = Registry::new();
        Arc::new(Mutex::new(registry))
    }

    fn occupy(registry: &Arc<Mutex<Registry>>, room_id: &str, peer_id: &str) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut registry = registry.lock();
        registry.create_or_get_room(Some(room_id.into()), "user", false, Value::Null);
        registry.add_peer(Peer {
            peer_id: peer_id.into(),
            user_id: "user".into(),
            device_id: "unknown".into(),
            room_id: room_id.into(),
            joined_at: Instant::now(),
            sender: tx,
        });
    }

    #[test]
    fn test_sweep_removes_stale_empty_rooms() {
        let registry = shared_registry();
        registry
            .lock()
            .create_or_get_room(Some("empty".into()), "user", false, Value::Null);

        std::thread::sleep(Duration::from_millis(5));

        let reaper = RoomReaper::new(registry.clone(), Duration::ZERO);
        assert_eq!(reaper.sweep(), 1);
        assert_eq!(registry.lock().room_count(), 0);
    }

    #[test]
    fn test_sweep_spares_occupied_rooms() {
        let registry = shared_registry();
        occupy(&registry, "busy", "p1");

        std::thread::sleep(Duration::from_millis(5));

        // Zero timeout: any empty room would go, but an occupied one stays
        let reaper = RoomReaper::new(registry.clone(), Duration::ZERO);
        assert_eq!(reaper.sweep(), 0);
        assert_eq!(registry.lock().room_count(), 1);
    }

    #[test]
    fn test_sweep_spares_fresh_empty_rooms() {
        let registry = shared_registry();
        registry
            .lock()
            .create_or_get_room(Some("young".into()), "user", false, Value::Null);

        let reaper = RoomReaper::new(registry.clone(), Duration::from_secs(3600));
        assert_eq!(reaper.sweep(), 0);
        assert_eq!(registry.lock().room_count(), 1);
    }

    #[test]
    fn test_room_reaped_only_after_emptying() {
        let registry = shared_registry();
        occupy(&registry, "meeting", "p1");

        std::thread::sleep(Duration::from_millis(5));

        let reaper = RoomReaper::new(registry.clone(), Duration::ZERO);
        assert_eq!(reaper.sweep(), 0);

        registry.lock().remove_peer("p1");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(reaper.sweep(), 1);
        assert_eq!(registry.lock().room_count(), 0);
    }

    #[tokio::test]
    async fn test_run_sweeps_and_stops_on_shutdown() {
        let registry = shared_registry();
        registry
            .lock()
            .create_or_get_room(Some("empty".into()), "user", false, Value::Null);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let reaper = RoomReaper::new(registry.clone(), Duration::from_millis(30));
        let task = tokio::spawn(reaper.run(shutdown_rx));

        // Give the room time to age past the timeout and be swept
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(registry.lock().room_count(), 0);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("reaper should stop on shutdown")
            .unwrap();
    }
}
