//! Per-IP connection limiter
//!
//! Caps the number of simultaneous signaling connections accepted from a
//! single source IP. Slots are taken before the WebSocket handshake and
//! given back when the connection closes; an IP with no live connections
//! is dropped from the map entirely so the table only ever holds active
//! sources.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

/// Tracks live connection counts per source IP
#[derive(Clone)]
pub struct ConnectionLimiter {
    max_per_ip: usize,
    counts: Arc<RwLock<HashMap<IpAddr, usize>>>,
}

impl ConnectionLimiter {
    pub fn new(max_per_ip: usize) -> Self {
        Self {
            max_per_ip,
            counts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Claim a connection slot for `ip`.
    ///
    /// Returns `false` when the IP already holds `max_per_ip` slots; a
    /// rejected attempt leaves the count untouched.
    pub fn try_acquire(&self, ip: IpAddr) -> bool {
        let mut counts = self.counts.write();
        let current = counts.get(&ip).copied().unwrap_or(0);
        if current >= self.max_per_ip {
            return false;
        }
        counts.insert(ip, current + 1);
        true
    }

    /// Give back a slot. Counts floor at zero and empty entries are
    /// removed so the map stays bounded by live sources.
    pub fn release(&self, ip: IpAddr) {
        let mut counts = self.counts.write();
        if let Some(count) = counts.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&ip);
                debug!("Connection limiter: dropped idle entry for {}", ip);
            }
        }
    }

    /// Live connections currently held by `ip`
    pub fn connections_for(&self, ip: IpAddr) -> usize {
        self.counts.read().get(&ip).copied().unwrap_or(0)
    }

    /// Number of source IPs with at least one live connection
    pub fn tracked_ips(&self) -> usize {
        self.counts.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    #[test]
    fn test_allows_up_to_cap() {
        let limiter = ConnectionLimiter::new(2);

        assert!(limiter.try_acquire(ip(1)));
        assert!(limiter.try_acquire(ip(1)));
        assert!(!limiter.try_acquire(ip(1)));
        assert_eq!(limiter.connections_for(ip(1)), 2);
    }

    #[test]
    fn test_release_frees_a_slot() {
        let limiter = ConnectionLimiter::new(2);

        assert!(limiter.try_acquire(ip(1)));
        assert!(limiter.try_acquire(ip(1)));
        assert!(!limiter.try_acquire(ip(1)));

        limiter.release(ip(1));
        assert!(limiter.try_acquire(ip(1)));
    }

    #[test]
    fn test_ips_tracked_separately() {
        let limiter = ConnectionLimiter::new(1);

        assert!(limiter.try_acquire(ip(1)));
        assert!(!limiter.try_acquire(ip(1)));
        assert!(limiter.try_acquire(ip(2)));
        assert_eq!(limiter.tracked_ips(), 2);
    }

    #[test]
    fn test_entry_removed_at_zero() {
        let limiter = ConnectionLimiter::new(5);

        assert!(limiter.try_acquire(ip(1)));
        assert_eq!(limiter.tracked_ips(), 1);

        limiter.release(ip(1));
        assert_eq!(limiter.tracked_ips(), 0);
        assert_eq!(limiter.connections_for(ip(1)), 0);
    }

    #[test]
    fn test_release_without_acquire_is_noop() {
        let limiter = ConnectionLimiter::new(2);

        limiter.release(ip(1));
        assert_eq!(limiter.connections_for(ip(1)), 0);
        assert_eq!(limiter.tracked_ips(), 0);

        // The floor did not eat a slot
        assert!(limiter.try_acquire(ip(1)));
        assert!(limiter.try_acquire(ip(1)));
        assert!(!limiter.try_acquire(ip(1)));
    }

    #[test]
    fn test_rejection_does_not_count() {
        let limiter = ConnectionLimiter::new(1);

        assert!(limiter.try_acquire(ip(1)));
        assert!(!limiter.try_acquire(ip(1)));
        assert!(!limiter.try_acquire(ip(1)));

        // One release, one slot: rejections never incremented
        limiter.release(ip(1));
        assert!(limiter.try_acquire(ip(1)));
    }
}
