//! TURN REST API credential minting and verification
//!
//! Implements the time-limited credential scheme understood by coturn's
//! `use-auth-secret` mode: the username is `"{expiry}:{identifier}"` with a
//! unix-seconds expiry, and the password is the base64-encoded HMAC-SHA1 of
//! that username under a secret shared with the relay. Both sides derive the
//! password independently, so nothing is ever stored; expiry is the only
//! way a credential stops working.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use tracing::debug;

use crate::config::TurnConfig;
use crate::DEFAULT_TURN_TTL_SECS;

type HmacSha1 = Hmac<Sha1>;

/// A time-limited TURN credential pair plus the relay URIs it unlocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnCredential {
    /// `"{expiry}:{identifier}"` where expiry is unix seconds
    pub username: String,
    /// base64(HMAC-SHA1(secret, username))
    pub credential: String,
    /// Lifetime in seconds from the moment of issue
    pub ttl: u64,
    /// TURN relay URIs (UDP, TCP, TLS)
    pub urls: Vec<String>,
}

/// Stateless issuer and verifier for TURN REST API credentials
#[derive(Debug, Clone)]
pub struct CredentialIssuer {
    config: TurnConfig,
}

impl CredentialIssuer {
    pub fn new(config: TurnConfig) -> Self {
        Self { config }
    }

    /// Issue a credential for `identifier`, valid for `ttl` (default 24h).
    ///
    /// The identifier lands verbatim after the expiry timestamp, so relay
    /// logs show who a credential was minted for.
    pub fn issue(&self, identifier: &str, ttl: Option<Duration>) -> TurnCredential {
        let ttl = ttl.unwrap_or(Duration::from_secs(DEFAULT_TURN_TTL_SECS));
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        // Callers pass the TTL straight off the wire; saturate so an
        // absurd value cannot overflow the expiry arithmetic.
        let username = format!("{}:{}", now.saturating_add(ttl.as_secs()), identifier);
        let credential = self.sign(&username);

        debug!("Issued TURN credential for {} (ttl {}s)", identifier, ttl.as_secs());

        TurnCredential {
            username,
            credential,
            ttl: ttl.as_secs(),
            urls: self.urls(),
        }
    }

    /// Check a username/credential pair: well-formed, unexpired, MAC intact.
    ///
    /// Returns `false` for malformed usernames, past expiry timestamps,
    /// undecodable base64, and MAC mismatches alike; it never panics and
    /// never says why.
    pub fn verify(&self, username: &str, credential: &str) -> bool {
        let Some((expiry, _)) = username.split_once(':') else {
            return false;
        };
        let Ok(expiry) = expiry.parse::<u64>() else {
            return false;
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        if expiry <= now {
            return false;
        }
        let Ok(presented) = BASE64.decode(credential) else {
            return false;
        };

        // verify_slice compares in constant time
        let mut mac = HmacSha1::new_from_slice(self.config.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(username.as_bytes());
        mac.verify_slice(&presented).is_ok()
    }

    /// Relay URIs for the configured host: UDP and TCP on the plain port,
    /// TLS on its dedicated port.
    pub fn urls(&self) -> Vec<String> {
        vec![
            format!("turn:{}:{}?transport=udp", self.config.host, self.config.port),
            format!("turn:{}:{}?transport=tcp", self.config.host, self.config.port),
            format!("turns:{}:{}?transport=tcp", self.config.host, self.config.tls_port),
        ]
    }

    fn sign(&self, username: &str) -> String {
        let mut mac = HmacSha1::new_from_slice(self.config.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(username.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> CredentialIssuer {
        CredentialIssuer::new(TurnConfig {
            host: "turn.example.com".to_string(),
            secret: "test-secret".to_string(),
            ..Default::default()
        })
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[test]
    fn test_issue_shape() {
        let cred = issuer().issue("alice", None);

        let (expiry, identifier) = cred.username.split_once(':').unwrap();
        assert_eq!(identifier, "alice");
        let expiry: u64 = expiry.parse().unwrap();
        assert!(expiry > now_secs());

        assert_eq!(cred.ttl, 86_400);
        assert_eq!(cred.urls.len(), 3);
        assert_eq!(cred.urls[0], "turn:turn.example.com:3478?transport=udp");
        assert_eq!(cred.urls[1], "turn:turn.example.com:3478?transport=tcp");
        assert_eq!(cred.urls[2], "turns:turn.example.com:5349?transport=tcp");
    }

    #[test]
    fn test_custom_ttl() {
        let cred = issuer().issue("bob", Some(Duration::from_secs(60)));
        assert_eq!(cred.ttl, 60);

        let expiry: u64 = cred.username.split_once(':').unwrap().0.parse().unwrap();
        let expected = now_secs() + 60;
        // Allow a little slack for the clock reads around issue()
        assert!(expiry >= expected - 2 && expiry <= expected + 2);
    }

    #[test]
    fn test_huge_ttl_saturates_instead_of_overflowing() {
        let issuer = issuer();
        let cred = issuer.issue("alice", Some(Duration::from_secs(u64::MAX)));

        let expiry: u64 = cred.username.split_once(':').unwrap().0.parse().unwrap();
        assert_eq!(expiry, u64::MAX);
        assert!(issuer.verify(&cred.username, &cred.credential));
    }

    #[test]
    fn test_verify_accepts_fresh_credential() {
        let issuer = issuer();
        let cred = issuer.issue("alice", None);
        assert!(issuer.verify(&cred.username, &cred.credential));
    }

    #[test]
    fn test_verify_rejects_tampered_username() {
        let issuer = issuer();
        let cred = issuer.issue("alice", None);

        let tampered = cred.username.replace("alice", "alicf");
        assert!(!issuer.verify(&tampered, &cred.credential));
    }

    #[test]
    fn test_verify_rejects_tampered_credential() {
        let issuer = issuer();
        let cred = issuer.issue("alice", None);

        let mut chars: Vec<char> = cred.credential.chars().collect();
        chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();
        assert!(!issuer.verify(&cred.username, &tampered));
    }

    #[test]
    fn test_verify_rejects_expired() {
        let issuer = issuer();
        // A correctly signed credential whose expiry is already in the past
        let username = "0:alice".to_string();
        let credential = issuer.sign(&username);
        assert!(!issuer.verify(&username, &credential));
    }

    #[test]
    fn test_verify_rejects_malformed_username() {
        let issuer = issuer();
        assert!(!issuer.verify("", "irrelevant"));
        assert!(!issuer.verify("no-colon-here", "irrelevant"));
        assert!(!issuer.verify("notanumber:alice", "irrelevant"));
    }

    #[test]
    fn test_verify_rejects_bad_base64() {
        let issuer = issuer();
        let cred = issuer.issue("alice", None);
        assert!(!issuer.verify(&cred.username, "!!! not base64 !!!"));
    }

    #[test]
    fn test_verify_rejects_foreign_secret() {
        let cred = issuer().issue("alice", None);

        let other = CredentialIssuer::new(TurnConfig {
            host: "turn.example.com".to_string(),
            secret: "different-secret".to_string(),
            ..Default::default()
        });
        assert!(!other.verify(&cred.username, &cred.credential));
    }

    #[test]
    fn test_credential_serialization() {
        let cred = issuer().issue("alice", None);
        let json = serde_json::to_string(&cred).unwrap();
        let parsed: TurnCredential = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cred);
    }
}
