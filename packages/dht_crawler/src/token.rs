use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use rand::Rng;

/// How often the signing secret rotates (spec §4.6 "token-secret rotation
/// every 5 min").
pub const ROTATION_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Rotating-secret token issuer for `get_peers`/`announce_peer` (spec §3
/// "Token"). Tokens are salted by the requester's IP, so forging one
/// requires having observed a recent response to that address; the previous
/// secret is kept for one more rotation so tokens stay valid across the
/// boundary rather than expiring precisely on the 5-minute mark.
pub struct TokenManager {
    current: [u8; 20],
    previous: Option<[u8; 20]>,
    rotated_at: Instant,
}

impl TokenManager {
    pub fn new() -> TokenManager {
        TokenManager {
            current: random_secret(),
            previous: None,
            rotated_at: Instant::now(),
        }
    }

    pub fn issue(&self, ip: IpAddr) -> Vec<u8> {
        compute(&self.current, ip)
    }

    /// Accepts a token produced by either the current or the immediately
    /// prior secret.
    pub fn accept(&self, ip: IpAddr, token: &[u8]) -> bool {
        if compute(&self.current, ip) == token {
            return true;
        }
        match &self.previous {
            Some(prev) => compute(prev, ip) == token,
            None => false,
        }
    }

    pub fn maybe_rotate(&mut self) {
        if self.rotated_at.elapsed() >= ROTATION_PERIOD {
            self.previous = Some(self.current);
            self.current = random_secret();
            self.rotated_at = Instant::now();
        }
    }
}

impl Default for TokenManager {
    fn default() -> TokenManager {
        TokenManager::new()
    }
}

fn random_secret() -> [u8; 20] {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill(&mut bytes);
    bytes
}

fn compute(secret: &[u8; 20], ip: IpAddr) -> Vec<u8> {
    let mut hasher = DefaultHasher::new();
    secret.hash(&mut hasher);
    ip.hash(&mut hasher);
    hasher.finish().to_be_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "203.0.113.1".parse().unwrap()
    }

    #[test]
    fn issued_token_is_accepted() {
        let mgr = TokenManager::new();
        let token = mgr.issue(ip());
        assert!(mgr.accept(ip(), &token));
    }

    #[test]
    fn token_rejected_for_different_ip() {
        let mgr = TokenManager::new();
        let token = mgr.issue(ip());
        let other: IpAddr = "203.0.113.2".parse().unwrap();
        assert!(!mgr.accept(other, &token));
    }

    #[test]
    fn previous_secret_still_accepted_after_one_rotation() {
        let mut mgr = TokenManager::new();
        let token = mgr.issue(ip());
        mgr.previous = Some(mgr.current);
        mgr.current = random_secret();
        assert!(mgr.accept(ip(), &token));
    }

    #[test]
    fn token_rejected_after_two_rotations() {
        let mut mgr = TokenManager::new();
        let token = mgr.issue(ip());
        mgr.previous = Some(mgr.current);
        mgr.current = random_secret();
        mgr.previous = Some(mgr.current);
        mgr.current = random_secret();
        assert!(!mgr.accept(ip(), &token));
    }
}
