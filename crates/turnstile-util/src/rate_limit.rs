//! Rate limiting utilities

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ClientId;

/// Simple token-bucket rate limiter, one bucket per connected client
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum tokens (requests) per bucket
    max_tokens: u32,
    /// How often tokens are replenished
    refill_interval: Duration,
    /// Per-client state
    clients: HashMap<ClientId, ClientBucket>,
}

#[derive(Debug)]
struct ClientBucket {
    tokens: u32,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a new rate limiter allowing `max_requests` per `interval`
    pub fn new(max_requests: u32, interval: Duration) -> Self {
        Self {
            max_tokens: max_requests,
            refill_interval: interval,
            clients: HashMap::new(),
        }
    }

    /// Check if a request should be allowed for the given client
    ///
    /// Returns `true` if allowed, `false` if rate limited
    pub fn check(&mut self, client_id: &ClientId) -> bool {
        let now = Instant::now();

        let bucket = self.clients.entry(client_id.clone()).or_insert(ClientBucket {
            tokens: self.max_tokens,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill);
        if elapsed >= self.refill_interval {
            bucket.tokens = self.max_tokens;
            bucket.last_refill = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Remove a client's rate limit state
    pub fn remove_client(&mut self, client_id: &ClientId) {
        self.clients.remove(client_id);
    }

    /// Clean up stale client entries
    pub fn cleanup(&mut self, stale_after: Duration) {
        let now = Instant::now();
        self.clients
            .retain(|_, bucket| now.duration_since(bucket.last_refill) < stale_after);
    }
}
