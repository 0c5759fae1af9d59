//! One-time consumption ledger.
//!
//! Two in-memory maps: redeemed one-time nonces, and the short-lived
//! sessions minted when a one-time directory token is redeemed. Nonce
//! consumption must be atomic so two concurrent redemptions of the same
//! token cannot both win; `DashMap::entry` gives the test-and-set.

use std::sync::atomic::{AtomicI64, Ordering};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use filegate_share_tokens::{ScopeGrant, EXPIRY_SKEW_SECS};
use rand::RngCore;

const SWEEP_INTERVAL_SECS: i64 = 60;
const SESSION_ID_LEN: usize = 32;

struct SessionEntry {
    grant: ScopeGrant,
    expires_at_unix: i64,
}

pub struct ShareLedger {
    /// Redeemed nonce -> grant expiry, kept until the expiry skew has
    /// passed so a replay inside the validity window always loses.
    nonces: DashMap<String, i64>,
    sessions: DashMap<String, SessionEntry>,
    last_sweep: AtomicI64,
}

impl ShareLedger {
    pub fn new() -> Self {
        Self {
            nonces: DashMap::new(),
            sessions: DashMap::new(),
            last_sweep: AtomicI64::new(0),
        }
    }

    /// Atomically marks a nonce as consumed. Returns false when it was
    /// already redeemed.
    pub fn try_consume_nonce(&self, nonce: &str, expires_at_unix: i64, now: i64) -> bool {
        self.maybe_sweep(now);
        match self.nonces.entry(nonce.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(expires_at_unix);
                true
            }
        }
    }

    /// Creates a session carrying the grant. The grant's token text is
    /// dropped first; a session cookie must not be convertible back into a
    /// shareable URL.
    pub fn create_session(&self, mut grant: ScopeGrant, now: i64) -> String {
        self.maybe_sweep(now);
        grant.token.clear();
        let mut raw = [0u8; SESSION_ID_LEN];
        rand::thread_rng().fill_bytes(&mut raw);
        let id = URL_SAFE_NO_PAD.encode(raw);
        self.sessions.insert(
            id.clone(),
            SessionEntry {
                expires_at_unix: grant.expires_at_unix,
                grant,
            },
        );
        id
    }

    /// Looks up a session, honoring the same expiry skew as token
    /// validation. Expired sessions are removed on the spot.
    pub fn try_get_session(&self, id: &str, now: i64) -> Option<ScopeGrant> {
        self.maybe_sweep(now);
        let entry = self.sessions.get(id)?;
        if now <= entry.expires_at_unix + EXPIRY_SKEW_SECS {
            return Some(entry.grant.clone());
        }
        // Shard lock must be released before the removal.
        drop(entry);
        self.sessions.remove(id);
        None
    }

    fn maybe_sweep(&self, now: i64) {
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now - last < SWEEP_INTERVAL_SECS {
            return;
        }
        if self
            .last_sweep
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        self.nonces.retain(|_, expiry| now <= *expiry + EXPIRY_SKEW_SECS);
        self.sessions
            .retain(|_, entry| now <= entry.expires_at_unix + EXPIRY_SKEW_SECS);
    }
}
