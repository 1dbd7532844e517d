use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// The keyspace: a value map plus a parallel expiry map, with lazy
/// expiration on access. `expiries` is always a subset of `values` in key
/// domain — an entry with no expiry simply has no entry here.
#[derive(Default)]
pub struct Keyspace {
    values: HashMap<Bytes, Bytes>,
    expiries: HashMap<Bytes, SystemTime>,
    /// RDB `0xFA` metadata attributes, retained but not exposed on the wire.
    pub meta: HashMap<String, String>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// `SET k v` — overwrites the value and clears any stale expiry.
    pub fn set(&mut self, key: Bytes, value: Bytes) {
        self.values.insert(key.clone(), value);
        self.expiries.remove(&key);
    }

    /// `SET k v PX ms` — overwrites the value and sets an absolute expiry.
    pub fn set_px(&mut self, key: Bytes, value: Bytes, ms: u64) {
        let expires_at = SystemTime::now() + Duration::from_millis(ms);
        self.values.insert(key.clone(), value);
        self.expiries.insert(key, expires_at);
    }

    /// `GET k` — returns `v` iff the key is visible; otherwise lazily
    /// removes the now-expired entry from both maps and returns `None`.
    pub fn get(&mut self, key: &[u8]) -> Option<Bytes> {
        if let Some(expires_at) = self.expiries.get(key) {
            if *expires_at <= SystemTime::now() {
                self.values.remove(key);
                self.expiries.remove(key);
                return None;
            }
        }
        self.values.get(key).cloned()
    }

    /// Used by RDB loading and by replicated writes — identical semantics to
    /// `set`/`set_px`.
    pub fn load_entry(&mut self, key: Bytes, value: Bytes, expiry: Option<SystemTime>) {
        match expiry {
            Some(at) => {
                self.values.insert(key.clone(), value);
                self.expiries.insert(key, at);
            }
            None => self.set(key, value),
        }
    }

    /// Snapshot of current keys. Expired keys may or may not be filtered —
    /// this implementation returns them as-is, consistent with Redis's lazy
    /// expiration contract (a stale `KEYS *` read is never wrong for long).
    pub fn keys_all(&self) -> Vec<Bytes> {
        self.values.keys().cloned().collect()
    }

    #[cfg(test)]
    pub fn contains_expiry(&self, key: &[u8]) -> bool {
        self.expiries.contains_key(key)
    }
}

/// Converts a UNIX epoch timestamp, in milliseconds, into a `SystemTime`.
/// Used by the RDB reader for `0xFC` records.
pub fn system_time_from_unix_millis(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

/// Converts a UNIX epoch timestamp, in whole seconds, into a `SystemTime`.
/// Used by the RDB reader for `0xFD` records.
pub fn system_time_from_unix_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let mut ks = Keyspace::new();
        ks.set(Bytes::from_static(b"foo"), Bytes::from_static(b"bar"));
        assert_eq!(ks.get(b"foo"), Some(Bytes::from_static(b"bar")));
    }

    #[test]
    fn expired_key_reads_as_none_and_is_removed() {
        let mut ks = Keyspace::new();
        ks.set_px(Bytes::from_static(b"foo"), Bytes::from_static(b"bar"), 0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(ks.get(b"foo"), None);
        assert!(!ks.contains_expiry(b"foo"));
    }

    #[test]
    fn overwrite_without_px_clears_prior_expiry() {
        let mut ks = Keyspace::new();
        ks.set_px(Bytes::from_static(b"foo"), Bytes::from_static(b"bar"), 100_000);
        ks.set(Bytes::from_static(b"foo"), Bytes::from_static(b"baz"));
        assert!(!ks.contains_expiry(b"foo"));
        assert_eq!(ks.get(b"foo"), Some(Bytes::from_static(b"baz")));
    }

    #[test]
    fn missing_key_reads_as_none() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.get(b"nope"), None);
    }

    #[test]
    fn keys_all_is_a_stable_snapshot() {
        let mut ks = Keyspace::new();
        ks.set(Bytes::from_static(b"a"), Bytes::from_static(b"1"));
        ks.set(Bytes::from_static(b"b"), Bytes::from_static(b"2"));
        let mut keys = ks.keys_all();
        keys.sort();
        assert_eq!(keys, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
    }
}
