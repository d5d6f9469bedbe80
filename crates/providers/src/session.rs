//! Per-service session token cache.
//!
//! Stateful providers hand out a token during the handshake. Concurrent turns
//! may race to populate the same entry; the last write wins and a repeated
//! handshake is harmless.

use std::collections::HashMap;
use std::sync::RwLock;

/// Key-value store for session tokens, keyed by service name.
pub trait SessionStore: Send + Sync {
    fn get(&self, service: &str) -> Option<String>;
    fn put(&self, service: &str, token: String);
    fn remove(&self, service: &str);
}

/// Process-local store behind an `RwLock`.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    tokens: RwLock<HashMap<String, String>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, service: &str) -> Option<String> {
        self.tokens
            .read()
            .ok()
            .and_then(|tokens| tokens.get(service).cloned())
    }

    fn put(&self, service: &str, token: String) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(service.to_string(), token);
        }
    }

    fn remove(&self, service: &str) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.remove(service);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove() {
        let store = InMemorySessionStore::new();
        assert!(store.get("weather").is_none());
        store.put("weather", "sess-1".into());
        assert_eq!(store.get("weather").as_deref(), Some("sess-1"));
        store.put("weather", "sess-2".into());
        assert_eq!(store.get("weather").as_deref(), Some("sess-2"));
        assert_eq!(store.len(), 1);
        store.remove("weather");
        assert!(store.is_empty());
    }
}
