//! Thought-signature cache.
//!
//! Some vendors (Gemini) return an opaque signature alongside each tool
//! call to preserve multi-turn reasoning state. Many clients strip unknown
//! fields when echoing tool calls back, so the gateway remembers the
//! signature keyed by tool-call ID and reinjects it on the next turn.
//! Absence is never an error, only a quality loss.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

/// Default number of retained signatures.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Bounded `tool_call_id -> signature` map. Oldest insertion is evicted
/// first; a tool call rarely lives past a handful of follow-up turns.
#[derive(Debug)]
pub struct SignatureCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct CacheInner {
    map: HashMap<String, String>,
    order: VecDeque<String>,
}

impl SignatureCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Remember `signature` for `tool_call_id`, evicting the oldest entry
    /// when full. Re-putting an ID refreshes its value but not its age.
    pub fn put(&self, tool_call_id: &str, signature: &str) {
        if tool_call_id.is_empty() || signature.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.map.insert(tool_call_id.to_string(), signature.to_string()).is_none() {
            inner.order.push_back(tool_call_id.to_string());
            while inner.order.len() > self.capacity {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.map.remove(&oldest);
                }
            }
        }
    }

    pub fn get(&self, tool_call_id: &str) -> Option<String> {
        self.inner.lock().map.get(tool_call_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let cache = SignatureCache::new(8);
        cache.put("call_1", "S");
        assert_eq!(cache.get("call_1").as_deref(), Some("S"));
        assert_eq!(cache.get("call_2"), None);
    }

    #[test]
    fn eviction_drops_oldest() {
        let cache = SignatureCache::new(2);
        cache.put("a", "1");
        cache.put("b", "2");
        cache.put("c", "3");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b").as_deref(), Some("2"));
        assert_eq!(cache.get("c").as_deref(), Some("3"));
    }

    #[test]
    fn empty_values_are_ignored() {
        let cache = SignatureCache::new(2);
        cache.put("", "sig");
        cache.put("id", "");
        assert!(cache.is_empty());
    }

    #[test]
    fn reput_updates_value() {
        let cache = SignatureCache::new(2);
        cache.put("a", "1");
        cache.put("a", "2");
        assert_eq!(cache.get("a").as_deref(), Some("2"));
        assert_eq!(cache.len(), 1);
    }
}
