//! Mapping from display targets to the resource they currently want.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::entities::TargetId;

/// Latest url requested per target. Rebinding and delivery share one lock.
#[derive(Debug, Clone, Default)]
pub struct TagRegistry {
    tags: Arc<Mutex<HashMap<TargetId, String>>>,
}

impl TagRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags `target` with `url`, returning the previous tag.
    pub fn tag(&self, target: TargetId, url: &str) -> Option<String> {
        self.tags.lock().insert(target, url.to_string())
    }

    /// Removes the tag of `target`.
    pub fn untag(&self, target: TargetId) -> Option<String> {
        self.tags.lock().remove(&target)
    }

    /// Returns the url `target` currently wants.
    #[must_use]
    pub fn current(&self, target: TargetId) -> Option<String> {
        self.tags.lock().get(&target).cloned()
    }

    /// Returns true if `target` still wants `url`.
    #[must_use]
    pub fn matches(&self, target: TargetId, url: &str) -> bool {
        self.tags.lock().get(&target).is_some_and(|tag| tag == url)
    }

    /// Runs `deliver` while holding the lock, only if `target` still wants
    /// `url`.
    pub fn deliver_if_current<R>(
        &self,
        target: TargetId,
        url: &str,
        deliver: impl FnOnce() -> R,
    ) -> Option<R> {
        let tags = self.tags.lock();
        if tags.get(&target).is_some_and(|tag| tag == url) {
            Some(deliver())
        } else {
            None
        }
    }

    /// Number of tagged targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.lock().len()
    }

    /// Returns true if no target is tagged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_tag_wins() {
        let tags = TagRegistry::new();
        let target = TargetId::new(7);

        assert!(tags.tag(target, "a").is_none());
        assert_eq!(tags.tag(target, "b").as_deref(), Some("a"));

        assert!(tags.matches(target, "b"));
        assert!(!tags.matches(target, "a"));
        assert_eq!(tags.current(target).as_deref(), Some("b"));
    }

    #[test]
    fn test_delivery_requires_current_tag() {
        let tags = TagRegistry::new();
        let target = TargetId::new(1);
        tags.tag(target, "a");

        assert_eq!(tags.deliver_if_current(target, "a", || 1), Some(1));
        assert_eq!(tags.deliver_if_current(target, "b", || 2), None);
        assert_eq!(tags.deliver_if_current(TargetId::new(2), "a", || 3), None);

        tags.untag(target);
        assert!(tags.is_empty());
        assert_eq!(tags.deliver_if_current(target, "a", || 4), None);
    }
}
