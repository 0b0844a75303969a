//! `ServiceMap`: a flat, type-keyed, immutable environment extension.
//!
//! Rust's `TypeId` already gives every type a unique, collision-free tag, so
//! a separate tag wrapper would add nothing a bare `T: 'static` doesn't
//! already provide — the type itself is the tag.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct ServiceMap {
    entries: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ServiceMap {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns a new map with `value` installed under its own type, leaving
    /// `self` untouched (`Env` is copy-on-write, per its own clone semantics).
    pub fn add<T: Send + Sync + 'static>(&self, value: Arc<T>) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(TypeId::of::<T>(), value as Arc<dyn Any + Send + Sync>);
        Self { entries: Arc::new(entries) }
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries.get(&TypeId::of::<T>()).and_then(|v| v.clone().downcast::<T>().ok())
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    /// Services in `other` take precedence over services already in `self`.
    pub fn merge(&self, other: &ServiceMap) -> Self {
        let mut entries = (*self.entries).clone();
        for (k, v) in other.entries.iter() {
            entries.insert(*k, v.clone());
        }
        Self { entries: Arc::new(entries) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u32);
    struct Name(String);

    #[test]
    fn add_and_get_round_trips() {
        let map = ServiceMap::empty().add(Arc::new(Counter(7)));
        assert_eq!(map.get::<Counter>().unwrap().0, 7);
        assert!(map.get::<Name>().is_none());
    }

    #[test]
    fn add_does_not_mutate_the_original() {
        let base = ServiceMap::empty();
        let extended = base.add(Arc::new(Counter(1)));
        assert!(base.get::<Counter>().is_none());
        assert!(extended.get::<Counter>().is_some());
    }

    #[test]
    fn merge_prefers_other() {
        let a = ServiceMap::empty().add(Arc::new(Counter(1)));
        let b = ServiceMap::empty().add(Arc::new(Counter(2)));
        let merged = a.merge(&b);
        assert_eq!(merged.get::<Counter>().unwrap().0, 2);
    }
}
