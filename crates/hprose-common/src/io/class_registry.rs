use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Maps local class names to the aliases used on the wire.
///
/// A registry is owned by one client (or one standalone codec user) and
/// shared with every [`Writer`](super::Writer) and [`Reader`](super::Reader)
/// it creates. Unregistered classes travel under their own name.
///
/// # Example
///
/// ```
/// use hprose_common::io::ClassRegistry;
///
/// let registry = ClassRegistry::new();
/// registry.register("app::model::User", "User");
/// assert_eq!(registry.alias_of("app::model::User"), "User");
/// assert_eq!(registry.class_of("User"), "app::model::User");
/// assert_eq!(registry.class_of("Unknown"), "Unknown");
/// ```
#[derive(Debug, Default)]
pub struct ClassRegistry {
    inner: RwLock<Aliases>,
}

#[derive(Debug, Default)]
struct Aliases {
    by_class: HashMap<String, String>,
    by_alias: HashMap<String, String>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `class` under `alias`, replacing any earlier mapping of either.
    pub fn register(&self, class: impl Into<String>, alias: impl Into<String>) {
        let (class, alias) = (class.into(), alias.into());
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(old_alias) = inner.by_class.insert(class.clone(), alias.clone()) {
            inner.by_alias.remove(&old_alias);
        }
        if let Some(old_class) = inner.by_alias.insert(alias, class.clone()) {
            if old_class != class {
                inner.by_class.remove(&old_class);
            }
        }
    }

    /// Wire name for a local class.
    pub fn alias_of(&self, class: &str) -> String {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .by_class
            .get(class)
            .cloned()
            .unwrap_or_else(|| class.to_string())
    }

    /// Local class name for a wire alias.
    pub fn class_of(&self, alias: &str) -> String {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .by_alias
            .get(alias)
            .cloned()
            .unwrap_or_else(|| alias.to_string())
    }

    pub fn is_registered(&self, class: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_class.contains_key(class)
    }
}
