//! Pending module definitions, keyed by canonical path.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// A module factory: invoked once with the resolved dependency values, in
/// declared order, to produce the module's value.
pub type Factory<V> = Arc<dyn Fn(&[Arc<V>]) -> V + Send + Sync>;

/// A registered `(dependencies, factory)` pair awaiting resolution.
pub struct ModuleDefinition<V> {
    dependencies: Vec<String>,
    factory: Factory<V>,
}

impl<V> ModuleDefinition<V> {
    /// Create a definition from a dependency list and a factory.
    pub fn new<F>(dependencies: &[&str], factory: F) -> Self
    where
        F: Fn(&[Arc<V>]) -> V + Send + Sync + 'static,
    {
        Self {
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            factory: Arc::new(factory),
        }
    }

    /// The declared dependency specifiers, in order.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Run the factory with the resolved dependency values.
    pub fn instantiate(&self, values: &[Arc<V>]) -> V {
        (self.factory)(values)
    }
}

impl<V> Clone for ModuleDefinition<V> {
    fn clone(&self) -> Self {
        Self {
            dependencies: self.dependencies.clone(),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<V> fmt::Debug for ModuleDefinition<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// Raw definitions waiting to be resolved. A definition is taken out when
/// its resolution starts and put back if that resolution fails.
pub struct DefinitionRegistry<V> {
    definitions: DashMap<String, ModuleDefinition<V>>,
}

impl<V> DefinitionRegistry<V> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            definitions: DashMap::new(),
        }
    }

    /// Store a definition unless the path already has one; the first
    /// definition wins. Returns whether the definition was stored.
    pub fn insert_first(&self, path: &str, definition: ModuleDefinition<V>) -> bool {
        match self.definitions.entry(path.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(definition);
                true
            }
        }
    }

    /// Remove and return the definition for `path`, claiming it for
    /// resolution.
    pub fn take(&self, path: &str) -> Option<ModuleDefinition<V>> {
        self.definitions.remove(path).map(|(_, definition)| definition)
    }

    /// Put a claimed definition back after a failed resolution. A definition
    /// registered in the meantime keeps priority.
    pub fn restore(&self, path: &str, definition: ModuleDefinition<V>) {
        self.definitions.entry(path.to_string()).or_insert(definition);
    }

    /// Whether `path` has a pending definition.
    pub fn contains(&self, path: &str) -> bool {
        self.definitions.contains_key(path)
    }

    /// Number of pending definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether there are no pending definitions.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl<V> Default for DefinitionRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_definition_wins() {
        let registry: DefinitionRegistry<i32> = DefinitionRegistry::new();

        assert!(registry.insert_first("/a", ModuleDefinition::new(&[], |_| 1)));
        assert!(!registry.insert_first("/a", ModuleDefinition::new(&[], |_| 2)));

        let definition = registry.take("/a").unwrap();
        assert_eq!(definition.instantiate(&[]), 1);
    }

    #[test]
    fn take_claims_and_restore_returns() {
        let registry: DefinitionRegistry<i32> = DefinitionRegistry::new();
        registry.insert_first("/a", ModuleDefinition::new(&["/b"], |_| 1));

        let definition = registry.take("/a").unwrap();
        assert!(!registry.contains("/a"));

        registry.restore("/a", definition);
        assert!(registry.contains("/a"));
        assert_eq!(registry.take("/a").unwrap().dependencies(), ["/b"]);
    }
}
