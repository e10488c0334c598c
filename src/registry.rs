//! Node factory registry for configuration-driven models.
//!
//! The registry maps type names to factories, so a [`ModelConfig`] can be
//! turned into a composite without the caller naming concrete node types.
//!
//! [`ModelConfig`]: crate::config::ModelConfig
//!
//! # Example
//!
//! ```
//! use devskit::registry::NodeRegistry;
//! use devskit::nodes::RelayNode;
//! use std::collections::HashMap;
//!
//! let mut registry = NodeRegistry::new();
//! registry.register("Relay", |_attrs| Ok(Box::new(RelayNode::new())));
//!
//! let node = registry.create("Relay", &HashMap::new()).unwrap();
//! assert_eq!(node.interface().len(), 2);
//! ```

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{SimError, SimResult};
use crate::node::Node;
use crate::types::Value;

/// Type alias for node factory functions.
pub type NodeFactory =
    Arc<dyn Fn(&HashMap<String, Value>) -> SimResult<Box<dyn Node>> + Send + Sync>;

/// A registry for node factories.
#[derive(Default)]
pub struct NodeRegistry {
    factories: HashMap<String, NodeFactory>,
}

impl NodeRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node factory with the given name, replacing any previous
    /// factory of that name.
    ///
    /// # Example
    ///
    /// ```
    /// use devskit::registry::NodeRegistry;
    /// use devskit::nodes::CounterNode;
    ///
    /// let mut registry = NodeRegistry::new();
    /// registry.register("Counter", |_| Ok(Box::new(CounterNode::new())));
    /// assert!(registry.contains("Counter"));
    /// ```
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&HashMap<String, Value>) -> SimResult<Box<dyn Node>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Creates a node instance by type name.
    ///
    /// Fails with a structure error when the type is not registered, or with
    /// whatever the factory reports for bad attributes.
    pub fn create(
        &self,
        type_name: &str,
        attrs: &HashMap<String, Value>,
    ) -> SimResult<Box<dyn Node>> {
        let factory = self.factories.get(type_name).ok_or_else(|| {
            SimError::Structure(format!("unknown node type '{}'", type_name))
        })?;
        factory(attrs)
    }

    /// Returns a shared handle to a factory.
    pub fn factory(&self, type_name: &str) -> Option<NodeFactory> {
        self.factories.get(type_name).cloned()
    }

    /// Returns true if a type is registered.
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Returns the number of registered types.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns true if no types are registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Returns an iterator over registered type names.
    pub fn type_names(&self) -> impl Iterator<Item = &String> {
        self.factories.keys()
    }

    /// Unregisters a node type.
    pub fn unregister(&mut self, type_name: &str) -> bool {
        self.factories.remove(type_name).is_some()
    }

    /// Clears all registered types.
    pub fn clear(&mut self) {
        self.factories.clear();
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("registered_types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Reads an optional attribute, converting it with serde.
pub fn attr<T: DeserializeOwned>(attrs: &HashMap<String, Value>, key: &str) -> SimResult<Option<T>> {
    match attrs.get(key) {
        None => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| SimError::Structure(format!("attribute '{}': {}", key, e))),
    }
}

/// Reads an attribute that must be present.
pub fn required_attr<T: DeserializeOwned>(attrs: &HashMap<String, Value>, key: &str) -> SimResult<T> {
    attr(attrs, key)?
        .ok_or_else(|| SimError::Structure(format!("missing attribute '{}'", key)))
}

/// Creates a default registry with built-in node types.
///
/// Includes:
/// - `Generator` - GeneratorNode (`period`, optional `limit`)
/// - `Relay` - RelayNode
/// - `Counter` - CounterNode
/// - `Delay` - DelayNode (`delay`)
/// - `ProbabilisticDelay` - ProbabilisticDelayNode (`distribution`)
/// - `Parameter` - ParameterNode (`value`)
pub fn create_default_registry() -> NodeRegistry {
    use crate::nodes::{
        CounterNode, DelayNode, GeneratorNode, ParameterNode, ProbabilisticDelayNode, RelayNode,
    };

    let mut registry = NodeRegistry::new();

    registry.register("Generator", |attrs| {
        let mut node = GeneratorNode::new(required_attr(attrs, "period")?);
        if let Some(limit) = attr(attrs, "limit")? {
            node = node.with_limit(limit);
        }
        Ok(Box::new(node))
    });

    registry.register("Relay", |_| Ok(Box::new(RelayNode::new())));

    registry.register("Counter", |_| Ok(Box::new(CounterNode::new())));

    registry.register("Delay", |attrs| {
        Ok(Box::new(DelayNode::new(required_attr(attrs, "delay")?)))
    });

    registry.register("ProbabilisticDelay", |attrs| {
        Ok(Box::new(ProbabilisticDelayNode::new(required_attr(
            attrs,
            "distribution",
        )?)))
    });

    registry.register("Parameter", |attrs| {
        let value: Value = required_attr(attrs, "value")?;
        Ok(Box::new(ParameterNode::new(value)))
    });

    registry
}
