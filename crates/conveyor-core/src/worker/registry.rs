//! Explicit mapping from implementation identifiers to worker factories.
//!
//! The host application populates a [`Registry`] at startup; topology files
//! refer to implementations by their registered `class` name.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::{Worker, WorkerParams};
use crate::error::ConfigError;

/// Builds one replica from its parameters. Must not start any work.
pub type WorkerFactory =
    Arc<dyn Fn(WorkerParams) -> Result<Box<dyn Worker>, String> + Send + Sync>;

/// Registered worker implementations, keyed by class name.
#[derive(Clone, Default)]
pub struct Registry {
    factories: BTreeMap<String, WorkerFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `class`, replacing any previous entry.
    pub fn register<F>(&mut self, class: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(WorkerParams) -> Result<Box<dyn Worker>, String> + Send + Sync + 'static,
    {
        self.factories.insert(class.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    /// Registered class names, sorted.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build one replica of `class`.
    pub fn create(&self, class: &str, params: WorkerParams) -> Result<Box<dyn Worker>, ConfigError> {
        let stage = params.stage.to_string();
        let factory = self
            .factories
            .get(class)
            .ok_or_else(|| ConfigError::UnknownImplementation {
                stage: stage.clone(),
                class: class.to_string(),
            })?;
        factory(params).map_err(|message| ConfigError::InvalidParams { stage, message })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("classes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkError;
    use crate::worker::tests::params_for;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Worker for Noop {
        async fn run(self: Box<Self>) -> Result<(), WorkError> {
            Ok(())
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register("Noop", |_| Ok(Box::new(Noop) as Box<dyn Worker>))
            .register("Picky", |params| {
                params.require_str("path")?;
                Ok(Box::new(Noop) as Box<dyn Worker>)
            });
        registry
    }

    #[test]
    fn test_lookup() {
        let registry = registry();
        assert!(registry.contains("Noop"));
        assert!(!registry.contains("Missing"));
        assert_eq!(registry.classes().collect::<Vec<_>>(), vec!["Noop", "Picky"]);
    }

    #[tokio::test]
    async fn test_create_and_run() {
        let worker = registry().create("Noop", params_for("Stage")).unwrap();
        worker.run().await.unwrap();
    }

    #[test]
    fn test_unknown_class() {
        let err = registry().create("Missing", params_for("Fetch")).err().unwrap();
        assert!(matches!(
            err,
            ConfigError::UnknownImplementation { ref stage, ref class } if stage == "Fetch" && class == "Missing"
        ));
    }

    #[test]
    fn test_factory_rejection() {
        let err = registry().create("Picky", params_for("Store")).err().unwrap();
        assert!(matches!(err, ConfigError::InvalidParams { .. }));
        assert!(err.to_string().contains("path"));
    }

    #[test]
    fn test_debug_lists_classes() {
        assert!(format!("{:?}", registry()).contains("Picky"));
    }
}
