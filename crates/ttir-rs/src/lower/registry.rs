use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use super::targets::{LoweringTarget, TtMetalTarget, TtnnTarget};

struct TargetRegistry {
    targets: RwLock<HashMap<String, Arc<dyn LoweringTarget>>>,
}

impl TargetRegistry {
    fn with_builtins() -> Self {
        let registry = Self {
            targets: RwLock::new(HashMap::new()),
        };
        registry.register(Arc::new(TtnnTarget::new()));
        registry.register(Arc::new(TtMetalTarget::new()));
        registry
    }

    fn register(&self, target: Arc<dyn LoweringTarget>) {
        self.targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.name().to_string(), target);
    }

    fn get(&self, name: &str) -> Option<Arc<dyn LoweringTarget>> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn list(&self) -> Vec<String> {
        let mut targets: Vec<String> = self
            .targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        targets.sort();
        targets
    }
}

static GLOBAL_REGISTRY: OnceLock<TargetRegistry> = OnceLock::new();

fn registry() -> &'static TargetRegistry {
    GLOBAL_REGISTRY.get_or_init(TargetRegistry::with_builtins)
}

/// Registers `target`, replacing any target with the same name.
pub fn register_target(target: Arc<dyn LoweringTarget>) {
    registry().register(target);
}

pub fn get_target(name: &str) -> Option<Arc<dyn LoweringTarget>> {
    registry().get(name)
}

pub fn list_targets() -> Vec<String> {
    registry().list()
}
