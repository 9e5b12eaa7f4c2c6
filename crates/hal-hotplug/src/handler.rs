//! Per-kind device handlers and their registry

use async_trait::async_trait;
use hal_core::{Device, DeviceKind, DeviceStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::event::HotplugEvent;
use crate::prober::ProberRef;

/// Upper bound on `_N` suffixes tried when a UDI is taken
pub const MAX_UDI_SUFFIX: usize = 1000;

/// The per-kind plugin driving what the lifecycle controller does with a
/// device. The controller is generic; everything kind-specific lives here.
#[async_trait]
pub trait Handler: Send + Sync {
    fn kind(&self) -> DeviceKind;

    /// Build a device for the event, or decline it (`None`).
    async fn add(&self, event: &HotplugEvent, parent: Option<&Device>) -> Option<Device>;

    /// Prober to run before the device is finalized, if any
    fn get_prober(&self, _device: &Device) -> Option<ProberRef> {
        None
    }

    /// Last look after probing. `false` discards the device.
    async fn post_probe(&self, _device: &mut Device) -> bool {
        true
    }

    /// Assign a UDI not held by any device in `committed`.
    async fn compute_udi(&self, device: &mut Device, committed: &DeviceStore) -> bool;

    /// Kind-specific teardown before removal. `false` keeps the device.
    async fn remove(&self, _device: &Device) -> bool {
        true
    }

    /// Refresh an already committed device in place
    async fn refresh(&self, _device: &mut Device) -> bool {
        false
    }
}

/// Handlers keyed by device kind
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<DeviceKind, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same kind
    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        let kind = handler.kind();
        if self.handlers.insert(kind, handler).is_some() {
            info!("Replaced hotplug handler for {}", kind);
        }
    }

    pub fn with(mut self, handler: Arc<dyn Handler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, kind: DeviceKind) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<DeviceKind> {
        self.handlers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Replace everything but ASCII alphanumerics and `_` with `_`
pub fn sanitize_udi_component(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// First of `base`, `base_0`, `base_1`, ... not present in `store`
pub async fn unique_udi(store: &DeviceStore, base: &str) -> Option<String> {
    if !store.contains(base).await {
        return Some(base.to_string());
    }
    for n in 0..MAX_UDI_SUFFIX {
        let candidate = format!("{}_{}", base, n);
        if !store.contains(&candidate).await {
            return Some(candidate);
        }
    }
    None
}
