//! Data-driven handler covering every device kind
//!
//! Per-bus field extraction is left to probers and merge rules; what
//! differs between kinds here is plain data in a [`KindSpec`].

use async_trait::async_trait;
use hal_core::config::DEFAULT_UDI_PREFIX;
use hal_core::{keys, Device, DeviceKind, DeviceOrigin, DeviceStore};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::event::{basename, HotplugEvent};
use crate::handler::{sanitize_udi_component, unique_udi, Handler, HandlerRegistry};
use crate::prober::ProberRef;

/// What distinguishes one device kind from another
#[derive(Debug, Clone)]
pub struct KindSpec {
    pub kind: DeviceKind,
    /// UDI below the prefix. `{subsystem}`, `{name}` and `{parent}` are
    /// substituted before sanitizing.
    pub udi_template: String,
    pub category: Option<String>,
    pub capabilities: Vec<String>,
    /// Decline devices without a committed parent
    pub requires_parent: bool,
    /// Accept only these subsystems, when set
    pub subsystems: Option<Vec<String>>,
    /// Prober run for every device of this kind, unless `info.prober` says otherwise
    pub prober: Option<ProberRef>,
}

impl KindSpec {
    pub fn new(kind: DeviceKind, udi_template: impl Into<String>) -> Self {
        Self {
            kind,
            udi_template: udi_template.into(),
            category: None,
            capabilities: Vec::new(),
            requires_parent: false,
            subsystems: None,
            prober: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn requiring_parent(mut self) -> Self {
        self.requires_parent = true;
        self
    }

    pub fn with_subsystems(mut self, subsystems: &[&str]) -> Self {
        self.subsystems = Some(subsystems.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_prober(mut self, prober: ProberRef) -> Self {
        self.prober = Some(prober);
        self
    }

    /// The stock table for the five kinds
    pub fn defaults() -> Vec<KindSpec> {
        vec![
            KindSpec::new(DeviceKind::Bus, "{subsystem}_{name}"),
            KindSpec::new(DeviceKind::Class, "{parent}_{subsystem}_{name}"),
            KindSpec::new(DeviceKind::Block, "{parent}_block_{name}")
                .with_category("block")
                .with_capability("block"),
            KindSpec::new(DeviceKind::Acpi, "acpi_{name}"),
            KindSpec::new(DeviceKind::Pmu, "pmu_{name}")
                .with_category("power_management")
                .with_capability("power_management"),
        ]
    }
}

/// One handler implementation, parameterized by a [`KindSpec`]
pub struct GenericHandler {
    spec: KindSpec,
    udi_prefix: String,
}

impl GenericHandler {
    pub fn new(spec: KindSpec) -> Self {
        Self::with_prefix(spec, DEFAULT_UDI_PREFIX)
    }

    pub fn with_prefix(spec: KindSpec, udi_prefix: impl Into<String>) -> Self {
        Self {
            spec,
            udi_prefix: udi_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn spec(&self) -> &KindSpec {
        &self.spec
    }

    /// A registry with a generic handler for each default kind
    pub fn default_registry(udi_prefix: &str) -> HandlerRegistry {
        KindSpec::defaults()
            .into_iter()
            .fold(HandlerRegistry::new(), |registry, spec| {
                registry.with(Arc::new(GenericHandler::with_prefix(spec, udi_prefix)))
            })
    }

    fn udi_base(&self, device: &Device) -> String {
        let parent = device
            .parent_udi()
            .map(|p| p.rsplit('/').next().unwrap_or(p).to_string())
            .unwrap_or_else(|| "computer".to_string());
        let subsystem = device
            .property_str(keys::SUBSYSTEM)
            .unwrap_or(self.spec.kind.as_str());
        let name = basename(device.identity_key());

        let relative = self
            .spec
            .udi_template
            .replace("{subsystem}", subsystem)
            .replace("{name}", name)
            .replace("{parent}", &parent);
        format!("{}/{}", self.udi_prefix, sanitize_udi_component(&relative))
    }

    fn apply_spec(&self, device: &mut Device) {
        if let Some(category) = &self.spec.category {
            device.set_category(category.clone());
        }
        for capability in &self.spec.capabilities {
            device.add_capability(capability.clone());
        }
    }
}

#[async_trait]
impl Handler for GenericHandler {
    fn kind(&self) -> DeviceKind {
        self.spec.kind
    }

    async fn add(&self, event: &HotplugEvent, parent: Option<&Device>) -> Option<Device> {
        if let Some(allowed) = &self.spec.subsystems {
            let subsystem = event.subsystem.as_deref().unwrap_or_default();
            if !allowed.iter().any(|s| s == subsystem) {
                debug!(key = %event.identity_key, subsystem, "Subsystem not handled");
                return None;
            }
        }
        if self.spec.requires_parent && parent.is_none() {
            debug!(key = %event.identity_key, "No parent device, declining");
            return None;
        }

        let origin = DeviceOrigin {
            kind: self.spec.kind,
            identity_key: event.identity_key.clone(),
            subsystem: event.subsystem.clone(),
            device_file: event.device_file.clone(),
            physical_key: event.physical_key.clone(),
        };
        let mut device = Device::new(origin, parent.map(|p| p.udi().to_string()));
        self.apply_spec(&mut device);
        Some(device)
    }

    fn get_prober(&self, device: &Device) -> Option<ProberRef> {
        match device.property_str(keys::PROBER) {
            Some(program) if !program.is_empty() => Some(ProberRef::new(program)),
            _ => self.spec.prober.clone(),
        }
    }

    async fn compute_udi(&self, device: &mut Device, committed: &DeviceStore) -> bool {
        let base = self.udi_base(device);
        match unique_udi(committed, &base).await {
            Some(udi) => {
                device.set_udi(udi);
                true
            }
            None => {
                warn!(base = %base, "UDI suffixes exhausted");
                false
            }
        }
    }

    async fn refresh(&self, device: &mut Device) -> bool {
        let origin = device.origin().clone();
        device.set_property(keys::SYSFS_PATH, origin.identity_key);
        if let Some(file) = origin.device_file {
            device.set_property(keys::DEVICE_FILE, file);
        }
        if !device.property_bool(keys::IGNORE) {
            self.apply_spec(device);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus_event(key: &str) -> HotplugEvent {
        HotplugEvent::add(DeviceKind::Bus, key).with_subsystem("pci")
    }

    #[tokio::test]
    async fn test_add_and_compute_udi() {
        let handler = GenericHandler::new(KindSpec::new(DeviceKind::Bus, "{subsystem}_{name}"));
        let store = DeviceStore::permanent();

        let mut device = handler
            .add(&bus_event("/sys/devices/pci0000:00/0000:00:1f.2"), None)
            .await
            .unwrap();
        assert!(handler.compute_udi(&mut device, &store).await);
        assert_eq!(
            device.udi(),
            "/org/freedesktop/Hal/devices/pci_0000_00_1f_2"
        );
        assert_eq!(device.property_str(keys::UDI), Some(device.udi()));
    }

    #[tokio::test]
    async fn test_compute_udi_avoids_committed() {
        let handler = GenericHandler::with_prefix(KindSpec::new(DeviceKind::Bus, "{name}"), "/hal");
        let store = DeviceStore::permanent();

        let mut first = handler.add(&bus_event("/a/dup"), None).await.unwrap();
        assert!(handler.compute_udi(&mut first, &store).await);
        store.add(first).await.unwrap();

        let mut second = handler.add(&bus_event("/b/dup"), None).await.unwrap();
        assert!(handler.compute_udi(&mut second, &store).await);
        assert_eq!(second.udi(), "/hal/dup_0");
    }

    #[tokio::test]
    async fn test_class_udi_uses_parent() {
        let handler = GenericHandler::with_prefix(
            KindSpec::new(DeviceKind::Class, "{parent}_{subsystem}_{name}"),
            "/hal",
        );
        let mut parent = Device::new(
            DeviceOrigin {
                kind: DeviceKind::Bus,
                identity_key: "/d/pci0/00:1.0".into(),
                subsystem: Some("pci".into()),
                device_file: None,
                physical_key: None,
            },
            None,
        );
        parent.set_udi("/hal/pci_00_1_0");

        let event = HotplugEvent::add(DeviceKind::Class, "/d/pci0/00:1.0/net/eth0").with_subsystem("net");
        let mut device = handler.add(&event, Some(&parent)).await.unwrap();
        assert_eq!(device.parent_udi(), Some("/hal/pci_00_1_0"));

        assert!(handler.compute_udi(&mut device, &DeviceStore::permanent()).await);
        assert_eq!(device.udi(), "/hal/pci_00_1_0_net_eth0");
    }

    #[tokio::test]
    async fn test_declines_by_spec() {
        let acpi = GenericHandler::new(KindSpec::new(DeviceKind::Acpi, "acpi_{name}").with_subsystems(&["acpi"]));
        let event = HotplugEvent::add(DeviceKind::Acpi, "/proc/acpi/battery/BAT0").with_subsystem("battery");
        assert!(acpi.add(&event, None).await.is_none());

        let needs_parent = GenericHandler::new(KindSpec::new(DeviceKind::Class, "{name}").requiring_parent());
        let event = HotplugEvent::add(DeviceKind::Class, "/sys/class/misc/fuse");
        assert!(needs_parent.add(&event, None).await.is_none());
    }

    #[tokio::test]
    async fn test_prober_selection() {
        let spec = KindSpec::new(DeviceKind::Block, "{name}")
            .with_category("block")
            .with_capability("block")
            .with_prober(ProberRef::new("hald-probe-storage"));
        let handler = GenericHandler::new(spec);
        let event = HotplugEvent::add(DeviceKind::Block, "/sys/block/sda").with_device_file("/dev/sda");

        let mut device = handler.add(&event, None).await.unwrap();
        assert!(device.has_capability("block"));
        assert_eq!(device.property_str(keys::CATEGORY), Some("block"));
        assert_eq!(
            handler.get_prober(&device).unwrap().program,
            "hald-probe-storage"
        );

        device.set_property(keys::PROBER, "hald-probe-volume");
        assert_eq!(handler.get_prober(&device).unwrap().program, "hald-probe-volume");
    }

    #[test]
    fn test_default_registry_covers_all_kinds() {
        let registry = GenericHandler::default_registry("/hal");
        assert_eq!(registry.kinds(), DeviceKind::ALL.to_vec());
    }
}
