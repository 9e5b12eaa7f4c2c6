//! Device lists
//!
//! hald keeps two lists: a staging list for devices still travelling
//! through the hotplug pipeline, and the permanent list clients can see.
//! Both are [`DeviceStore`]s; only the permanent one broadcasts changes.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::device::Device;
use crate::error::{Error, Result};
use crate::types::{keys, PropertyValue};

/// Change notification emitted by a notifying store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Added(String),
    Removed(String),
    PropertiesChanged(String),
}

/// An in-memory list of devices keyed by UDI
#[derive(Clone)]
pub struct DeviceStore {
    name: &'static str,
    devices: Arc<RwLock<BTreeMap<String, Device>>>,
    events: Option<broadcast::Sender<StoreEvent>>,
}

impl DeviceStore {
    /// The permanent, client-visible list. Broadcasts every change.
    pub fn permanent() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            name: "permanent",
            devices: Arc::new(RwLock::new(BTreeMap::new())),
            events: Some(tx),
        }
    }

    /// The staging list. Never notifies anyone.
    pub fn staging() -> Self {
        Self {
            name: "staging",
            devices: Arc::new(RwLock::new(BTreeMap::new())),
            events: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Subscribe to change notifications. Staging stores return None.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        self.events.as_ref().map(|tx| tx.subscribe())
    }

    fn notify(&self, event: StoreEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Insert a device. Staged devices may not have a UDI yet and are
    /// keyed by identity key until they do.
    pub async fn add(&self, device: Device) -> Result<()> {
        let key = store_key(&device);
        if key.is_empty() {
            return Err(Error::InvalidArgument(
                "device has neither UDI nor identity key".to_string(),
            ));
        }
        let mut devices = self.devices.write().await;
        if devices.contains_key(&key) {
            return Err(Error::duplicate_udi(key));
        }
        debug!(store = self.name, key = %key, "Adding device");
        devices.insert(key.clone(), device);
        drop(devices);
        self.notify(StoreEvent::Added(key));
        Ok(())
    }

    /// Insert or replace a device under an explicit key
    pub async fn put(&self, key: &str, device: Device) {
        let replaced = self
            .devices
            .write()
            .await
            .insert(key.to_string(), device)
            .is_some();
        if replaced {
            self.notify(StoreEvent::PropertiesChanged(key.to_string()));
        } else {
            self.notify(StoreEvent::Added(key.to_string()));
        }
    }

    /// Remove a device, returning it if it was present
    pub async fn remove(&self, key: &str) -> Option<Device> {
        let removed = self.devices.write().await.remove(key);
        if removed.is_some() {
            debug!(store = self.name, key = %key, "Removed device");
            self.notify(StoreEvent::Removed(key.to_string()));
        }
        removed
    }

    /// Replace a stored device in place, keyed by its UDI
    pub async fn update(&self, device: Device) -> Result<()> {
        let key = store_key(&device);
        let mut devices = self.devices.write().await;
        let slot = devices
            .get_mut(&key)
            .ok_or_else(|| Error::not_found(key.clone()))?;
        let changed = slot.properties() != device.properties();
        *slot = device;
        drop(devices);
        if changed {
            self.notify(StoreEvent::PropertiesChanged(key));
        }
        Ok(())
    }

    /// Look up a device by UDI (or staging key)
    pub async fn find(&self, key: &str) -> Option<Device> {
        self.devices.read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.devices.read().await.contains_key(key)
    }

    /// Find the device created for the given hardware identity key
    pub async fn find_by_key(&self, identity_key: &str) -> Option<Device> {
        self.devices
            .read()
            .await
            .values()
            .find(|d| d.identity_key() == identity_key)
            .cloned()
    }

    /// First device whose property equals `value`
    pub async fn match_property(&self, property: &str, value: &PropertyValue) -> Option<Device> {
        self.devices
            .read()
            .await
            .values()
            .find(|d| d.property(property) == Some(value))
            .cloned()
    }

    /// Every device whose property equals `value`
    pub async fn match_all(&self, property: &str, value: &PropertyValue) -> Vec<Device> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.property(property) == Some(value))
            .cloned()
            .collect()
    }

    /// Direct children of the given UDI
    pub async fn children_of(&self, parent_udi: &str) -> Vec<Device> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.parent_udi() == Some(parent_udi))
            .cloned()
            .collect()
    }

    /// Devices exposing a capability
    pub async fn find_by_capability(&self, capability: &str) -> Vec<Device> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.has_capability(capability))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// All devices ordered by key
    pub async fn snapshot(&self) -> Vec<Device> {
        self.devices.read().await.values().cloned().collect()
    }

    pub async fn udis(&self) -> Vec<String> {
        self.devices.read().await.keys().cloned().collect()
    }

    /// Pretty-printed JSON array of every device
    pub async fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot().await)?)
    }
}

/// Key a device is stored under: its UDI, or its `linux.sysfs_path` while
/// it has none.
pub fn store_key(device: &Device) -> String {
    if device.has_udi() {
        device.udi().to_string()
    } else {
        device
            .property_str(keys::SYSFS_PATH)
            .unwrap_or_default()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceOrigin;
    use crate::types::DeviceKind;

    fn device(key: &str, udi: Option<&str>, parent: Option<&str>) -> Device {
        let mut d = Device::new(
            DeviceOrigin {
                kind: DeviceKind::Bus,
                identity_key: key.to_string(),
                subsystem: Some("pci".to_string()),
                device_file: None,
                physical_key: None,
            },
            parent.map(str::to_string),
        );
        if let Some(udi) = udi {
            d.set_udi(udi);
        }
        d
    }

    #[tokio::test]
    async fn test_add_find_remove_notifies() {
        let store = DeviceStore::permanent();
        let mut rx = store.subscribe().unwrap();

        store
            .add(device("/d/pci0", Some("/hal/pci0"), None))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), StoreEvent::Added("/hal/pci0".into()));
        assert!(store.find("/hal/pci0").await.is_some());
        assert_eq!(
            store.find_by_key("/d/pci0").await.unwrap().udi(),
            "/hal/pci0"
        );

        assert!(store.remove("/hal/pci0").await.is_some());
        assert_eq!(rx.recv().await.unwrap(), StoreEvent::Removed("/hal/pci0".into()));
        assert!(store.remove("/hal/pci0").await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_udi_rejected() {
        let store = DeviceStore::permanent();
        store.add(device("/d/a", Some("/hal/x"), None)).await.unwrap();
        let err = store.add(device("/d/b", Some("/hal/x"), None)).await;
        assert!(matches!(err, Err(Error::DuplicateUdi(_))));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_staging_is_silent_and_keyed_by_identity() {
        let staging = DeviceStore::staging();
        assert!(staging.subscribe().is_none());
        staging.add(device("/d/pci0", None, None)).await.unwrap();
        assert!(staging.contains("/d/pci0").await);
    }

    #[tokio::test]
    async fn test_match_and_children() {
        let store = DeviceStore::permanent();
        store.add(device("/d/pci0", Some("/hal/pci0"), None)).await.unwrap();
        store
            .add(device("/d/pci0/a", Some("/hal/a"), Some("/hal/pci0")))
            .await
            .unwrap();
        store
            .add(device("/d/pci0/b", Some("/hal/b"), Some("/hal/pci0")))
            .await
            .unwrap();

        let children = store.children_of("/hal/pci0").await;
        assert_eq!(children.len(), 2);

        let found = store
            .match_property(keys::SYSFS_PATH, &PropertyValue::from("/d/pci0/b"))
            .await
            .unwrap();
        assert_eq!(found.udi(), "/hal/b");
        assert_eq!(
            store
                .match_all(keys::SUBSYSTEM, &PropertyValue::from("pci"))
                .await
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn test_update_emits_property_change() {
        let store = DeviceStore::permanent();
        let mut d = device("/d/pci0", Some("/hal/pci0"), None);
        store.add(d.clone()).await.unwrap();
        let mut rx = store.subscribe().unwrap();

        d.set_property("info.product", "Bridge");
        store.update(d).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            StoreEvent::PropertiesChanged("/hal/pci0".into())
        );
    }

    #[tokio::test]
    async fn test_export_json() {
        let store = DeviceStore::permanent();
        store.add(device("/d/pci0", Some("/hal/pci0"), None)).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&store.export_json().await.unwrap()).unwrap();
        assert_eq!(json[0]["udi"], "/hal/pci0");
        assert_eq!(json[0]["properties"]["linux.sysfs_path"], "/d/pci0");
    }
}
