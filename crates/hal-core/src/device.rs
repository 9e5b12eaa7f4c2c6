//! The device object and its property bag

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{keys, DeviceKind, PropertyValue};

/// Where a device came from, kept so the same hotplug event can be
/// regenerated later (reprobe).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOrigin {
    pub kind: DeviceKind,
    pub identity_key: String,
    #[serde(default)]
    pub subsystem: Option<String>,
    #[serde(default)]
    pub device_file: Option<String>,
    #[serde(default)]
    pub physical_key: Option<String>,
}

/// A discovered device
///
/// The UDI is empty until a handler computes it; a device is only placed in
/// the permanent store once it has one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    udi: String,
    parent_udi: Option<String>,
    origin: DeviceOrigin,
    properties: BTreeMap<String, PropertyValue>,
    capabilities: BTreeSet<String>,
    created_at: DateTime<Utc>,
}

impl Device {
    pub fn new(origin: DeviceOrigin, parent_udi: Option<String>) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(
            keys::SYSFS_PATH.to_string(),
            PropertyValue::String(origin.identity_key.clone()),
        );
        properties.insert(
            keys::HOTPLUG_TYPE.to_string(),
            PropertyValue::from(origin.kind.as_str()),
        );
        if let Some(subsystem) = &origin.subsystem {
            properties.insert(
                keys::LINUX_SUBSYSTEM.to_string(),
                PropertyValue::String(subsystem.clone()),
            );
            properties.insert(
                keys::SUBSYSTEM.to_string(),
                PropertyValue::String(subsystem.clone()),
            );
        }
        if let Some(file) = &origin.device_file {
            properties.insert(
                keys::DEVICE_FILE.to_string(),
                PropertyValue::String(file.clone()),
            );
        }

        let mut device = Self {
            udi: String::new(),
            parent_udi: None,
            properties,
            capabilities: BTreeSet::new(),
            created_at: Utc::now(),
            origin,
        };
        device.set_parent_udi(parent_udi);
        device
    }

    pub fn udi(&self) -> &str {
        &self.udi
    }

    pub fn has_udi(&self) -> bool {
        !self.udi.is_empty()
    }

    /// Assign the UDI, mirrored into `info.udi`.
    pub fn set_udi(&mut self, udi: impl Into<String>) {
        self.udi = udi.into();
        self.properties
            .insert(keys::UDI.to_string(), PropertyValue::String(self.udi.clone()));
    }

    pub fn parent_udi(&self) -> Option<&str> {
        self.parent_udi.as_deref()
    }

    pub fn set_parent_udi(&mut self, parent: Option<String>) {
        match &parent {
            Some(p) => {
                self.properties
                    .insert(keys::PARENT.to_string(), PropertyValue::String(p.clone()));
            }
            None => {
                self.properties.remove(keys::PARENT);
            }
        }
        self.parent_udi = parent;
    }

    pub fn origin(&self) -> &DeviceOrigin {
        &self.origin
    }

    pub fn kind(&self) -> DeviceKind {
        self.origin.kind
    }

    pub fn identity_key(&self) -> &str {
        &self.origin.identity_key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(PropertyValue::as_str)
    }

    pub fn property_bool(&self, key: &str) -> bool {
        self.properties
            .get(key)
            .and_then(PropertyValue::as_bool)
            .unwrap_or(false)
    }

    pub fn property_strlist(&self, key: &str) -> Vec<String> {
        match self.properties.get(key) {
            Some(PropertyValue::StrList(list)) => list.clone(),
            Some(PropertyValue::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Set a property. Writing `info.capabilities` replaces the capability set.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        let key = key.into();
        let value = value.into();
        if key == keys::CAPABILITIES {
            self.capabilities = match value {
                PropertyValue::StrList(list) => list.into_iter().collect(),
                PropertyValue::String(s) => std::iter::once(s).collect(),
                _ => BTreeSet::new(),
            };
            self.sync_capabilities();
            return;
        }
        self.properties.insert(key, value);
    }

    pub fn remove_property(&mut self, key: &str) -> Option<PropertyValue> {
        if key == keys::CAPABILITIES {
            self.capabilities.clear();
        }
        self.properties.remove(key)
    }

    /// Append to a string-list property, creating it if needed
    pub fn append_property(&mut self, key: &str, item: impl Into<String>) {
        let item = item.into();
        let mut list = self.property_strlist(key);
        if !list.contains(&item) {
            list.push(item);
        }
        self.properties
            .insert(key.to_string(), PropertyValue::StrList(list));
    }

    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Add a capability, mirrored into `info.capabilities`.
    pub fn add_capability(&mut self, capability: impl Into<String>) {
        self.capabilities.insert(capability.into());
        self.sync_capabilities();
    }

    pub fn set_category(&mut self, category: impl Into<String>) {
        self.set_property(keys::CATEGORY, category.into());
    }

    /// Drop category and capabilities so the device never matches anything
    pub fn strip_capabilities(&mut self) {
        self.capabilities.clear();
        self.properties.remove(keys::CAPABILITIES);
        self.properties.remove(keys::CATEGORY);
    }

    fn sync_capabilities(&mut self) {
        self.properties.insert(
            keys::CAPABILITIES.to_string(),
            PropertyValue::StrList(self.capabilities.iter().cloned().collect()),
        );
    }

    /// Export properties as environment variables for helpers and callouts.
    ///
    /// `info.product` becomes `HAL_PROP_INFO_PRODUCT`.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        self.properties
            .iter()
            .map(|(key, value)| {
                let name: String = key
                    .chars()
                    .map(|c| {
                        if c.is_ascii_alphanumeric() {
                            c.to_ascii_uppercase()
                        } else {
                            '_'
                        }
                    })
                    .collect();
                (format!("HAL_PROP_{}", name), value.to_env_string())
            })
            .collect()
    }

    /// Apply `key=value` lines printed by a prober or callout.
    ///
    /// Blank lines and lines starting with `#` are skipped. A value prefixed
    /// with `+` is appended to a string list instead of replacing it.
    /// Returns the number of properties written.
    pub fn apply_property_lines(&mut self, output: &str) -> usize {
        let mut applied = 0;
        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() || key == keys::UDI || key == keys::PARENT {
                continue;
            }
            let value = value.trim();
            if key == keys::CAPABILITIES {
                for cap in value.trim_start_matches('+').split(',') {
                    let cap = cap.trim().trim_matches(|c| c == '[' || c == ']');
                    if !cap.is_empty() {
                        self.add_capability(cap);
                    }
                }
            } else if let Some(item) = value.strip_prefix('+') {
                self.append_property(key, item.trim());
            } else {
                self.set_property(key, PropertyValue::parse_loose(value));
            }
            applied += 1;
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> DeviceOrigin {
        DeviceOrigin {
            kind: DeviceKind::Bus,
            identity_key: "/sys/devices/pci0000:00/0000:00:1f.2".to_string(),
            subsystem: Some("pci".to_string()),
            device_file: None,
            physical_key: None,
        }
    }

    #[test]
    fn test_new_device_sets_origin_properties() {
        let device = Device::new(origin(), Some("/org/freedesktop/Hal/devices/computer".into()));
        assert_eq!(
            device.property_str(keys::SYSFS_PATH),
            Some("/sys/devices/pci0000:00/0000:00:1f.2")
        );
        assert_eq!(device.property_str(keys::SUBSYSTEM), Some("pci"));
        assert_eq!(
            device.property_str(keys::PARENT),
            Some("/org/freedesktop/Hal/devices/computer")
        );
        assert!(!device.has_udi());
    }

    #[test]
    fn test_strip_capabilities() {
        let mut device = Device::new(origin(), None);
        device.set_category("storage");
        device.add_capability("storage");
        device.add_capability("block");
        assert_eq!(device.property_strlist(keys::CAPABILITIES).len(), 2);

        device.strip_capabilities();
        assert!(device.capabilities().is_empty());
        assert!(device.property(keys::CATEGORY).is_none());
        assert!(device.property(keys::CAPABILITIES).is_none());
    }

    #[test]
    fn test_apply_property_lines() {
        let mut device = Device::new(origin(), None);
        let applied = device.apply_property_lines(
            "# probe output\n\
             info.product = SATA controller\n\
             pci.device_class=1\n\
             info.capabilities=storage_controller\n\
             info.callouts.add=+hal-storage-setup\n\
             info.udi=/bogus\n\
             garbage line\n",
        );
        assert_eq!(applied, 4);
        assert_eq!(device.property_str(keys::PRODUCT), Some("SATA controller"));
        assert_eq!(device.property("pci.device_class"), Some(&PropertyValue::Int(1)));
        assert!(device.has_capability("storage_controller"));
        assert_eq!(
            device.property_strlist(keys::CALLOUTS_ADD),
            vec!["hal-storage-setup".to_string()]
        );
        assert!(!device.has_udi());
    }

    #[test]
    fn test_env_vars() {
        let mut device = Device::new(origin(), None);
        device.set_property("info.product", "Widget");
        let env = device.env_vars();
        assert!(env.contains(&("HAL_PROP_INFO_PRODUCT".to_string(), "Widget".to_string())));
        assert!(env.contains(&(
            "HAL_PROP_LINUX_SUBSYSTEM".to_string(),
            "pci".to_string()
        )));
    }
}
