//! Hotplug event records

use chrono::{DateTime, Utc};
use hal_core::{Device, DeviceKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type EventId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Remove,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Add => f.write_str("add"),
            Action::Remove => f.write_str("remove"),
        }
    }
}

/// One unit of work for the hotplug pipeline.
///
/// Deserializes from the live wire shape
/// `{"action", "kind", "identity_key", "device_file"?, "ordering_hint"?}`;
/// everything else is optional. `id` and `received_at` are always assigned
/// on receipt and never taken from the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotplugEvent {
    #[serde(skip_deserializing, default = "Uuid::new_v4")]
    pub id: EventId,
    pub action: Action,
    pub kind: DeviceKind,
    pub identity_key: String,
    #[serde(default)]
    pub subsystem: Option<String>,
    #[serde(default)]
    pub device_file: Option<String>,
    /// Another identity key this event relates to. Informational only:
    /// the queue never waits on it.
    #[serde(default)]
    pub ordering_hint: Option<String>,
    /// The physical device a class or block node sits on, used to find
    /// the parent.
    #[serde(default)]
    pub physical_key: Option<String>,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl HotplugEvent {
    pub fn new(action: Action, kind: DeviceKind, identity_key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            kind,
            identity_key: identity_key.into(),
            subsystem: None,
            device_file: None,
            ordering_hint: None,
            physical_key: None,
            received_at: Utc::now(),
        }
    }

    pub fn add(kind: DeviceKind, identity_key: impl Into<String>) -> Self {
        Self::new(Action::Add, kind, identity_key)
    }

    pub fn remove(kind: DeviceKind, identity_key: impl Into<String>) -> Self {
        Self::new(Action::Remove, kind, identity_key)
    }

    /// Rebuild the event that would (re)create or remove `device`
    pub fn for_device(action: Action, device: &Device) -> Self {
        let origin = device.origin();
        Self {
            subsystem: origin.subsystem.clone(),
            device_file: origin.device_file.clone(),
            physical_key: origin.physical_key.clone(),
            ..Self::new(action, origin.kind, origin.identity_key.clone())
        }
    }

    pub fn with_subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = Some(subsystem.into());
        self
    }

    pub fn with_device_file(mut self, device_file: impl Into<String>) -> Self {
        self.device_file = Some(device_file.into());
        self
    }

    pub fn with_ordering_hint(mut self, hint: impl Into<String>) -> Self {
        self.ordering_hint = Some(hint.into());
        self
    }

    pub fn with_physical_key(mut self, key: impl Into<String>) -> Self {
        self.physical_key = Some(key.into());
        self
    }

    /// Last path component of the identity key
    pub fn name(&self) -> &str {
        basename(&self.identity_key)
    }
}

impl fmt::Display for HotplugEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.action, self.kind, self.identity_key)
    }
}

pub(crate) fn basename(key: &str) -> &str {
    key.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_wire_shape() {
        let event: HotplugEvent = serde_json::from_str(
            r#"{"action":"add","kind":"class","identity_key":"/sys/class/net/eth0",
                "device_file":null,"ordering_hint":"/sys/devices/pci0000:00/0000:00:19.0"}"#,
        )
        .unwrap();
        assert_eq!(event.action, Action::Add);
        assert_eq!(event.kind, DeviceKind::Class);
        assert_eq!(event.name(), "eth0");
        assert_eq!(
            event.ordering_hint.as_deref(),
            Some("/sys/devices/pci0000:00/0000:00:19.0")
        );
        assert!(event.physical_key.is_none());
    }

    #[test]
    fn test_sender_cannot_choose_id_or_receive_time() {
        let chosen = Uuid::new_v4();
        let before = Utc::now();
        let event: HotplugEvent = serde_json::from_str(&format!(
            r#"{{"id":"{}","received_at":"2001-01-01T00:00:00Z",
                "action":"remove","kind":"block","identity_key":"/sys/block/sda"}}"#,
            chosen
        ))
        .unwrap();
        assert_ne!(event.id, chosen);
        assert!(event.received_at >= before);

        let other: HotplugEvent = serde_json::from_str(
            r#"{"action":"remove","kind":"block","identity_key":"/sys/block/sda"}"#,
        )
        .unwrap();
        assert_ne!(event.id, other.id);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let parsed = serde_json::from_str::<HotplugEvent>(
            r#"{"action":"add","kind":"firewire","identity_key":"/x"}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_display() {
        let event = HotplugEvent::remove(DeviceKind::Block, "/sys/block/sdb");
        assert_eq!(event.to_string(), "remove block /sys/block/sdb");
    }
}
