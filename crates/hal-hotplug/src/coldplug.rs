//! Coldplug: synthesize Add events for hardware present at startup
//!
//! The enumerator works on a [`TaxonomySnapshot`], a plain-data picture of
//! the hardware tree, so ordering can be decided (and tested) without
//! touching a real sysfs. [`crate::sysfs::SysfsTaxonomy`] builds one from
//! disk.
//!
//! Order produced:
//! 1. depth-first over the physical tree, each node's bus event, then its
//!    class devices, then its children
//! 2. bus and class entries whose physical node was not in the tree
//! 3. class devices with no physical back-link
//! 4. block devices (each disk followed by its partitions), device-mapper
//!    devices last

use hal_core::DeviceKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::event::HotplugEvent;

/// A node of the physical device tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalNode {
    pub key: String,
    #[serde(default)]
    pub children: Vec<PhysicalNode>,
}

impl PhysicalNode {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: PhysicalNode) -> Self {
        self.children.push(child);
        self
    }
}

/// A physical device listed under a bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusEntry {
    pub key: String,
    pub subsystem: String,
}

/// A class device, optionally backed by a physical device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassNode {
    pub key: String,
    pub subsystem: String,
    #[serde(default)]
    pub device_link: Option<String>,
}

/// A top-level block device and the names found in its directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockNode {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub device_link: Option<String>,
    #[serde(default)]
    pub device_file: Option<String>,
    #[serde(default)]
    pub entries: Vec<String>,
}

impl BlockNode {
    pub fn is_device_mapper(&self) -> bool {
        self.name.starts_with("dm-")
    }

    /// Directory entries that are partitions of this device
    pub fn partitions(&self) -> Vec<&str> {
        let mut parts: Vec<&str> = self
            .entries
            .iter()
            .map(String::as_str)
            .filter(|entry| entry.len() > self.name.len() && entry.starts_with(self.name.as_str()))
            .collect();
        parts.sort_unstable();
        parts
    }
}

/// Everything coldplug needs to know about the hardware present
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomySnapshot {
    #[serde(default)]
    pub roots: Vec<PhysicalNode>,
    #[serde(default)]
    pub bus: Vec<BusEntry>,
    #[serde(default)]
    pub class: Vec<ClassNode>,
    #[serde(default)]
    pub block: Vec<BlockNode>,
}

struct Walk<'a> {
    bus: BTreeMap<&'a str, &'a str>,
    class: BTreeMap<&'a str, Vec<&'a ClassNode>>,
    emitted: BTreeSet<String>,
    events: Vec<HotplugEvent>,
}

impl Walk<'_> {
    fn emit(&mut self, event: HotplugEvent) {
        if self.emitted.insert(event.identity_key.clone()) {
            self.events.push(event);
        } else {
            debug!(key = %event.identity_key, "Skipping duplicate coldplug entry");
        }
    }

    fn emit_bus(&mut self, key: &str, subsystem: &str) {
        self.emit(HotplugEvent::add(DeviceKind::Bus, key).with_subsystem(subsystem));
    }

    fn emit_class(&mut self, node: &ClassNode) {
        let mut event = HotplugEvent::add(DeviceKind::Class, &node.key).with_subsystem(&node.subsystem);
        if let Some(device) = &node.device_link {
            event = event.with_physical_key(device).with_ordering_hint(device);
        }
        self.emit(event);
    }

    fn visit(&mut self, node: &PhysicalNode) {
        if let Some(subsystem) = self.bus.remove(node.key.as_str()) {
            self.emit_bus(&node.key, subsystem);
        }
        if let Some(class_nodes) = self.class.remove(node.key.as_str()) {
            for class_node in class_nodes {
                self.emit_class(class_node);
            }
        }

        let mut children: Vec<&PhysicalNode> = node.children.iter().collect();
        children.sort_by(|a, b| a.key.cmp(&b.key));
        for child in children {
            self.visit(child);
        }
    }
}

/// The ordered Add events for every device in `snapshot`
pub fn coldplug_events(snapshot: &TaxonomySnapshot) -> Vec<HotplugEvent> {
    let mut walk = Walk {
        bus: snapshot
            .bus
            .iter()
            .map(|b| (b.key.as_str(), b.subsystem.as_str()))
            .collect(),
        class: BTreeMap::new(),
        emitted: BTreeSet::new(),
        events: Vec::new(),
    };

    let mut detached: Vec<&ClassNode> = Vec::new();
    for node in &snapshot.class {
        match &node.device_link {
            Some(device) => walk.class.entry(device.as_str()).or_default().push(node),
            None => detached.push(node),
        }
    }
    for nodes in walk.class.values_mut() {
        nodes.sort_by(|a, b| a.key.cmp(&b.key));
    }

    let mut roots: Vec<&PhysicalNode> = snapshot.roots.iter().collect();
    roots.sort_by(|a, b| a.key.cmp(&b.key));
    for root in roots {
        walk.visit(root);
    }

    // Physical nodes the tree walk never reached
    let leftover_bus: Vec<(&str, &str)> = std::mem::take(&mut walk.bus).into_iter().collect();
    for (key, subsystem) in leftover_bus {
        walk.emit_bus(key, subsystem);
    }
    let leftover_class: Vec<&ClassNode> = std::mem::take(&mut walk.class)
        .into_values()
        .flatten()
        .collect();
    for node in leftover_class {
        walk.emit_class(node);
    }

    detached.sort_by(|a, b| a.key.cmp(&b.key));
    for node in detached {
        walk.emit_class(node);
    }

    let mut block: Vec<&BlockNode> = snapshot.block.iter().collect();
    block.sort_by(|a, b| a.name.cmp(&b.name));
    let (mapped, plain): (Vec<&BlockNode>, Vec<&BlockNode>) =
        block.into_iter().partition(|b| b.is_device_mapper());
    for disk in plain.into_iter().chain(mapped) {
        emit_block(&mut walk, disk);
    }

    debug!(events = walk.events.len(), "Coldplug enumeration complete");
    walk.events
}

fn emit_block(walk: &mut Walk<'_>, disk: &BlockNode) {
    let device_file = disk
        .device_file
        .clone()
        .unwrap_or_else(|| format!("/dev/{}", disk.name));
    let mut event = HotplugEvent::add(DeviceKind::Block, &disk.key)
        .with_subsystem("block")
        .with_device_file(device_file);
    if let Some(device) = &disk.device_link {
        event = event.with_physical_key(device).with_ordering_hint(device);
    }
    walk.emit(event);

    for part in disk.partitions() {
        let key = format!("{}/{}", disk.key.trim_end_matches('/'), part);
        walk.emit(
            HotplugEvent::add(DeviceKind::Block, key)
                .with_subsystem("block")
                .with_device_file(format!("/dev/{}", part))
                .with_ordering_hint(&disk.key),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(key: &str, subsystem: &str) -> BusEntry {
        BusEntry {
            key: key.to_string(),
            subsystem: subsystem.to_string(),
        }
    }

    fn class(key: &str, subsystem: &str, device: Option<&str>) -> ClassNode {
        ClassNode {
            key: key.to_string(),
            subsystem: subsystem.to_string(),
            device_link: device.map(str::to_string),
        }
    }

    fn disk(name: &str, entries: &[&str]) -> BlockNode {
        BlockNode {
            key: format!("/sys/block/{}", name),
            name: name.to_string(),
            device_link: None,
            device_file: None,
            entries: entries.iter().map(|e| e.to_string()).collect(),
        }
    }

    fn sample() -> TaxonomySnapshot {
        TaxonomySnapshot {
            roots: vec![PhysicalNode::new("/d/pci0")
                .with_child(
                    PhysicalNode::new("/d/pci0/00:1f.2")
                        .with_child(PhysicalNode::new("/d/pci0/00:1f.2/host0")),
                )
                .with_child(PhysicalNode::new("/d/pci0/00:1.0"))],
            bus: vec![
                bus("/d/pci0/00:1.0", "pci"),
                bus("/d/pci0/00:1f.2", "pci"),
                bus("/d/pci0/00:1f.2/host0", "scsi"),
                bus("/d/platform/serial8250", "platform"),
            ],
            class: vec![
                class("/d/pci0/00:1.0/net/eth0", "net", Some("/d/pci0/00:1.0")),
                class("/d/virtual/net/lo", "net", None),
                class("/d/pci0/00:1f.2/host0/scsi_host/host0", "scsi_host", Some("/d/pci0/00:1f.2/host0")),
            ],
            block: vec![
                disk("dm-0", &["holders", "slaves"]),
                disk("sda", &["sda1", "sda2", "queue", "holders"]),
                disk("loop0", &[]),
            ],
        }
    }

    fn position(events: &[HotplugEvent], key: &str) -> usize {
        events
            .iter()
            .position(|e| e.identity_key == key)
            .unwrap_or_else(|| panic!("{} not emitted", key))
    }

    #[test]
    fn test_ancestors_precede_descendants() {
        let events = coldplug_events(&sample());

        let pci = position(&events, "/d/pci0/00:1f.2");
        let host = position(&events, "/d/pci0/00:1f.2/host0");
        let scsi_host = position(&events, "/d/pci0/00:1f.2/host0/scsi_host/host0");
        assert!(pci < host && host < scsi_host);

        let nic = position(&events, "/d/pci0/00:1.0");
        let eth0 = position(&events, "/d/pci0/00:1.0/net/eth0");
        assert!(nic < eth0);
        assert_eq!(events[eth0].kind, DeviceKind::Class);
        assert_eq!(events[eth0].physical_key.as_deref(), Some("/d/pci0/00:1.0"));
    }

    #[test]
    fn test_every_device_exactly_once() {
        let events = coldplug_events(&sample());
        let keys: BTreeSet<&str> = events.iter().map(|e| e.identity_key.as_str()).collect();
        assert_eq!(keys.len(), events.len());
        // 4 bus + 3 class + 3 disks + 2 partitions
        assert_eq!(events.len(), 12);
        assert!(keys.contains("/d/platform/serial8250"));
        assert!(keys.contains("/d/virtual/net/lo"));
    }

    #[test]
    fn test_partitions_follow_disk_and_device_mapper_last() {
        let events = coldplug_events(&sample());
        let blocks: Vec<&str> = events
            .iter()
            .filter(|e| e.kind == DeviceKind::Block)
            .map(|e| e.identity_key.as_str())
            .collect();
        assert_eq!(
            blocks,
            vec![
                "/sys/block/loop0",
                "/sys/block/sda",
                "/sys/block/sda/sda1",
                "/sys/block/sda/sda2",
                "/sys/block/dm-0",
            ]
        );

        let sda1 = &events[position(&events, "/sys/block/sda/sda1")];
        assert_eq!(sda1.device_file.as_deref(), Some("/dev/sda1"));
        assert_eq!(sda1.ordering_hint.as_deref(), Some("/sys/block/sda"));
    }

    #[test]
    fn test_deterministic_for_shuffled_input() {
        let mut shuffled = sample();
        shuffled.bus.reverse();
        shuffled.class.reverse();
        shuffled.block.reverse();
        shuffled.roots[0].children.reverse();

        let a: Vec<String> = coldplug_events(&sample()).into_iter().map(|e| e.identity_key).collect();
        let b: Vec<String> = coldplug_events(&shuffled).into_iter().map(|e| e.identity_key).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_snapshot_deserializes_with_defaults() {
        let snapshot: TaxonomySnapshot = serde_json::from_str(
            r#"{"bus": [{"key": "/d/acpi/PNP0C0A:00", "subsystem": "acpi"}]}"#,
        )
        .unwrap();
        let events = coldplug_events(&snapshot);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subsystem.as_deref(), Some("acpi"));
    }
}
