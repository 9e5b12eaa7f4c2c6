//! Configuration fragment merging
//!
//! Rules overlay properties onto a device at three points of its life:
//! before probing, and twice (information, then policy) after probing.
//! Rules are TOML files:
//!
//! ```toml
//! [[rule]]
//! stage = "information"
//! match = { "info.subsystem" = "usb", "usb.vendor_id" = 1452 }
//! merge = { "info.product" = "iPod" }
//! append = { "info.capabilities" = ["portable_audio_player"] }
//! ```

use hal_core::{Device, Error, PropertyValue, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStage {
    Preprobe,
    Information,
    Policy,
}

impl fmt::Display for MergeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStage::Preprobe => f.write_str("preprobe"),
            MergeStage::Information => f.write_str("information"),
            MergeStage::Policy => f.write_str("policy"),
        }
    }
}

/// Overlays configuration onto a device, in place
pub trait ConfigMerge: Send + Sync {
    /// Returns how many rules applied
    fn merge(&self, device: &mut Device, stage: MergeStage) -> usize;
}

/// Merges nothing
pub struct NoMerge;

impl ConfigMerge for NoMerge {
    fn merge(&self, _device: &mut Device, _stage: MergeStage) -> usize {
        0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeRule {
    pub stage: MergeStage,
    #[serde(default, rename = "match")]
    pub matches: BTreeMap<String, PropertyValue>,
    #[serde(default)]
    pub merge: BTreeMap<String, PropertyValue>,
    #[serde(default)]
    pub append: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub remove: Vec<String>,
}

impl MergeRule {
    fn matches(&self, device: &Device) -> bool {
        self.matches
            .iter()
            .all(|(key, expected)| device.property(key) == Some(expected))
    }

    fn apply(&self, device: &mut Device) {
        for key in &self.remove {
            device.remove_property(key);
        }
        for (key, value) in &self.merge {
            device.set_property(key.clone(), value.clone());
        }
        for (key, items) in &self.append {
            for item in items {
                if key == hal_core::keys::CAPABILITIES {
                    device.add_capability(item.clone());
                } else {
                    device.append_property(key, item.clone());
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default, rename = "rule")]
    rules: Vec<MergeRule>,
}

/// Applies TOML merge rules in file order
#[derive(Debug, Default)]
pub struct RuleMerger {
    rules: Vec<MergeRule>,
}

impl RuleMerger {
    pub fn new(rules: Vec<MergeRule>) -> Self {
        Self { rules }
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: RuleFile =
            toml::from_str(source).map_err(|e| Error::config(format!("invalid rules: {}", e)))?;
        Ok(Self::new(file.rules))
    }

    /// Load every `*.toml` file in `dir`, sorted by file name.
    ///
    /// A missing directory yields an empty rule set.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            debug!("Rules directory {} missing, no rules loaded", dir.display());
            return Ok(Self::default());
        }

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|ext| ext == "toml").unwrap_or(false))
            .collect();
        paths.sort();

        let mut rules = Vec::new();
        for path in &paths {
            let source = std::fs::read_to_string(path)?;
            let file: RuleFile = toml::from_str(&source)
                .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
            rules.extend(file.rules);
        }

        info!(dir = %dir.display(), files = paths.len(), rules = rules.len(), "Loaded merge rules");
        Ok(Self::new(rules))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl ConfigMerge for RuleMerger {
    fn merge(&self, device: &mut Device, stage: MergeStage) -> usize {
        let mut applied = 0;
        for rule in self.rules.iter().filter(|r| r.stage == stage) {
            if rule.matches(device) {
                rule.apply(device);
                applied += 1;
            }
        }
        if applied > 0 {
            debug!(stage = %stage, key = %device.identity_key(), applied, "Merged rules");
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal_core::{keys, DeviceKind, DeviceOrigin};

    const RULES: &str = r#"
[[rule]]
stage = "preprobe"
match = { "info.subsystem" = "input" }
merge = { "info.ignore" = true }

[[rule]]
stage = "information"
match = { "info.subsystem" = "pci" }
merge = { "info.product" = "PCI Bridge", "pci.class" = 6 }
append = { "info.capabilities" = ["bridge"], "info.callouts.add" = ["hal-pci-setup"] }

[[rule]]
stage = "policy"
match = { "info.product" = "PCI Bridge" }
remove = ["pci.class"]
"#;

    fn device(subsystem: &str) -> Device {
        Device::new(
            DeviceOrigin {
                kind: DeviceKind::Bus,
                identity_key: format!("/sys/devices/{}0", subsystem),
                subsystem: Some(subsystem.to_string()),
                device_file: None,
                physical_key: None,
            },
            None,
        )
    }

    #[test]
    fn test_stage_filtering_and_matching() {
        let merger = RuleMerger::from_toml_str(RULES).unwrap();
        assert_eq!(merger.len(), 3);

        let mut input = device("input");
        assert_eq!(merger.merge(&mut input, MergeStage::Information), 0);
        assert_eq!(merger.merge(&mut input, MergeStage::Preprobe), 1);
        assert!(input.property_bool(keys::IGNORE));

        let mut pci = device("pci");
        assert_eq!(merger.merge(&mut pci, MergeStage::Preprobe), 0);
        assert_eq!(merger.merge(&mut pci, MergeStage::Information), 1);
        assert_eq!(pci.property_str(keys::PRODUCT), Some("PCI Bridge"));
        assert_eq!(pci.property("pci.class"), Some(&PropertyValue::Int(6)));
        assert!(pci.has_capability("bridge"));
        assert_eq!(
            pci.property_strlist(keys::CALLOUTS_ADD),
            vec!["hal-pci-setup".to_string()]
        );

        assert_eq!(merger.merge(&mut pci, MergeStage::Policy), 1);
        assert!(pci.property("pci.class").is_none());
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("10-input.toml"), RULES).unwrap();
        std::fs::write(dir.path().join("README"), "not a rule").unwrap();

        let merger = RuleMerger::load_dir(dir.path()).unwrap();
        assert_eq!(merger.len(), 3);

        let missing = RuleMerger::load_dir(&dir.path().join("nope")).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_invalid_rules_are_config_errors() {
        let err = RuleMerger::from_toml_str("[[rule]]\nstage = \"later\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
