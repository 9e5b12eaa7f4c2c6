//! Common types used across hald

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Well-known property keys
pub mod keys {
    pub const UDI: &str = "info.udi";
    pub const PARENT: &str = "info.parent";
    pub const SUBSYSTEM: &str = "info.subsystem";
    pub const CATEGORY: &str = "info.category";
    pub const CAPABILITIES: &str = "info.capabilities";
    pub const PRODUCT: &str = "info.product";
    pub const IGNORE: &str = "info.ignore";
    pub const PROBER: &str = "info.prober";
    pub const CALLOUTS_PREPROBE: &str = "info.callouts.preprobe";
    pub const CALLOUTS_ADD: &str = "info.callouts.add";
    pub const CALLOUTS_REMOVE: &str = "info.callouts.remove";
    pub const SYSFS_PATH: &str = "linux.sysfs_path";
    pub const LINUX_SUBSYSTEM: &str = "linux.subsystem";
    pub const DEVICE_FILE: &str = "linux.device_file";
    pub const HOTPLUG_TYPE: &str = "linux.hotplug_type";
}

/// Device-kind discriminator selecting a hotplug handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Bus,
    Class,
    Block,
    Acpi,
    Pmu,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 5] = [
        DeviceKind::Bus,
        DeviceKind::Class,
        DeviceKind::Block,
        DeviceKind::Acpi,
        DeviceKind::Pmu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Bus => "bus",
            DeviceKind::Class => "class",
            DeviceKind::Block => "block",
            DeviceKind::Acpi => "acpi",
            DeviceKind::Pmu => "pmu",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "bus" => Ok(DeviceKind::Bus),
            "class" => Ok(DeviceKind::Class),
            "block" => Ok(DeviceKind::Block),
            "acpi" => Ok(DeviceKind::Acpi),
            "pmu" => Ok(DeviceKind::Pmu),
            other => Err(crate::Error::InvalidArgument(format!(
                "unknown device kind '{}'",
                other
            ))),
        }
    }
}

/// A single typed property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i32),
    UInt64(u64),
    Double(f64),
    String(String),
    StrList(Vec<String>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_strlist(&self) -> Option<&[String]> {
        match self {
            PropertyValue::StrList(list) => Some(list),
            _ => None,
        }
    }

    /// Parse a value as printed by probers and callouts.
    ///
    /// `true`/`false` become booleans, integers fitting `i32` become `Int`,
    /// larger non-negative integers `UInt64`, decimals `Double`, and
    /// comma-separated values wrapped in `[...]` a string list.
    pub fn parse_loose(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == "true" {
            return PropertyValue::Bool(true);
        }
        if raw == "false" {
            return PropertyValue::Bool(false);
        }
        if let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            return PropertyValue::StrList(
                inner
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }
        if let Ok(i) = raw.parse::<i32>() {
            return PropertyValue::Int(i);
        }
        if let Ok(u) = raw.parse::<u64>() {
            return PropertyValue::UInt64(u);
        }
        if raw.contains('.') {
            if let Ok(d) = raw.parse::<f64>() {
                return PropertyValue::Double(d);
            }
        }
        let unquoted = raw
            .strip_prefix('\'')
            .and_then(|r| r.strip_suffix('\''))
            .unwrap_or(raw);
        PropertyValue::String(unquoted.to_string())
    }

    /// Render the value for export into a helper's environment
    pub fn to_env_string(&self) -> String {
        match self {
            PropertyValue::Bool(b) => b.to_string(),
            PropertyValue::Int(i) => i.to_string(),
            PropertyValue::UInt64(u) => u.to_string(),
            PropertyValue::Double(d) => d.to_string(),
            PropertyValue::String(s) => s.clone(),
            PropertyValue::StrList(list) => list.join("\t"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<i32> for PropertyValue {
    fn from(i: i32) -> Self {
        PropertyValue::Int(i)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(list: Vec<String>) -> Self {
        PropertyValue::StrList(list)
    }
}
