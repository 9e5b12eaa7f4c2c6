//! Reasons a hotplug event ends without committing a device

use hal_core::DeviceKind;
use std::time::Duration;
use thiserror::Error;

/// Why an event was discarded.
///
/// None of these escape the controller: each one ends its event, destroys
/// any staged device and lets the queue move on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HotplugError {
    #[error("no handler registered for kind '{0}'")]
    NoHandler(DeviceKind),

    #[error("handler declined device {0}")]
    HandlerRejected(String),

    #[error("device for {0} is already committed")]
    AlreadyPresent(String),

    #[error("no committed device for {0}")]
    NotFound(String),

    #[error("prober {program} exited with status {status:?}")]
    ProbeFailure {
        program: String,
        status: Option<i32>,
    },

    #[error("prober {program} timed out after {timeout_ms}ms")]
    ProbeTimeout { program: String, timeout_ms: u64 },

    #[error("failed to spawn prober {program}: {reason}")]
    ProbeSpawn { program: String, reason: String },

    #[error("post-probe rejected device {0}")]
    PostProbeRejected(String),

    #[error("could not compute a free UDI for {0}")]
    UdiCollision(String),

    #[error("handler refused to remove {0}")]
    RemoveRejected(String),

    #[error("device store error: {0}")]
    Store(String),

    #[error("event processing aborted")]
    Aborted,
}

impl HotplugError {
    pub fn probe_timeout(program: impl Into<String>, timeout: Duration) -> Self {
        HotplugError::ProbeTimeout {
            program: program.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl From<hal_core::Error> for HotplugError {
    fn from(err: hal_core::Error) -> Self {
        HotplugError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HotplugError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_timeout_saturates() {
        assert_eq!(
            HotplugError::probe_timeout("hal-probe-storage", Duration::from_millis(1500)),
            HotplugError::ProbeTimeout {
                program: "hal-probe-storage".to_string(),
                timeout_ms: 1500,
            }
        );
        assert!(matches!(
            HotplugError::probe_timeout("hal-probe-storage", Duration::MAX),
            HotplugError::ProbeTimeout { timeout_ms: u64::MAX, .. }
        ));
    }
}
