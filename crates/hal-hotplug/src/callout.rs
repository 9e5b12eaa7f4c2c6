//! Callout runner
//!
//! Callouts are scripts configured per device (through the
//! `info.callouts.<stage>` properties) and run on lifecycle transitions.
//! All scripts of a stage run one after another; the controller resumes
//! once the whole stage has finished.

use async_trait::async_trait;
use hal_core::{keys, Device};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::helper::{resolve_program, run_with_device, HelperError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalloutStage {
    Preprobe,
    Add,
    Remove,
}

impl CalloutStage {
    /// Property listing the scripts for this stage
    pub fn property_key(&self) -> &'static str {
        match self {
            CalloutStage::Preprobe => keys::CALLOUTS_PREPROBE,
            CalloutStage::Add => keys::CALLOUTS_ADD,
            CalloutStage::Remove => keys::CALLOUTS_REMOVE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CalloutStage::Preprobe => "preprobe",
            CalloutStage::Add => "add",
            CalloutStage::Remove => "remove",
        }
    }
}

impl fmt::Display for CalloutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs the callouts configured for a stage.
///
/// Returns once every script for the stage has finished. Callouts may
/// update the device (a preprobe callout can set `info.ignore`).
#[async_trait]
pub trait CalloutRunner: Send + Sync {
    async fn run(&self, device: &mut Device, stage: CalloutStage);
}

/// Runs nothing
pub struct NoCallouts;

#[async_trait]
impl CalloutRunner for NoCallouts {
    async fn run(&self, _device: &mut Device, _stage: CalloutStage) {}
}

/// Runs callout scripts found in the configured directories
pub struct ScriptCalloutRunner {
    dirs: Vec<PathBuf>,
    timeout: Duration,
}

impl ScriptCalloutRunner {
    pub fn new(dirs: Vec<PathBuf>, timeout: Duration) -> Self {
        Self { dirs, timeout }
    }
}

#[async_trait]
impl CalloutRunner for ScriptCalloutRunner {
    async fn run(&self, device: &mut Device, stage: CalloutStage) {
        let programs = device.property_strlist(stage.property_key());
        if programs.is_empty() {
            return;
        }

        info!(
            stage = %stage,
            key = %device.identity_key(),
            count = programs.len(),
            "Running callouts"
        );

        for name in programs {
            let Some(program) = resolve_program(&name, &self.dirs) else {
                warn!("Callout {} not found for {} stage, skipping", name, stage);
                continue;
            };

            let env = [
                ("HALD_ACTION", stage.as_str().to_string()),
                ("HALD_STAGE", stage.as_str().to_string()),
            ];
            match run_with_device(&program, &[], device, &env, self.timeout).await {
                Ok(output) => {
                    if !output.success() {
                        warn!(callout = %name, status = ?output.status, "Callout failed");
                    }
                    let applied = device.apply_property_lines(&output.stdout);
                    debug!(callout = %name, applied, "Callout finished");
                }
                Err(HelperError::Timeout(after)) => {
                    warn!("Callout {} timed out after {:?}", name, after);
                }
                Err(HelperError::Spawn(reason)) => {
                    warn!("Callout {} could not be started: {}", name, reason);
                }
            }
        }
    }
}
