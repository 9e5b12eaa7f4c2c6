//! Prober invocation
//!
//! A prober is an external helper run once per device, before the device
//! is finalized, to pull out extra properties. It prints `key=value` lines
//! on stdout and signals success with exit status 0.

use async_trait::async_trait;
use hal_core::Device;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::helper::{resolve_program, run_with_device, HelperError, HelperOutput};

/// A prober a handler wants run for a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProberRef {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ProberRef {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

pub type ProbeOutput = HelperOutput;
pub type ProbeError = HelperError;

/// Runs prober helpers
#[async_trait]
pub trait ProberInvoker: Send + Sync {
    async fn run_helper(
        &self,
        prober: &ProberRef,
        device: &Device,
        timeout: Duration,
    ) -> Result<ProbeOutput, ProbeError>;
}

/// Spawns probers as child processes
pub struct ProcessProber {
    search_dirs: Vec<PathBuf>,
}

impl ProcessProber {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }
}

#[async_trait]
impl ProberInvoker for ProcessProber {
    async fn run_helper(
        &self,
        prober: &ProberRef,
        device: &Device,
        timeout: Duration,
    ) -> Result<ProbeOutput, ProbeError> {
        let program = resolve_program(&prober.program, &self.search_dirs).ok_or_else(|| {
            HelperError::Spawn(format!("{} not found in search path", prober.program))
        })?;

        let output = run_with_device(
            &program,
            &prober.args,
            device,
            &[
                ("HALD_ACTION", "add".to_string()),
                ("HALD_HELPER_TIMEOUT_MS", timeout.as_millis().to_string()),
            ],
            timeout,
        )
        .await?;

        if !output.stderr.is_empty() {
            debug!(program = %prober.program, stderr = %output.stderr.trim_end(), "Prober stderr");
        }
        Ok(output)
    }
}
