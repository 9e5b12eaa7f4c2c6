//! Spawning external helper programs with a device's properties exported

use hal_core::Device;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Exit status and captured output of a helper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperOutput {
    /// None when the helper was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl HelperOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HelperError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Spawn(String),
}

/// Resolve a program name against the search directories.
///
/// Absolute paths are taken as-is when they exist.
pub fn resolve_program(program: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    let direct = Path::new(program);
    if direct.is_absolute() {
        return direct.exists().then(|| direct.to_path_buf());
    }
    dirs.iter()
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Run `program` with the device's `HAL_PROP_*` variables, `UDI`, and the
/// given extra variables. The child is killed if the deadline passes.
pub async fn run_with_device(
    program: &Path,
    args: &[String],
    device: &Device,
    extra_env: &[(&str, String)],
    timeout: Duration,
) -> Result<HelperOutput, HelperError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .envs(device.env_vars())
        .env("UDI", device.udi())
        .env("HALD_SYSFS_PATH", device.identity_key())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in extra_env {
        command.env(key, value);
    }

    debug!(program = %program.display(), key = %device.identity_key(), "Spawning helper");

    let child = command
        .spawn()
        .map_err(|e| HelperError::Spawn(e.to_string()))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(HelperOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(e)) => Err(HelperError::Spawn(e.to_string())),
        Err(_) => Err(HelperError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_script;
    use hal_core::{DeviceKind, DeviceOrigin};

    fn device() -> Device {
        Device::new(
            DeviceOrigin {
                kind: DeviceKind::Bus,
                identity_key: "/sys/devices/platform/serial8250".into(),
                subsystem: Some("platform".into()),
                device_file: None,
                physical_key: None,
            },
            None,
        )
    }

    #[test]
    fn test_resolve_program() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "hal-probe-serial", "exit 0");
        let dirs = vec![PathBuf::from("/nonexistent"), dir.path().to_path_buf()];

        assert_eq!(resolve_program("hal-probe-serial", &dirs), Some(script.clone()));
        assert_eq!(
            resolve_program(script.to_str().unwrap(), &[]),
            Some(script)
        );
        assert_eq!(resolve_program("missing", &dirs), None);
    }

    #[tokio::test]
    async fn test_run_exports_properties() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "echo-env",
            "echo \"subsystem=$HAL_PROP_LINUX_SUBSYSTEM\"\necho \"stage=$HALD_STAGE\"",
        );

        let output = run_with_device(
            &script,
            &[],
            &device(),
            &[("HALD_STAGE", "test".to_string())],
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(output.success());
        assert!(output.stdout.contains("subsystem=platform"));
        assert!(output.stdout.contains("stage=test"));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "hang", "sleep 30");

        let result = run_with_device(&script, &[], &device(), &[], Duration::from_millis(100)).await;
        assert!(matches!(result, Err(HelperError::Timeout(_))));
    }
}
