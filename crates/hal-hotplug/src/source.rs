//! Live hotplug events as JSON lines

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use crate::controller::HotplugController;
use crate::event::HotplugEvent;

/// Feed every event read from `reader` to the controller until EOF.
///
/// Blank lines are skipped, malformed ones logged and skipped. Returns the
/// number of events submitted.
pub async fn pump<R>(reader: R, controller: &HotplugController) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut submitted = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<HotplugEvent>(line) {
            Ok(event) => {
                debug!(event = %event, "Received live hotplug event");
                controller.submit(event);
                submitted += 1;
            }
            Err(e) => warn!(error = %e, line, "Ignoring malformed hotplug event"),
        }
    }
    Ok(submitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generic::GenericHandler;
    use hal_core::DEFAULT_UDI_PREFIX;

    #[tokio::test]
    async fn test_pump_submits_valid_lines() {
        let controller =
            HotplugController::builder(GenericHandler::default_registry(DEFAULT_UDI_PREFIX)).build();
        let input = concat!(
            r#"{"action": "add", "kind": "bus", "identity_key": "/d/pci0/00:1.0", "subsystem": "pci"}"#,
            "\n",
            "\n",
            "not json\n",
            r#"{"action": "add", "kind": "class", "identity_key": "/d/pci0/00:1.0/net/eth0", "subsystem": "net"}"#,
            "\n",
        );

        let count = pump(input.as_bytes(), &controller).await.unwrap();
        assert_eq!(count, 2);

        controller.wait_idle().await;
        assert_eq!(controller.store().len().await, 2);
        let eth0 = controller
            .store()
            .find_by_key("/d/pci0/00:1.0/net/eth0")
            .await
            .unwrap();
        let pci = controller.store().find_by_key("/d/pci0/00:1.0").await.unwrap();
        assert_eq!(eth0.parent_udi(), Some(pci.udi()));
    }
}
