//! Unix socket accepting live hotplug events

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::BufReader;
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

use hal_hotplug::{source, HotplugController};

/// Accept connections forever; each one streams JSON-line events.
pub async fn serve(path: PathBuf, controller: HotplugController) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    // A previous run may have left the socket behind
    cleanup(&path);

    let listener = UnixListener::bind(&path)
        .with_context(|| format!("binding event socket {}", path.display()))?;
    info!("Listening for hotplug events on {}", path.display());

    loop {
        let (stream, _) = listener.accept().await?;
        let controller = controller.clone();
        tokio::spawn(async move {
            match source::pump(BufReader::new(stream), &controller).await {
                Ok(count) => debug!(events = count, "Event connection closed"),
                Err(e) => warn!("Event connection failed: {}", e),
            }
        });
    }
}

pub fn cleanup(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(socket = %path.display(), "Removed event socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove event socket {}: {}", path.display(), e),
    }
}
