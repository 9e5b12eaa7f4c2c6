//! Build a [`TaxonomySnapshot`] from a sysfs tree
//!
//! Layout read, relative to the sysfs root:
//!
//! - `devices/...`          the physical hierarchy (real directories only)
//! - `bus/<sub>/devices/*`  symlinks to physical devices on each bus
//! - `class/<sub>/*`        class devices, `device` links back to hardware
//! - `block/*`              disks; partitions are subdirectories named after
//!   the disk
//!
//! Every key is the canonical path, so bus links, class back-links and the
//! physical tree all agree.

use hal_core::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::coldplug::{BlockNode, BusEntry, ClassNode, PhysicalNode, TaxonomySnapshot};

/// Reads the hardware taxonomy out of a sysfs mount
#[derive(Debug, Clone)]
pub struct SysfsTaxonomy {
    root: PathBuf,
}

impl SysfsTaxonomy {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the tree. Blocking; run it off the async runtime.
    pub fn scan(&self) -> Result<TaxonomySnapshot> {
        let root = fs::canonicalize(&self.root)?;
        let snapshot = TaxonomySnapshot {
            roots: scan_devices(&root.join("devices"))?,
            bus: scan_bus(&root.join("bus"))?,
            class: scan_class(&root.join("class"))?,
            block: scan_block(&root.join("block"))?,
        };
        debug!(
            root = %root.display(),
            bus = snapshot.bus.len(),
            class = snapshot.class.len(),
            block = snapshot.block.len(),
            "Scanned sysfs"
        );
        Ok(snapshot)
    }
}

fn key_of(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Entries of a directory, or nothing if it does not exist
fn entries(dir: &Path) -> Result<Vec<fs::DirEntry>> {
    match fs::read_dir(dir) {
        Ok(read) => {
            let mut all = read.collect::<std::io::Result<Vec<_>>>()?;
            all.sort_by_key(|e| e.file_name());
            Ok(all)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn resolve_link(path: &Path) -> Option<String> {
    fs::canonicalize(path).ok().map(|p| key_of(&p))
}

fn scan_devices(dir: &Path) -> Result<Vec<PhysicalNode>> {
    let mut nodes = Vec::new();
    for entry in entries(dir)? {
        let file_type = entry.file_type()?;
        if !file_type.is_dir() || file_type.is_symlink() {
            continue;
        }
        let path = entry.path();
        nodes.push(PhysicalNode {
            key: key_of(&path),
            children: scan_devices(&path)?,
        });
    }
    Ok(nodes)
}

fn scan_bus(dir: &Path) -> Result<Vec<BusEntry>> {
    let mut bus = Vec::new();
    for subsystem in entries(dir)? {
        let name = subsystem.file_name().to_string_lossy().into_owned();
        for device in entries(&subsystem.path().join("devices"))? {
            match resolve_link(&device.path()) {
                Some(key) => bus.push(BusEntry {
                    key,
                    subsystem: name.clone(),
                }),
                None => warn!("Dangling bus link: {}", device.path().display()),
            }
        }
    }
    Ok(bus)
}

fn scan_class(dir: &Path) -> Result<Vec<ClassNode>> {
    let mut class = Vec::new();
    for subsystem in entries(dir)? {
        let name = subsystem.file_name().to_string_lossy().into_owned();
        if name == "block" {
            continue;
        }
        for device in entries(&subsystem.path())? {
            let path = device.path();
            let Some(key) = resolve_link(&path) else {
                warn!("Dangling class link: {}", path.display());
                continue;
            };
            class.push(ClassNode {
                key,
                subsystem: name.clone(),
                device_link: resolve_link(&path.join("device")),
            });
        }
    }
    Ok(class)
}

fn scan_block(dir: &Path) -> Result<Vec<BlockNode>> {
    let mut block = Vec::new();
    for disk in entries(dir)? {
        let Ok(path) = fs::canonicalize(disk.path()) else {
            warn!("Dangling block link: {}", disk.path().display());
            continue;
        };
        let name = disk.file_name().to_string_lossy().into_owned();
        let listing = entries(&path)?
            .into_iter()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        block.push(BlockNode {
            key: key_of(&path),
            device_file: uevent_devname(&path).map(|dev| format!("/dev/{}", dev)),
            device_link: resolve_link(&path.join("device")),
            name,
            entries: listing,
        });
    }
    Ok(block)
}

/// `DEVNAME` from a device's uevent file
fn uevent_devname(dir: &Path) -> Option<String> {
    let uevent = fs::read_to_string(dir.join("uevent")).ok()?;
    uevent
        .lines()
        .find_map(|line| line.strip_prefix("DEVNAME="))
        .map(|name| name.trim().to_string())
}
