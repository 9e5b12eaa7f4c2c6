//! Hotplug pipeline for hald
//!
//! Turns hardware add/remove events into committed devices, one event at a
//! time.
//!
//! # Modules
//!
//! - `event`: Hotplug event records and the inbound wire shape
//! - `queue`: FIFO queue with a single in-flight gate
//! - `controller`: Lifecycle controller (probe, merge, commit, discard)
//! - `handler`: Per-kind `Handler` trait and registry
//! - `generic`: Data-driven handler covering the stock device kinds
//! - `merge`: Configuration merge stages and the TOML rule merger
//! - `callout`: Callout script runner
//! - `prober`: Prober helper invocation
//! - `coldplug`: Ordered Add events for hardware present at startup
//! - `sysfs`: Hardware taxonomy scanner
//! - `reprobe`: Subtree re-discovery
//! - `source`: JSON-lines live event reader
//!
//! # Example
//!
//! ```ignore
//! use hal_hotplug::{GenericHandler, HotplugController, HotplugEvent};
//! use hal_core::{DeviceKind, DEFAULT_UDI_PREFIX};
//!
//! let controller =
//!     HotplugController::builder(GenericHandler::default_registry(DEFAULT_UDI_PREFIX)).build();
//! controller.submit(HotplugEvent::add(DeviceKind::Bus, "/sys/devices/pci0000:00/0000:00:1f.2"));
//! controller.wait_idle().await;
//! ```

pub mod callout;
pub mod coldplug;
pub mod controller;
pub mod error;
pub mod event;
pub mod generic;
pub mod handler;
pub mod helper;
pub mod lifecycle;
pub mod merge;
pub mod prober;
pub mod queue;
pub mod reprobe;
pub mod source;
pub mod sysfs;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports
pub use callout::{CalloutRunner, CalloutStage, NoCallouts, ScriptCalloutRunner};
pub use coldplug::{coldplug_events, BlockNode, BusEntry, ClassNode, PhysicalNode, TaxonomySnapshot};
pub use controller::{ControllerBuilder, ControllerConfig, HotplugController};
pub use error::{HotplugError, Result};
pub use event::{Action, EventId, HotplugEvent};
pub use generic::{GenericHandler, KindSpec};
pub use handler::{Handler, HandlerRegistry};
pub use lifecycle::{LifecycleState, Outcome, PipelineEvent, PipelineStats};
pub use merge::{ConfigMerge, MergeRule, MergeStage, NoMerge, RuleMerger};
pub use prober::{ProbeError, ProbeOutput, ProberInvoker, ProberRef, ProcessProber};
pub use sysfs::SysfsTaxonomy;
