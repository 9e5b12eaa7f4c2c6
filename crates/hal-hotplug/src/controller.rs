//! Lifecycle controller
//!
//! Drives one hotplug event at a time from the queue head to either a
//! committed device or a discard:
//!
//! - Add: handler add → staging → preprobe merge → preprobe callouts →
//!   (ignored stub | prober → post-probe → info/policy merge → UDI →
//!   add callouts → commit)
//! - Remove: find committed device → handler remove → remove callouts →
//!   drop from the store
//!
//! Whatever happens, the event's gate is released exactly once and the
//! next queued event starts.

use hal_core::{keys, Device, DeviceStore, HotplugConfig};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::callout::{CalloutRunner, CalloutStage, NoCallouts};
use crate::error::{HotplugError, Result};
use crate::event::{Action, EventId, HotplugEvent};
use crate::handler::{unique_udi, Handler, HandlerRegistry};
use crate::helper::HelperError;
use crate::lifecycle::{LifecycleState, Outcome, PipelineEvent, PipelineStats};
use crate::merge::{ConfigMerge, MergeStage, NoMerge};
use crate::prober::{ProberInvoker, ProberRef, ProcessProber};
use crate::queue::EventQueue;
use crate::reprobe::reprobe_events;

/// Product name given to ignored devices
pub const IGNORED_PRODUCT: &str = "Ignored Device";

/// UDI name (below the prefix) given to ignored devices
pub const IGNORED_UDI_NAME: &str = "ignored-device";

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub probe_timeout: Duration,
    pub udi_prefix: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from(&HotplugConfig::default())
    }
}

impl From<&HotplugConfig> for ControllerConfig {
    fn from(config: &HotplugConfig) -> Self {
        Self {
            probe_timeout: config.probe_timeout,
            udi_prefix: config.udi_prefix.clone(),
        }
    }
}

/// Assembles a [`HotplugController`] from its collaborators
pub struct ControllerBuilder {
    registry: HandlerRegistry,
    merge: Arc<dyn ConfigMerge>,
    callouts: Arc<dyn CalloutRunner>,
    prober: Arc<dyn ProberInvoker>,
    store: DeviceStore,
    config: ControllerConfig,
}

impl ControllerBuilder {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            merge: Arc::new(NoMerge),
            callouts: Arc::new(NoCallouts),
            prober: Arc::new(ProcessProber::new(Vec::new())),
            store: DeviceStore::permanent(),
            config: ControllerConfig::default(),
        }
    }

    pub fn merge(mut self, merge: Arc<dyn ConfigMerge>) -> Self {
        self.merge = merge;
        self
    }

    pub fn callouts(mut self, callouts: Arc<dyn CalloutRunner>) -> Self {
        self.callouts = callouts;
        self
    }

    pub fn prober(mut self, prober: Arc<dyn ProberInvoker>) -> Self {
        self.prober = prober;
        self
    }

    /// Use an existing permanent store
    pub fn store(mut self, store: DeviceStore) -> Self {
        self.store = store;
        self
    }

    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> HotplugController {
        let (events, _) = broadcast::channel(1024);
        let (idle, _) = watch::channel(true);
        HotplugController {
            inner: Arc::new(Inner {
                registry: self.registry,
                merge: self.merge,
                callouts: self.callouts,
                prober: self.prober,
                store: self.store,
                staging: DeviceStore::staging(),
                config: self.config,
                shared: Mutex::new(Shared::default()),
                idle,
                events,
            }),
        }
    }
}

#[derive(Default)]
struct Shared {
    queue: EventQueue,
    stats: PipelineStats,
}

struct Inner {
    registry: HandlerRegistry,
    merge: Arc<dyn ConfigMerge>,
    callouts: Arc<dyn CalloutRunner>,
    prober: Arc<dyn ProberInvoker>,
    store: DeviceStore,
    staging: DeviceStore,
    config: ControllerConfig,
    shared: Mutex<Shared>,
    idle: watch::Sender<bool>,
    events: broadcast::Sender<PipelineEvent>,
}

/// Handle to the hotplug pipeline. Cheap to clone; all clones share one
/// queue.
#[derive(Clone)]
pub struct HotplugController {
    inner: Arc<Inner>,
}

impl HotplugController {
    pub fn builder(registry: HandlerRegistry) -> ControllerBuilder {
        ControllerBuilder::new(registry)
    }

    /// The permanent, client-visible device list
    pub fn store(&self) -> &DeviceStore {
        &self.inner.store
    }

    /// Devices currently being built
    pub fn staging(&self) -> &DeviceStore {
        &self.inner.staging
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> PipelineStats {
        self.lock().stats
    }

    pub fn in_flight(&self) -> Option<EventId> {
        self.lock().queue.in_flight()
    }

    pub fn pending(&self) -> usize {
        self.lock().queue.pending()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: PipelineEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Append an event to the queue tail. Does not start processing.
    pub fn enqueue(&self, event: HotplugEvent) {
        let id = event.id;
        {
            let mut shared = self.lock();
            debug!(id = %id, event = %event, "Enqueued hotplug event");
            shared.queue.push(event);
            shared.stats.enqueued += 1;
            self.inner.idle.send_replace(false);
        }
        self.publish(PipelineEvent::Enqueued { id });
    }

    /// Enqueue a batch in order, returning how many were added
    pub fn enqueue_all(&self, events: impl IntoIterator<Item = HotplugEvent>) -> usize {
        events.into_iter().fold(0, |count, event| {
            self.enqueue(event);
            count + 1
        })
    }

    /// Enqueue and kick the queue
    pub fn submit(&self, event: HotplugEvent) {
        self.enqueue(event);
        self.process_queue();
    }

    /// Start the head event if nothing is in flight. Safe to call at any
    /// time and any number of times. Must run inside a Tokio runtime.
    pub fn process_queue(&self) {
        let event = {
            let mut shared = self.lock();
            match shared.queue.try_begin() {
                Some(event) => {
                    shared.stats.started += 1;
                    event
                }
                None => {
                    if shared.queue.is_idle() {
                        self.inner.idle.send_replace(true);
                    }
                    return;
                }
            }
        };

        self.publish(PipelineEvent::Started {
            id: event.id,
            action: event.action,
            kind: event.kind,
            identity_key: event.identity_key.clone(),
        });

        let gate = Gate {
            controller: self.clone(),
            id: event.id,
            staged_key: event.identity_key.clone(),
            outcome: None,
        };
        let controller = self.clone();
        tokio::spawn(async move {
            let outcome = controller.drive(&event).await;
            gate.finish(outcome);
        });
    }

    /// Resolve once the queue is empty and nothing is in flight
    pub async fn wait_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        let _ = idle.wait_for(|idle| *idle).await;
    }

    /// Kick the queue and wait for it to drain
    pub async fn run_until_idle(&self) {
        self.process_queue();
        self.wait_idle().await;
    }

    /// Release the gate for `id`, record the outcome, and start the next event.
    fn end(&self, id: EventId, outcome: Outcome) {
        if self.release(id, outcome) {
            self.process_queue();
        }
    }

    fn release(&self, id: EventId, outcome: Outcome) -> bool {
        {
            let mut shared = self.lock();
            if !shared.queue.finish(id) {
                error!(id = %id, "Released an event that was not in flight");
                return false;
            }
            shared.stats.record(&outcome);
        }
        self.publish(PipelineEvent::Ended { id, outcome });
        true
    }

    fn transition(&self, event: &HotplugEvent, state: LifecycleState) {
        debug!(id = %event.id, state = %state, "Lifecycle transition");
        self.publish(PipelineEvent::StateChanged { id: event.id, state });
    }

    #[instrument(
        name = "hotplug_event",
        skip(self, event),
        fields(id = %event.id, action = %event.action, kind = %event.kind, key = %event.identity_key)
    )]
    async fn drive(&self, event: &HotplugEvent) -> Outcome {
        if let Some(hint) = &event.ordering_hint {
            debug!(hint = %hint, "Event carries ordering hint");
        }

        let outcome = match event.action {
            Action::Add => self.run_add(event).await,
            Action::Remove => self.run_remove(event).await,
        };
        self.transition(event, outcome.final_state());

        match &outcome {
            Outcome::Committed { udi } => info!(udi = %udi, "Device committed"),
            Outcome::Ignored { udi } => info!(udi = %udi, "Device ignored, kept as stub"),
            Outcome::Removed { udi } => info!(udi = %udi, "Device removed"),
            Outcome::Discarded(HotplugError::HandlerRejected(_)) => {
                debug!("Handler declined device")
            }
            Outcome::Discarded(err) => warn!(error = %err, "Event discarded"),
        }
        outcome
    }

    async fn run_add(&self, event: &HotplugEvent) -> Outcome {
        let Some(handler) = self.inner.registry.get(event.kind) else {
            return Outcome::Discarded(HotplugError::NoHandler(event.kind));
        };
        if self.inner.store.find_by_key(&event.identity_key).await.is_some() {
            return Outcome::Discarded(HotplugError::AlreadyPresent(event.identity_key.clone()));
        }

        self.transition(event, LifecycleState::Start);
        let parent = self.resolve_parent(event).await;
        let Some(device) = handler.add(event, parent.as_ref()).await else {
            return Outcome::Discarded(HotplugError::HandlerRejected(event.identity_key.clone()));
        };

        self.inner.staging.put(&event.identity_key, device.clone()).await;
        match self.build_staged(event, handler.as_ref(), device).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.inner.staging.remove(&event.identity_key).await;
                Outcome::Discarded(err)
            }
        }
    }

    async fn build_staged(
        &self,
        event: &HotplugEvent,
        handler: &dyn Handler,
        mut device: Device,
    ) -> Result<Outcome> {
        let key = event.identity_key.as_str();

        self.transition(event, LifecycleState::PreprobeMerge);
        self.inner.merge.merge(&mut device, MergeStage::Preprobe);
        self.stage(key, &device).await;

        self.transition(event, LifecycleState::PreprobeCallout);
        self.inner
            .callouts
            .run(&mut device, CalloutStage::Preprobe)
            .await;
        self.stage(key, &device).await;

        if device.property_bool(keys::IGNORE) {
            return self.commit_ignored(key, device).await;
        }

        if let Some(prober) = handler.get_prober(&device) {
            self.transition(event, LifecycleState::ProbeHelper);
            self.run_prober(&prober, &mut device).await?;
            self.stage(key, &device).await;
        }

        self.transition(event, LifecycleState::Postprobe);
        if !handler.post_probe(&mut device).await {
            return Err(HotplugError::PostProbeRejected(key.to_string()));
        }

        self.transition(event, LifecycleState::InfoMerge);
        self.inner.merge.merge(&mut device, MergeStage::Information);
        self.inner.merge.merge(&mut device, MergeStage::Policy);
        self.stage(key, &device).await;

        self.transition(event, LifecycleState::ComputeUdi);
        if !handler.compute_udi(&mut device, &self.inner.store).await || !device.has_udi() {
            return Err(HotplugError::UdiCollision(key.to_string()));
        }
        if self.inner.store.contains(device.udi()).await {
            warn!(udi = %device.udi(), "Handler produced a UDI that is already taken");
            return Err(HotplugError::UdiCollision(device.udi().to_string()));
        }
        self.stage(key, &device).await;

        self.transition(event, LifecycleState::CommitCallout);
        self.inner.callouts.run(&mut device, CalloutStage::Add).await;

        let udi = device.udi().to_string();
        self.commit(key, device).await?;
        Ok(Outcome::Committed { udi })
    }

    /// Keep the staged copy in step with the working copy
    async fn stage(&self, key: &str, device: &Device) {
        self.inner.staging.put(key, device.clone()).await;
    }

    async fn commit(&self, staged_key: &str, device: Device) -> Result<()> {
        self.inner.staging.remove(staged_key).await;
        self.inner.store.add(device).await?;
        Ok(())
    }

    async fn commit_ignored(&self, staged_key: &str, mut device: Device) -> Result<Outcome> {
        device.strip_capabilities();
        device.set_property(keys::PRODUCT, IGNORED_PRODUCT);

        let base = format!("{}/{}", self.inner.config.udi_prefix, IGNORED_UDI_NAME);
        let Some(udi) = unique_udi(&self.inner.store, &base).await else {
            return Err(HotplugError::UdiCollision(base));
        };
        device.set_udi(udi.clone());

        self.commit(staged_key, device).await?;
        Ok(Outcome::Ignored { udi })
    }

    async fn run_prober(&self, prober: &ProberRef, device: &mut Device) -> Result<()> {
        let timeout = self.inner.config.probe_timeout;
        let program = prober.program.clone();

        let result = tokio::time::timeout(
            timeout,
            self.inner.prober.run_helper(prober, device, timeout),
        )
        .await;

        match result {
            Err(_) | Ok(Err(HelperError::Timeout(_))) => {
                Err(HotplugError::probe_timeout(program.as_str(), timeout))
            }
            Ok(Err(HelperError::Spawn(reason))) => Err(HotplugError::ProbeSpawn {
                program: program.clone(),
                reason,
            }),
            Ok(Ok(output)) if output.success() => {
                let applied = device.apply_property_lines(&output.stdout);
                debug!(program = %program, applied, "Prober succeeded");
                Ok(())
            }
            Ok(Ok(output)) => Err(HotplugError::ProbeFailure {
                program: program.clone(),
                status: output.status,
            }),
        }
    }

    async fn run_remove(&self, event: &HotplugEvent) -> Outcome {
        let Some(mut device) = self.inner.store.find_by_key(&event.identity_key).await else {
            return Outcome::Discarded(HotplugError::NotFound(event.identity_key.clone()));
        };
        let Some(handler) = self.inner.registry.get(device.kind()) else {
            return Outcome::Discarded(HotplugError::NoHandler(device.kind()));
        };
        let udi = device.udi().to_string();

        self.transition(event, LifecycleState::RemoveHandler);
        if !handler.remove(&device).await {
            return Outcome::Discarded(HotplugError::RemoveRejected(udi));
        }

        self.transition(event, LifecycleState::RemoveCallout);
        self.inner
            .callouts
            .run(&mut device, CalloutStage::Remove)
            .await;

        match self.inner.store.remove(&udi).await {
            Some(_) => Outcome::Removed { udi },
            None => Outcome::Discarded(HotplugError::NotFound(udi)),
        }
    }

    /// The committed device an event hangs under: its physical device if it
    /// names one, otherwise the nearest committed ancestor by identity key.
    async fn resolve_parent(&self, event: &HotplugEvent) -> Option<Device> {
        if let Some(physical) = &event.physical_key {
            if let Some(device) = self.inner.store.find_by_key(physical).await {
                return Some(device);
            }
        }

        let mut path = event.identity_key.trim_end_matches('/');
        while let Some((head, _)) = path.rsplit_once('/') {
            if head.is_empty() {
                break;
            }
            if let Some(device) = self.inner.store.find_by_key(head).await {
                return Some(device);
            }
            path = head;
        }
        None
    }

    /// Queue Remove events for `udi` and everything below it (deepest
    /// first), then Add events for the same subtree (root first), and kick
    /// the queue. Returns the number of events queued.
    pub async fn reprobe_tree(&self, udi: &str) -> usize {
        let Some(root) = self.inner.store.find(udi).await else {
            warn!("Reprobe requested for unknown device {}", udi);
            return 0;
        };

        let events = reprobe_events(&self.inner.store, &root).await;
        info!(udi = %udi, events = events.len(), "Reprobing device tree");
        let count = self.enqueue_all(events);
        self.process_queue();
        count
    }

    /// Let the owning handler refresh a committed device in place,
    /// bypassing the lifecycle.
    pub async fn rescan(&self, udi: &str) -> bool {
        let Some(mut device) = self.inner.store.find(udi).await else {
            warn!("Rescan requested for unknown device {}", udi);
            return false;
        };
        let Some(handler) = self.inner.registry.get(device.kind()) else {
            return false;
        };
        if !handler.refresh(&mut device).await {
            debug!(udi = %udi, "Handler has nothing to refresh");
            return false;
        }
        match self.inner.store.update(device).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Rescan could not update {}: {}", udi, e);
                false
            }
        }
    }
}

/// Holds the in-flight slot for one event. Dropping it releases the slot,
/// so the queue moves on even if the driving task dies.
struct Gate {
    controller: HotplugController,
    id: EventId,
    staged_key: String,
    outcome: Option<Outcome>,
}

impl Gate {
    fn finish(mut self, outcome: Outcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        if let Some(outcome) = self.outcome.take() {
            self.controller.end(self.id, outcome);
            return;
        }

        error!(id = %self.id, key = %self.staged_key, "Hotplug event aborted mid-flight");
        let controller = self.controller.clone();
        let id = self.id;
        let staged_key = std::mem::take(&mut self.staged_key);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    controller.inner.staging.remove(&staged_key).await;
                    controller.end(id, Outcome::Discarded(HotplugError::Aborted));
                });
            }
            Err(_) => {
                controller.release(id, Outcome::Discarded(HotplugError::Aborted));
            }
        }
    }
}
