//! Re-discovery of a committed subtree

use hal_core::{Device, DeviceStore};
use std::collections::BTreeMap;

use crate::event::{Action, HotplugEvent};

/// Events that tear down `root` and its committed descendants and then
/// rediscover them.
///
/// Removes come deepest first with `root` last; adds come `root` first
/// with every parent before its children. Siblings are ordered by UDI.
pub async fn reprobe_events(store: &DeviceStore, root: &Device) -> Vec<HotplugEvent> {
    let mut children: BTreeMap<String, Vec<Device>> = BTreeMap::new();
    let mut frontier = vec![root.udi().to_string()];
    while let Some(udi) = frontier.pop() {
        let mut kids = store.children_of(&udi).await;
        kids.sort_by(|a, b| a.udi().cmp(b.udi()));
        frontier.extend(kids.iter().map(|d| d.udi().to_string()));
        children.insert(udi, kids);
    }

    let mut removes = Vec::new();
    post_order(root, &children, &mut removes);

    let mut adds = Vec::new();
    pre_order(root, None, &children, &mut adds);

    removes.into_iter().chain(adds).collect()
}

fn post_order(device: &Device, children: &BTreeMap<String, Vec<Device>>, out: &mut Vec<HotplugEvent>) {
    for child in children.get(device.udi()).into_iter().flatten() {
        post_order(child, children, out);
    }
    out.push(HotplugEvent::for_device(Action::Remove, device));
}

fn pre_order(
    device: &Device,
    parent_key: Option<&str>,
    children: &BTreeMap<String, Vec<Device>>,
    out: &mut Vec<HotplugEvent>,
) {
    let mut event = HotplugEvent::for_device(Action::Add, device);
    if let Some(parent) = parent_key {
        event = event.with_ordering_hint(parent);
    }
    out.push(event);
    for child in children.get(device.udi()).into_iter().flatten() {
        pre_order(child, Some(device.identity_key()), children, out);
    }
}
