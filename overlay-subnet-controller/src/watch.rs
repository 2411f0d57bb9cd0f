use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use kube::runtime::watcher;
use overlay_crds::v1::host_subnet::HostSubnet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    Added,
    Updated,
    Deleted,
}

/// A change to one object of either watched kind, carrying its snapshot.
#[derive(Debug, Clone)]
pub enum Notification {
    Node(WatchAction, Arc<Node>),
    Subnet(WatchAction, Arc<HostSubnet>),
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Node(..) => "Node",
            Notification::Subnet(..) => "HostSubnet",
        }
    }

    pub fn action(&self) -> WatchAction {
        match self {
            Notification::Node(action, _) | Notification::Subnet(action, _) => *action,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Notification::Node(_, node) => node.name_any(),
            Notification::Subnet(_, subnet) => subnet.name_any(),
        }
    }
}

/// Turns raw watcher events for one kind into add/update/delete notifications.
///
/// The watcher only reports objects as applied, so the tracker remembers the
/// last snapshot per name. When the watcher re-lists, any remembered object
/// missing from the new list was deleted while the watch was down and is
/// reported as such.
#[derive(Debug)]
pub struct WatchTracker<K> {
    known: HashMap<String, Arc<K>>,
    relisted: Option<HashSet<String>>,
}

impl<K> Default for WatchTracker<K> {
    fn default() -> Self {
        Self {
            known: HashMap::new(),
            relisted: None,
        }
    }
}

impl<K: ResourceExt> WatchTracker<K> {
    pub fn observe(&mut self, event: watcher::Event<K>) -> Vec<(WatchAction, Arc<K>)> {
        match event {
            watcher::Event::Apply(obj) => self.apply(obj),
            watcher::Event::Delete(obj) => {
                let name = obj.name_any();
                if self
                    .known
                    .get(&name)
                    .is_some_and(|known| known.uid() == obj.uid())
                {
                    self.known.remove(&name);
                }
                vec![(WatchAction::Deleted, Arc::new(obj))]
            }
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(obj.name_any());
                }
                self.apply(obj)
            }
            watcher::Event::InitDone => {
                let Some(relisted) = self.relisted.take() else {
                    return Vec::new();
                };
                let gone: Vec<String> = self
                    .known
                    .keys()
                    .filter(|name| !relisted.contains(*name))
                    .cloned()
                    .collect();
                gone.iter()
                    .filter_map(|name| self.known.remove(name))
                    .map(|obj| (WatchAction::Deleted, obj))
                    .collect()
            }
        }
    }

    /// UIDs of every object currently known.
    pub fn uids(&self) -> HashSet<String> {
        self.known.values().filter_map(|obj| obj.uid()).collect()
    }

    /// A name that now belongs to a different object (new UID) means the
    /// old one was deleted and recreated while the watch was not looking.
    fn apply(&mut self, obj: K) -> Vec<(WatchAction, Arc<K>)> {
        let obj = Arc::new(obj);
        match self.known.insert(obj.name_any(), obj.clone()) {
            Some(old) if old.uid() != obj.uid() => {
                vec![(WatchAction::Deleted, old), (WatchAction::Added, obj)]
            }
            Some(_) => vec![(WatchAction::Updated, obj)],
            None => vec![(WatchAction::Added, obj)],
        }
    }
}
