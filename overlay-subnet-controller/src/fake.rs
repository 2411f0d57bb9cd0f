use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use overlay_crds::v1::host_subnet::HostSubnet;

use crate::{Error, NodeLookup, Notification, Result, SubnetStore, WatchAction};

#[derive(Default)]
struct SubnetState {
    records: BTreeMap<String, HostSubnet>,
    next_uid: u64,
    next_version: u64,
    journal: Vec<Notification>,
    failing_creates: usize,
    conflicting_replaces: usize,
}

impl SubnetState {
    fn stamp(&mut self, subnet: &mut HostSubnet, new_uid: bool) {
        if new_uid {
            self.next_uid += 1;
            subnet.metadata.uid = Some(format!("hs-uid-{}", self.next_uid));
        }
        self.next_version += 1;
        subnet.metadata.resource_version = Some(self.next_version.to_string());
    }
}

/// In-memory HostSubnet store. Every mutation made through [`SubnetStore`] is
/// journaled as the notification a watch would deliver.
#[derive(Clone, Default)]
pub(crate) struct FakeSubnets {
    state: Arc<Mutex<SubnetState>>,
}

impl FakeSubnets {
    /// Stores a record without journaling it, as if it predates the watch.
    pub(crate) fn insert(&self, mut subnet: HostSubnet) -> HostSubnet {
        let mut state = self.state.lock().expect("lock");
        state.stamp(&mut subnet, true);
        state.records.insert(subnet.name_any(), subnet.clone());
        subnet
    }

    pub(crate) fn delete_silently(&self, name: &str) {
        self.state.lock().expect("lock").records.remove(name);
    }

    pub(crate) fn record(&self, name: &str) -> Option<HostSubnet> {
        self.state.lock().expect("lock").records.get(name).cloned()
    }

    pub(crate) fn records(&self) -> Vec<HostSubnet> {
        self.state
            .lock()
            .expect("lock")
            .records
            .values()
            .cloned()
            .collect()
    }

    pub(crate) fn take_journal(&self) -> Vec<Notification> {
        std::mem::take(&mut self.state.lock().expect("lock").journal)
    }

    pub(crate) fn fail_next_creates(&self, count: usize) {
        self.state.lock().expect("lock").failing_creates = count;
    }

    pub(crate) fn conflict_next_replaces(&self, count: usize) {
        self.state.lock().expect("lock").conflicting_replaces = count;
    }
}

impl SubnetStore for FakeSubnets {
    async fn list(&self) -> Result<Vec<HostSubnet>> {
        Ok(self.records())
    }

    async fn get(&self, name: &str) -> Result<HostSubnet> {
        self.record(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn create(&self, subnet: &HostSubnet) -> Result<HostSubnet> {
        let mut state = self.state.lock().expect("lock");
        let name = subnet.name_any();
        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(Error::Conflict(format!("injected create failure for {name}")));
        }
        if state.records.contains_key(&name) {
            return Err(Error::Conflict(format!("{name} already exists")));
        }
        let mut created = subnet.clone();
        state.stamp(&mut created, true);
        state.records.insert(name, created.clone());
        state.journal.push(Notification::Subnet(
            WatchAction::Added,
            Arc::new(created.clone()),
        ));
        Ok(created)
    }

    async fn replace(&self, subnet: &HostSubnet) -> Result<HostSubnet> {
        let mut state = self.state.lock().expect("lock");
        let name = subnet.name_any();
        let current_version = state
            .records
            .get(&name)
            .ok_or_else(|| Error::NotFound(name.clone()))?
            .resource_version();
        if state.conflicting_replaces > 0 {
            state.conflicting_replaces -= 1;
            return Err(Error::Conflict(format!("injected conflict for {name}")));
        }
        if subnet.resource_version() != current_version {
            return Err(Error::Conflict(format!("{name} was modified")));
        }
        let mut replaced = subnet.clone();
        state.stamp(&mut replaced, false);
        state.records.insert(name, replaced.clone());
        state.journal.push(Notification::Subnet(
            WatchAction::Updated,
            Arc::new(replaced.clone()),
        ));
        Ok(replaced)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().expect("lock");
        let deleted = state
            .records
            .remove(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        state
            .journal
            .push(Notification::Subnet(WatchAction::Deleted, Arc::new(deleted)));
        Ok(())
    }
}

/// In-memory Node collection. Without a cache every lookup goes through `fetch`.
#[derive(Clone, Default)]
pub(crate) struct FakeNodes {
    nodes: Arc<Mutex<BTreeMap<String, Node>>>,
    uncached: bool,
}

impl FakeNodes {
    pub(crate) fn without_cache() -> Self {
        Self {
            uncached: true,
            ..Default::default()
        }
    }

    pub(crate) fn add(&self, node: Node) -> Node {
        self.nodes
            .lock()
            .expect("lock")
            .insert(node.name_any(), node.clone());
        node
    }

    pub(crate) fn remove(&self, name: &str) {
        self.nodes.lock().expect("lock").remove(name);
    }
}

impl NodeLookup for FakeNodes {
    fn cached(&self, name: &str) -> Option<Arc<Node>> {
        if self.uncached {
            return None;
        }
        self.nodes.lock().expect("lock").get(name).cloned().map(Arc::new)
    }

    async fn fetch(&self, name: &str) -> Result<Node> {
        self.nodes
            .lock()
            .expect("lock")
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }
}
