use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use overlay_crds::v1::host_subnet::{HostSubnet, SubnetMeta};
use overlay_k8s_utils::{RetryPolicy, retry_on_conflict};
use overlay_network::{Error as NetworkError, SubnetAllocator, Topology};
use tracing::{debug, info, warn};

use crate::{Error, NodeLookup, Notification, Result, SubnetStore, WatchAction};

/// The HostSubnet object a subnet was issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SubnetOwner {
    pub(crate) uid: String,
    pub(crate) name: String,
}

/// The single reconciliation actor. It owns the allocator and is the only
/// writer of HostSubnet records, so notifications must be handled one at a time.
pub(crate) struct SubnetMaster<S, N> {
    pub(crate) topology: Arc<Topology>,
    pub(crate) allocator: SubnetAllocator,
    pub(crate) subnets: S,
    pub(crate) nodes: N,
    pub(crate) retry: RetryPolicy,
    /// Last internal IP a subnet was ensured for, by Node UID.
    pub(crate) node_ips: HashMap<String, String>,
    /// HostSubnet object each allocated subnet was issued to.
    pub(crate) owners: HashMap<Ipv4Network, SubnetOwner>,
    pub(crate) requeue: VecDeque<Notification>,
}

impl<S: SubnetStore, N: NodeLookup> SubnetMaster<S, N> {
    pub(crate) fn new(
        topology: Arc<Topology>,
        allocator: SubnetAllocator,
        subnets: S,
        nodes: N,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            topology,
            allocator,
            subnets,
            nodes,
            retry,
            node_ips: HashMap::new(),
            owners: HashMap::new(),
            requeue: VecDeque::new(),
        }
    }

    /// Seeds the allocator with every subnet already issued. Must run before
    /// any notification is handled.
    pub(crate) async fn replay(&mut self) -> Result<()> {
        let subnets = self.subnets.list().await?;
        for subnet in &subnets {
            self.track_subnet(subnet);
        }
        info!(
            "Marked {} of {} existing subnets as allocated",
            self.allocator.allocated(),
            subnets.len()
        );
        Ok(())
    }

    pub(crate) fn next_requeued(&mut self) -> Option<Notification> {
        self.requeue.pop_front()
    }

    #[tracing::instrument(skip_all, fields(kind = notification.kind(), name = %notification.name(), action = ?notification.action()))]
    pub(crate) async fn handle(&mut self, notification: Notification) -> Result<()> {
        match notification {
            Notification::Node(action, node) => self.handle_node(action, &node).await,
            Notification::Subnet(action, subnet) => self.handle_subnet(action, &subnet).await,
        }
    }

    /// Folds a valid record into the allocator and the ownership ledger if
    /// its subnet is not yet known. Assign requests are skipped since their
    /// subnet is replaced by a fresh allocation.
    pub(crate) fn track_subnet(&mut self, subnet: &HostSubnet) {
        if subnet.is_assign_request() {
            return;
        }
        let network = match subnet.validate() {
            Ok(Some(network)) => network,
            Ok(None) => return,
            Err(e) => {
                warn!("Not tracking invalid HostSubnet {}: {e}", subnet.summary());
                return;
            }
        };
        if self.allocator.is_allocated(network) {
            if let Some(uid) = subnet.uid()
                && self.owners.get(&network).is_some_and(|owner| owner.uid != uid)
            {
                warn!(
                    "HostSubnet {} claims subnet {network} already issued to another record",
                    subnet.summary()
                );
            }
            return;
        }
        match self.allocator.mark_allocated_network(network) {
            Ok(()) => {
                debug!("Marked subnet {network} of {} as allocated", subnet.name_any());
                if let Some(uid) = subnet.uid() {
                    self.owners.insert(
                        network,
                        SubnetOwner {
                            uid,
                            name: subnet.name_any(),
                        },
                    );
                }
            }
            Err(e) => warn!("Error marking allocated subnet for {}: {e}", subnet.name_any()),
        }
    }

    /// Makes sure a HostSubnet named `name` exists for `node_ip`. `node_uid`
    /// is the owning Node, absent for records not backed by a node.
    pub(crate) async fn ensure_subnet(
        &mut self,
        name: &str,
        node_uid: Option<&str>,
        node_ip: &str,
        meta: SubnetMeta,
    ) -> Result<()> {
        self.topology.validate_node_ip(node_ip)?;

        match self.subnets.get(name).await {
            Ok(existing) => match existing.validate() {
                Err(e) => {
                    warn!("Deleting invalid HostSubnet {}: {e}", existing.summary());
                    self.delete_record(name).await?;
                }
                Ok(_) => match (node_uid, existing.owner_uid()) {
                    (Some(uid), Some(owner)) if owner != uid => {
                        info!(
                            "HostSubnet {} belongs to node UID {owner}, not {uid}; deleting it",
                            existing.summary()
                        );
                        self.delete_record(name).await?;
                    }
                    _ => return self.update_subnet(&existing, node_uid, node_ip).await,
                },
            },
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        self.create_subnet(name, node_uid, node_ip, meta).await
    }

    async fn update_subnet(
        &self,
        existing: &HostSubnet,
        node_uid: Option<&str>,
        node_ip: &str,
    ) -> Result<()> {
        let stamp_owner = node_uid.is_some() && existing.owner_uid().is_none();
        if existing.spec.host_ip == node_ip && !stamp_owner {
            return Ok(());
        }

        let name = existing.name_any();
        let name = name.as_str();
        let subnets = &self.subnets;
        let updated = retry_on_conflict(&self.retry, || async move {
            let mut current = subnets.get(name).await?;
            current.spec.host_ip = node_ip.to_string();
            if let Some(uid) = node_uid
                && current.owner_uid().is_none()
            {
                current.set_owner_uid(uid);
            }
            subnets.replace(&current).await
        })
        .await?;
        info!("Updated HostSubnet {}", updated.summary());
        Ok(())
    }

    async fn create_subnet(
        &mut self,
        name: &str,
        node_uid: Option<&str>,
        node_ip: &str,
        mut meta: SubnetMeta,
    ) -> Result<()> {
        if let Some(uid) = node_uid {
            meta.owner_uid = Some(uid.to_string());
        }
        let lease = self.allocator.lease().map_err(|e| match e {
            NetworkError::Exhausted => {
                warn!("No subnet left for {name}; it stays without one until capacity frees up");
                Error::Network(e)
            }
            e => Error::Network(e),
        })?;
        let record = HostSubnet::for_host(name, node_ip, lease.network(), &meta);
        // Dropping the lease on failure or cancellation returns the subnet.
        let created = self.subnets.create(&record).await?;
        let network = lease.commit();
        if let Some(uid) = created.uid() {
            self.owners.insert(
                network,
                SubnetOwner {
                    uid,
                    name: name.to_string(),
                },
            );
        }
        info!("Created HostSubnet {}", created.summary());
        Ok(())
    }

    /// Checks the ownership ledger against the UIDs of a complete re-list.
    ///
    /// An owner missing from the list is confirmed with a GET, since a record
    /// written after the list was taken is legitimately absent from it. A
    /// record that is really gone has its subnet released and its node, if
    /// still live, requeued.
    pub(crate) async fn resync_subnets(&mut self, listed: &HashSet<String>) -> Result<()> {
        let unlisted: Vec<(Ipv4Network, SubnetOwner)> = self
            .owners
            .iter()
            .filter(|(_, owner)| !listed.contains(&owner.uid))
            .map(|(network, owner)| (*network, owner.clone()))
            .collect();

        for (network, owner) in unlisted {
            match self.subnets.get(&owner.name).await {
                Ok(current) if current.uid().as_deref() == Some(owner.uid.as_str()) => continue,
                Ok(current) if current.validate().ok().flatten() == Some(network) => {
                    if let Some(uid) = current.uid() {
                        debug!("Subnet {network} now belongs to {}", current.summary());
                        self.owners.insert(
                            network,
                            SubnetOwner {
                                uid,
                                name: owner.name,
                            },
                        );
                    }
                    continue;
                }
                Ok(_) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }

            self.owners.remove(&network);
            match self.allocator.release_network(network) {
                Ok(()) => info!(
                    "Released subnet {network} of vanished HostSubnet {}",
                    owner.name
                ),
                Err(e) => warn!("Error releasing allocated subnet: {e}"),
            }
            if let Some(node) = self.lookup_node(&owner.name).await? {
                self.requeue_node(node);
            }
        }
        Ok(())
    }

    /// Deletes a record by name. A record that is already gone is not an error.
    pub(crate) async fn delete_record(&self, name: &str) -> Result<()> {
        match self.subnets.delete(name).await {
            Ok(()) | Err(Error::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Looks the node up in the cache, then in the store. `None` means the
    /// node does not exist; any other failure is an error.
    pub(crate) async fn lookup_node(&self, name: &str) -> Result<Option<Arc<Node>>> {
        if let Some(node) = self.nodes.cached(name) {
            return Ok(Some(node));
        }
        match self.nodes.fetch(name).await {
            Ok(node) => Ok(Some(Arc::new(node))),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Re-drives allocation for a live node through the node path.
    pub(crate) fn requeue_node(&mut self, node: Arc<Node>) {
        if let Some(uid) = node.uid() {
            self.node_ips.remove(&uid);
        }
        debug!("Requeueing node {}", node.name_any());
        self.requeue
            .push_back(Notification::Node(WatchAction::Updated, node));
    }
}
