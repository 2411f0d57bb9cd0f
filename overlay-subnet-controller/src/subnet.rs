use kube::ResourceExt;
use overlay_crds::cidr::parse_ipv4_cidr;
use overlay_crds::v1::host_subnet::{HostSubnet, SubnetMeta};
use overlay_k8s_utils::retry_on_conflict;
use tracing::{debug, error, info, warn};

use crate::controller::SubnetMaster;
use crate::{Error, NodeLookup, Result, SubnetStore, WatchAction};

/// Outcome of reconciling a HostSubnet against the Node of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubnetReconcile {
    /// No node and no owner: a record for an endpoint outside the cluster.
    Unmanaged,
    /// The node exists and the record had no owner; it was stamped.
    Adopted,
    /// The owner matches the live node.
    InSync,
    /// The owning node is gone; the record was deleted.
    DeletedOrphan,
    /// A different node now has this name; the record was deleted.
    DeletedStale,
}

impl<S: SubnetStore, N: NodeLookup> SubnetMaster<S, N> {
    pub(crate) async fn handle_subnet(
        &mut self,
        action: WatchAction,
        subnet: &HostSubnet,
    ) -> Result<()> {
        debug!("Watch {action:?} event for HostSubnet {}", subnet.name_any());
        match action {
            WatchAction::Added | WatchAction::Updated => self.add_or_update_subnet(subnet).await,
            WatchAction::Deleted => self.delete_subnet(subnet).await,
        }
    }

    async fn add_or_update_subnet(&mut self, subnet: &HostSubnet) -> Result<()> {
        if let Err(e) = subnet.validate() {
            warn!("Ignoring invalid HostSubnet {}: {e}", subnet.summary());
            return Ok(());
        }
        self.track_subnet(subnet);

        // Left for an operator to correct.
        if let Err(e) = self.topology.validate_node_ip(&subnet.spec.host_ip) {
            warn!("Failed to validate HostSubnet {}: {e}", subnet.summary());
        }
        if !subnet.spec.subnet.is_empty()
            && let Err(e) = self.topology.check_subnet(subnet)
        {
            warn!("Failed to validate HostSubnet {}: {e}", subnet.summary());
        }

        let meta = match subnet.meta() {
            Ok(meta) => meta,
            // Only an assign request passes validation with a malformed VNID.
            Err(e) => {
                error!("{e}; annotation will be ignored");
                SubnetMeta {
                    assign_subnet: true,
                    ..Default::default()
                }
            }
        };
        if meta.assign_subnet {
            return self.assign_subnet(subnet, meta.fixed_vnid).await;
        }
        self.reconcile_subnet(subnet).await.map(|_| ())
    }

    /// Repairs a record whose node events were missed. Never allocates.
    pub(crate) async fn reconcile_subnet(&mut self, subnet: &HostSubnet) -> Result<SubnetReconcile> {
        let name = subnet.name_any();
        let node = self.lookup_node(&name).await?;

        match (node, subnet.owner_uid()) {
            (None, None) => Ok(SubnetReconcile::Unmanaged),
            (Some(node), None) => {
                let uid = node.uid().unwrap_or_default();
                let subnets = &self.subnets;
                let name = name.as_str();
                let uid = uid.as_str();
                retry_on_conflict(&self.retry, || async move {
                    let mut current = subnets.get(name).await?;
                    if current.owner_uid().is_some() {
                        return Ok(current);
                    }
                    current.set_owner_uid(uid);
                    subnets.replace(&current).await
                })
                .await?;
                info!("Stamped HostSubnet {} with node UID {uid}", subnet.summary());
                Ok(SubnetReconcile::Adopted)
            }
            (None, Some(_)) => {
                info!("Found no node for HostSubnet {name}, deleting the HostSubnet");
                self.delete_record(&name).await?;
                Ok(SubnetReconcile::DeletedOrphan)
            }
            (Some(node), Some(owner)) => {
                if node.uid().as_deref() == Some(owner) {
                    return Ok(SubnetReconcile::InSync);
                }
                info!(
                    "HostSubnet {name} has the UID of an incorrect node object, deleting the HostSubnet"
                );
                self.delete_record(&name).await?;
                Ok(SubnetReconcile::DeletedStale)
            }
        }
    }

    /// Replaces an operator's assign request with an allocated record that
    /// has no owning node.
    async fn assign_subnet(
        &mut self,
        request: &HostSubnet,
        fixed_vnid: Option<u32>,
    ) -> Result<()> {
        let name = request.name_any();
        match self.subnets.delete(&name).await {
            Ok(()) => {}
            Err(Error::NotFound(_)) => {
                debug!("Assign request {name} already handled");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        info!("Deleted HostSubnet not backed by node: {}", request.summary());

        let meta = SubnetMeta {
            fixed_vnid,
            ..Default::default()
        };
        self.ensure_subnet(&name, None, &request.spec.host_ip, meta)
            .await?;
        info!("Created HostSubnet not backed by node: {name}");
        Ok(())
    }

    async fn delete_subnet(&mut self, subnet: &HostSubnet) -> Result<()> {
        let name = subnet.name_any();
        if subnet.is_assign_request() {
            return Ok(());
        }
        let Ok(network) = parse_ipv4_cidr(&subnet.spec.subnet) else {
            debug!("Deleted HostSubnet {name} had no usable subnet");
            return Ok(());
        };

        match (self.owners.get(&network), subnet.uid()) {
            (Some(owner), Some(uid)) if owner.uid == uid => {}
            (Some(_), _) => {
                debug!("Subnet {network} now belongs to another HostSubnet; not releasing it");
                return Ok(());
            }
            (None, _) => {
                debug!("Subnet {network} of {name} is not tracked");
                return Ok(());
            }
        }
        self.owners.remove(&network);
        match self.allocator.release_network(network) {
            Ok(()) => info!("Released subnet {network} of deleted HostSubnet {name}"),
            Err(e) => warn!("Error releasing allocated subnet: {e}"),
        }

        // The node still exists, so allocation must be driven again.
        if let Some(node) = self.lookup_node(&name).await? {
            self.requeue_node(node);
        }
        Ok(())
    }
}
