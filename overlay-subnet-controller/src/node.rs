use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use overlay_crds::v1::host_subnet::SubnetMeta;
use overlay_k8s_utils::node_internal_ip;
use tracing::{debug, info};

use crate::controller::SubnetMaster;
use crate::{Error, NodeLookup, Result, SubnetStore, WatchAction};

impl<S: SubnetStore, N: NodeLookup> SubnetMaster<S, N> {
    pub(crate) async fn handle_node(&mut self, action: WatchAction, node: &Node) -> Result<()> {
        match action {
            WatchAction::Added | WatchAction::Updated => self.add_or_update_node(action, node).await,
            WatchAction::Deleted => self.delete_node(node).await,
        }
    }

    async fn add_or_update_node(&mut self, action: WatchAction, node: &Node) -> Result<()> {
        let name = node.name_any();
        let uid = node.uid().unwrap_or_default();
        let Some(node_ip) = node_internal_ip(node) else {
            return Err(Error::MissingNodeIp(name));
        };

        // Kubelet updates node status constantly; only an IP change matters.
        if self.node_ips.get(&uid).is_some_and(|ip| ip == node_ip) {
            return Ok(());
        }
        debug!("Watch {action:?} event for Node {name}");

        self.ensure_subnet(&name, Some(&uid), node_ip, SubnetMeta::default())
            .await?;
        self.node_ips.insert(uid, node_ip.to_string());
        Ok(())
    }

    async fn delete_node(&mut self, node: &Node) -> Result<()> {
        let name = node.name_any();
        let uid = node.uid().unwrap_or_default();
        debug!("Watch Deleted event for Node {name}");

        if self.node_ips.remove(&uid).is_none() {
            return Ok(());
        }

        let record = match self.subnets.get(&name).await {
            Ok(record) => record,
            Err(Error::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        if let Some(owner) = record.owner_uid()
            && owner != uid
        {
            debug!(
                "HostSubnet {} belongs to a newer node {owner}; keeping it",
                record.summary()
            );
            return Ok(());
        }

        self.delete_record(&name).await?;
        info!("Deleted HostSubnet {}", record.summary());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::controller::tests::*;
    use crate::fake::{FakeNodes, FakeSubnets};
    use crate::{Error, WatchAction};

    #[tokio::test]
    async fn test_node_added_creates_subnet() {
        let subnets = FakeSubnets::default();
        let nodes = FakeNodes::default();
        let mut master = make_master(&subnets, &nodes);

        let node = nodes.add(make_node("n1", "u1", "192.168.1.10"));
        node_event(&mut master, WatchAction::Added, node)
            .await
            .expect("node added");

        let record = subnets.record("n1").expect("record");
        assert_eq!(record.spec.host, "n1");
        assert_eq!(record.spec.host_ip, "192.168.1.10");
        assert_eq!(record.spec.subnet, "10.128.0.0/23");
        assert_eq!(record.owner_uid(), Some("u1"));
    }

    #[tokio::test]
    async fn test_node_ip_change_updates_in_place() {
        let subnets = FakeSubnets::default();
        let nodes = FakeNodes::default();
        let mut master = make_master(&subnets, &nodes);

        let node = nodes.add(make_node("n1", "u1", "192.168.1.10"));
        node_event(&mut master, WatchAction::Added, node)
            .await
            .expect("node added");
        drain(&mut master, &subnets).await;

        let node = nodes.add(make_node("n1", "u1", "192.168.1.11"));
        node_event(&mut master, WatchAction::Updated, node)
            .await
            .expect("node updated");
        drain(&mut master, &subnets).await;

        let records = subnets.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].spec.host_ip, "192.168.1.11");
        assert_eq!(records[0].spec.subnet, "10.128.0.0/23");
        assert_eq!(master.allocator.allocated(), 1);
    }

    #[tokio::test]
    async fn test_unchanged_ip_is_ignored() {
        let subnets = FakeSubnets::default();
        let nodes = FakeNodes::default();
        let mut master = make_master(&subnets, &nodes);

        let node = nodes.add(make_node("n1", "u1", "192.168.1.10"));
        node_event(&mut master, WatchAction::Added, node.clone())
            .await
            .expect("node added");
        drain(&mut master, &subnets).await;

        // A record edit the controller would otherwise correct goes unnoticed.
        subnets.delete_silently("n1");
        node_event(&mut master, WatchAction::Updated, node)
            .await
            .expect("node updated");
        assert!(subnets.take_journal().is_empty());
        assert!(subnets.record("n1").is_none());
    }

    #[tokio::test]
    async fn test_node_without_ip_is_reported() {
        let subnets = FakeSubnets::default();
        let nodes = FakeNodes::default();
        let mut master = make_master(&subnets, &nodes);

        let mut node = make_node("n1", "u1", "192.168.1.10");
        node.status = None;
        let result = node_event(&mut master, WatchAction::Added, node).await;
        assert!(matches!(result, Err(Error::MissingNodeIp(name)) if name == "n1"));
        assert!(subnets.records().is_empty());
    }

    #[tokio::test]
    async fn test_ipv6_node_gets_no_subnet() {
        let subnets = FakeSubnets::default();
        let nodes = FakeNodes::default();
        let mut master = make_master(&subnets, &nodes);

        let node = nodes.add(make_node("n6", "u6", "fd00::10"));
        let result = node_event(&mut master, WatchAction::Added, node).await;
        assert!(matches!(result, Err(Error::Network(_))));
        assert!(subnets.records().is_empty());
        assert_eq!(master.allocator.allocated(), 0);
    }

    #[tokio::test]
    async fn test_node_deleted_releases_subnet() {
        let subnets = FakeSubnets::default();
        let nodes = FakeNodes::default();
        let mut master = make_master(&subnets, &nodes);

        let node = nodes.add(make_node("n1", "u1", "192.168.1.10"));
        node_event(&mut master, WatchAction::Added, node.clone())
            .await
            .expect("node added");
        drain(&mut master, &subnets).await;

        nodes.remove("n1");
        node_event(&mut master, WatchAction::Deleted, node)
            .await
            .expect("node deleted");
        drain(&mut master, &subnets).await;

        assert!(subnets.record("n1").is_none());
        assert_eq!(master.allocator.allocated(), 0);

        let node = nodes.add(make_node("n2", "u2", "192.168.1.12"));
        node_event(&mut master, WatchAction::Added, node)
            .await
            .expect("node added");
        assert_eq!(
            subnets.record("n2").expect("record").spec.subnet,
            "10.128.0.0/23"
        );
    }

    #[tokio::test]
    async fn test_unknown_node_delete_is_ignored() {
        let subnets = FakeSubnets::default();
        let nodes = FakeNodes::default();
        subnets.insert(make_subnet("n1", "192.168.1.10", "10.128.0.0/23", &[]));
        let mut master = make_master(&subnets, &nodes);

        node_event(
            &mut master,
            WatchAction::Deleted,
            make_node("n1", "u1", "192.168.1.10"),
        )
        .await
        .expect("node deleted");
        assert!(subnets.record("n1").is_some());
        assert!(subnets.take_journal().is_empty());
    }

    #[tokio::test]
    async fn test_stale_node_delete_keeps_newer_record() {
        let subnets = FakeSubnets::default();
        let nodes = FakeNodes::default();
        let mut master = make_master(&subnets, &nodes);

        let old = make_node("n1", "u1", "192.168.1.10");
        node_event(&mut master, WatchAction::Added, old.clone())
            .await
            .expect("old node added");
        drain(&mut master, &subnets).await;

        // The node was recreated before the delete of the old one arrived.
        let new = nodes.add(make_node("n1", "u2", "192.168.1.10"));
        node_event(&mut master, WatchAction::Added, new)
            .await
            .expect("new node added");
        drain(&mut master, &subnets).await;

        node_event(&mut master, WatchAction::Deleted, old)
            .await
            .expect("old node deleted");
        drain(&mut master, &subnets).await;

        let record = subnets.record("n1").expect("record");
        assert_eq!(record.owner_uid(), Some("u2"));
        assert_eq!(master.allocator.allocated(), 1);
    }
}
