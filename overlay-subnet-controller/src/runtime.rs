use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use kube::runtime::watcher;
use kube::{Api, Client};
use overlay_crds::v1::host_subnet::HostSubnet;
use overlay_k8s_utils::{RetryPolicy, spawn_watcher, wait_for_store};
use overlay_network::{SubnetAllocator, Topology};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::{KubeNodes, KubeSubnets};
use crate::controller::SubnetMaster;
use crate::{Notification, Result, WatchTracker};

#[derive(Debug, Clone)]
pub struct SubnetMasterConfig {
    pub retry: RetryPolicy,
    /// Bound on waiting for the node cache to fill.
    pub store_timeout: Option<Duration>,
}

/// Runs the subnet master until `cancel` fires.
///
/// Existing subnets are replayed into the allocator before any watch event
/// is handled; events arriving in the meantime queue up behind the replay.
pub async fn start_subnet_master(
    client: Client,
    topology: Arc<Topology>,
    config: SubnetMasterConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let allocator = SubnetAllocator::from_topology(&topology)?;
    info!(
        "Subnet allocator ready with {} subnets across {} ranges",
        allocator.capacity(),
        topology.cluster_networks.len()
    );

    let subnet_api = Api::<HostSubnet>::all(client.clone());
    let node_api = Api::<Node>::all(client);

    let (node_store, mut node_events) =
        spawn_watcher(node_api.clone(), watcher::Config::default(), cancel.child_token());
    let mut master = SubnetMaster::new(
        topology,
        allocator,
        KubeSubnets::new(subnet_api.clone()),
        KubeNodes::new(node_api, node_store.clone()),
        config.retry,
    );
    master.replay().await?;

    let (_, mut subnet_events) =
        spawn_watcher(subnet_api, watcher::Config::default(), cancel.child_token());
    wait_for_store(&node_store, config.store_timeout).await?;
    info!("Watching nodes and host subnets");

    let mut nodes = WatchTracker::default();
    let mut subnets = WatchTracker::default();
    loop {
        while let Some(notification) = master.next_requeued() {
            dispatch(&mut master, notification).await;
        }

        let (notifications, relisted): (Vec<Notification>, bool) = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(event) = node_events.recv() => (
                nodes
                    .observe(event)
                    .into_iter()
                    .map(|(action, node)| Notification::Node(action, node))
                    .collect(),
                false,
            ),
            Some(event) = subnet_events.recv() => {
                let relisted = matches!(event, watcher::Event::InitDone);
                (
                    subnets
                        .observe(event)
                        .into_iter()
                        .map(|(action, subnet)| Notification::Subnet(action, subnet))
                        .collect(),
                    relisted,
                )
            }
            else => break,
        };
        for notification in notifications {
            if cancel.is_cancelled() {
                break;
            }
            dispatch(&mut master, notification).await;
        }
        if relisted && let Err(e) = master.resync_subnets(&subnets.uids()).await {
            error!("Error resyncing subnets after re-list: {e}");
        }
    }

    info!("Subnet master stopped");
    Ok(())
}

async fn dispatch(master: &mut SubnetMaster<KubeSubnets, KubeNodes>, notification: Notification) {
    let kind = notification.kind();
    let name = notification.name();
    if let Err(e) = master.handle(notification).await {
        error!("Error handling {kind} {name}: {e}");
    }
}
