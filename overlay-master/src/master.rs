use std::path::Path;
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::ListParams;
use kube::{Api, Client};
use overlay_crds::v1::cluster_network::{ClusterNetwork, ClusterNetworkSpec};
use overlay_crds::v1::host_subnet::HostSubnet;
use overlay_network::{Topology, list_host_addresses};
use overlay_subnet_controller::{SubnetMasterConfig, start_subnet_master};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ControllerArgs;
use crate::crds;
use crate::{Error, Result};

pub async fn start(args: ControllerArgs, cancel: CancellationToken) -> Result<()> {
    let client = Client::try_default().await?;
    if args.apply_crds {
        crds::apply_crds(client.clone()).await?;
    }

    let spec = match &args.topology_file {
        Some(path) => read_topology_file(path)?,
        None => {
            let api = Api::<ClusterNetwork>::all(client.clone());
            let network = api.get(&args.cluster_network_name).await?;
            info!("Loaded ClusterNetwork {}", network.summary());
            network.spec
        }
    };
    let topology = Arc::new(Topology::parse(&spec)?);

    check_host_networks(&topology, &args.skip_interfaces)?;
    check_cluster_objects(&client, &topology).await?;

    let config = SubnetMasterConfig {
        retry: args.retry_policy(),
        store_timeout: Some(args.store_timeout()),
    };
    start_subnet_master(client, topology, config, cancel).await?;
    Ok(())
}

fn read_topology_file(path: &Path) -> Result<ClusterNetworkSpec> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::TopologyFile {
        path: path.to_path_buf(),
        source,
    })?;
    let spec = parse_topology(&raw)?;
    info!("Loaded cluster network config from {}", path.display());
    Ok(spec)
}

fn parse_topology(raw: &str) -> Result<ClusterNetworkSpec> {
    Ok(serde_yaml::from_str(raw)?)
}

/// Refuses to start when a local interface sits inside the cluster or
/// service network.
fn check_host_networks(topology: &Topology, skip: &[String]) -> Result<()> {
    let networks: Vec<Ipv4Network> = list_host_addresses(skip)?
        .into_iter()
        .map(|address| address.network)
        .collect();
    topology.check_host_networks(&networks)?;
    Ok(())
}

async fn check_cluster_objects(client: &Client, topology: &Topology) -> Result<()> {
    let lp = ListParams::default();
    let subnets = Api::<HostSubnet>::all(client.clone()).list(&lp).await?.items;
    let pods = Api::<Pod>::all(client.clone()).list(&lp).await?.items;
    let services = Api::<Service>::all(client.clone()).list(&lp).await?.items;

    if let Err(e) = topology.check_cluster_objects(&subnets, &pods, &services) {
        warn!("Existing cluster objects conflict with the cluster network config: {e}");
    }
    Ok(())
}
