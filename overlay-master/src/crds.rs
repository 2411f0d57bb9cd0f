use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::conditions;
use kube::runtime::wait::await_condition;
use kube::{Api, Client, CustomResourceExt};
use overlay_crds::v1::cluster_network::{ClusterNetwork, NAME_GROUP_CLUSTERNETWORK};
use overlay_crds::v1::host_subnet::{HostSubnet, NAME_GROUP_HOSTSUBNET};
use tracing::info;

use crate::{Error, Result};

const FIELD_MANAGER: &str = "overlay_master";
const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(10);

fn crd_manifests() -> [(&'static str, CustomResourceDefinition); 2] {
    [
        (NAME_GROUP_HOSTSUBNET, HostSubnet::crd()),
        (NAME_GROUP_CLUSTERNETWORK, ClusterNetwork::crd()),
    ]
}

/// Server-side applies the CRDs and waits until the API server serves them.
pub async fn apply_crds(client: Client) -> Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client);
    let ssaply = PatchParams::apply(FIELD_MANAGER).force();
    for (name, crd) in crd_manifests() {
        crds.patch(name, &ssaply, &Patch::Apply(&crd)).await?;
        let established = await_condition(crds.clone(), name, conditions::is_crd_established());
        match tokio::time::timeout(ESTABLISH_TIMEOUT, established).await {
            Ok(o) => {
                o?;
            }
            Err(_) => return Err(Error::CrdNotEstablished(name.to_string())),
        };
        info!("applied {name} CRD");
    }
    Ok(())
}
