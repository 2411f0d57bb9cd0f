pub mod config;
pub mod crds;
pub mod master;

use std::path::PathBuf;

use overlay_network::AggregateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("failed to read {path:?}: {source}")]
    TopologyFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse cluster network config: {0}")]
    YamlConversion(#[from] serde_yaml::Error),

    #[error("invalid cluster network config: {0}")]
    Network(#[from] overlay_network::Error),

    #[error("host networks conflict with the cluster network config: {0}")]
    HostNetworkConflict(#[from] AggregateError),

    #[error("{0}")]
    Crd(#[from] overlay_crds::Error),

    #[error("failed waiting for CRD: {0}")]
    CrdWait(#[from] kube::runtime::wait::Error),

    #[error("CRD {0} was not established in time")]
    CrdNotEstablished(String),

    #[error("subnet master failed: {0}")]
    SubnetMaster(#[from] overlay_subnet_controller::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
