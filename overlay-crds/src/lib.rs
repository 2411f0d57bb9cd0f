use thiserror::Error;

pub mod cidr;
pub mod v1;

use kube::CustomResourceExt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("yaml error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("invalid HostSubnet {name:?}: {reason}")]
    InvalidHostSubnet { name: String, reason: String },

    #[error("invalid value {value:?} for annotation {key}")]
    InvalidAnnotation { key: String, value: String },
}

pub fn crd_gen_all() -> Result<()> {
    let crds = vec![
        v1::host_subnet::HostSubnet::crd(),
        v1::cluster_network::ClusterNetwork::crd(),
    ];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
