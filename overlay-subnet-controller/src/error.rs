use overlay_k8s_utils::ApiErrorExt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("resource conflict: {0}")]
    Conflict(String),

    #[error("kube error: {0}")]
    KubeError(kube::Error),

    #[error("network error: {0}")]
    Network(#[from] overlay_network::Error),

    #[error("{0}")]
    Crd(#[from] overlay_crds::Error),

    #[error("kube utils error: {0}")]
    KubeUtils(#[from] overlay_k8s_utils::Error),

    #[error("node {0} has no InternalIP address")]
    MissingNodeIp(String),

    #[error("encountered invalid resource")]
    InvalidResource,
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        if err.is_not_found() {
            Error::NotFound(err.to_string())
        } else if err.is_conflict() {
            Error::Conflict(err.to_string())
        } else {
            Error::KubeError(err)
        }
    }
}

impl ApiErrorExt for Error {
    fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}
