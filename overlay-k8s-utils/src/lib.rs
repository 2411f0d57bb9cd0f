mod node;
pub mod retry;
mod watch;

use thiserror::Error;

pub use node::node_internal_ip;
pub use retry::{RetryPolicy, retry_on_conflict, retry_with_backoff};
pub use watch::{spawn_watcher, wait_for_store};

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to create store: {0}")]
    StoreCreation(String),

    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Classification of API errors that callers branch on.
pub trait ApiErrorExt {
    fn is_not_found(&self) -> bool;
    fn is_conflict(&self) -> bool;
}

impl ApiErrorExt for kube::Error {
    fn is_not_found(&self) -> bool {
        matches!(self, kube::Error::Api(resp) if resp.code == 404)
    }

    fn is_conflict(&self) -> bool {
        matches!(self, kube::Error::Api(resp) if resp.code == 409)
    }
}
