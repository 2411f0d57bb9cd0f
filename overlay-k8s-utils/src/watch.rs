use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::serde::de::DeserializeOwned;
use kube::runtime::reflector::{self, Store};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Resource};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use crate::{Error, Result};

/// Starts a reflecting watch on `api` in the background. The store is kept
/// current by the spawned task; every raw watcher event is forwarded on the
/// returned channel until `cancel` fires or the receiver is dropped.
pub fn spawn_watcher<K>(
    api: Api<K>,
    config: watcher::Config,
    cancel: CancellationToken,
) -> (Store<K>, mpsc::UnboundedReceiver<watcher::Event<K>>)
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    let (store, writer) = reflector::store();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let stream = watcher(api, config).default_backoff().reflect(writer);
        tokio::pin!(stream);
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(event)) => {
                    trace!("received event: {:?}", event);
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!(%e, "unexpected error with stream")
                }
                None => break,
            }
        }
    });

    (store, rx)
}

pub async fn wait_for_store<K>(store: &Store<K>, timeout: Option<Duration>) -> Result<()>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    let wait = store.wait_until_ready();
    if let Some(timeout) = timeout {
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::StoreCreation("timed out waiting for store".into()))?
            .map_err(|e| Error::StoreCreation(e.to_string()))?;
    } else {
        wait.await
            .map_err(|e| Error::StoreCreation(e.to_string()))?;
    }
    Ok(())
}
