use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use kube::Api;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::runtime::reflector::{ObjectRef, Store};
use overlay_crds::v1::host_subnet::HostSubnet;

use crate::{Error, NodeLookup, Result, SubnetStore};

pub(crate) struct KubeSubnets {
    api: Api<HostSubnet>,
}

impl KubeSubnets {
    pub(crate) fn new(api: Api<HostSubnet>) -> Self {
        Self { api }
    }
}

impl SubnetStore for KubeSubnets {
    async fn list(&self) -> Result<Vec<HostSubnet>> {
        Ok(self.api.list(&ListParams::default()).await?.items)
    }

    async fn get(&self, name: &str) -> Result<HostSubnet> {
        Ok(self.api.get(name).await?)
    }

    async fn create(&self, subnet: &HostSubnet) -> Result<HostSubnet> {
        Ok(self.api.create(&PostParams::default(), subnet).await?)
    }

    async fn replace(&self, subnet: &HostSubnet) -> Result<HostSubnet> {
        let name = subnet.metadata.name.as_deref().ok_or(Error::InvalidResource)?;
        Ok(self.api.replace(name, &PostParams::default(), subnet).await?)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}

pub(crate) struct KubeNodes {
    api: Api<Node>,
    store: Store<Node>,
}

impl KubeNodes {
    pub(crate) fn new(api: Api<Node>, store: Store<Node>) -> Self {
        Self { api, store }
    }
}

impl NodeLookup for KubeNodes {
    fn cached(&self, name: &str) -> Option<Arc<Node>> {
        self.store.get(&ObjectRef::new(name))
    }

    async fn fetch(&self, name: &str) -> Result<Node> {
        Ok(self.api.get(name).await?)
    }
}
