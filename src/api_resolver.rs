use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Config, Resource, ResourceExt};

/// Wraps a [`Client`] so the rest of the crate never has to choose between
/// `Api::all` and `Api::namespaced` itself.
#[derive(Clone)]
pub struct ApiResolver {
    pub client: Client,
    config: Config,

    /// For namespace-isolated tests.
    namespace: Option<String>,
}

impl ApiResolver {
    pub fn try_new(config: Config) -> kube::Result<Self> {
        let client = Client::try_from(config.clone())?;
        Ok(Self {
            client,
            config,
            namespace: None,
        })
    }

    pub fn try_new_within(config: Config, ns: &str) -> kube::Result<Self> {
        let client = Client::try_from(config.clone())?;
        Ok(Self {
            client,
            config,
            namespace: Some(String::from(ns)),
        })
    }

    pub fn all<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        if let Some(ns) = self.namespace.as_ref() {
            Api::namespaced(self.client.clone(), ns)
        } else {
            Api::all(self.client.clone())
        }
    }

    pub fn namespaced<K>(&self, ns: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), ns)
    }

    /// Namespace inferred from the kubeconfig/in-cluster context, used for
    /// namespace-scoped singletons this crate creates itself (the leader
    /// election `Lease`) rather than ones it only ever reads.
    pub fn default_namespace(&self) -> &str {
        &self.config.default_namespace
    }

    pub fn api_for<K>(&self, res: &K) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        if let Some(ns) = res.namespace() {
            Api::namespaced(self.client.clone(), &ns)
        } else {
            self.all()
        }
    }
}
