use k8s_openapi::api::apps::v1::{Deployment as KubeDeployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container as KubeContainer, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::Client;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Minimal view of a Kubernetes deployment, reduced to the fields the
/// webhook pipeline reads and writes. Snapshots only; every read and write
/// is a fresh round trip through a [`DeploymentApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub namespace: String,
    pub name: String,
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    pub image: String,
}

#[derive(Debug)]
pub enum DeploymentError {
    NotFound { namespace: String, name: String },
    MissingContainer { namespace: String, name: String },
    Backend(kube::Error),
}

impl std::error::Error for DeploymentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeploymentError::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for DeploymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentError::NotFound { namespace, name } => {
                write!(f, "deployment {}/{} not found", namespace, name)
            }
            DeploymentError::MissingContainer { namespace, name } => {
                write!(f, "deployment {}/{} has no containers", namespace, name)
            }
            DeploymentError::Backend(err) => {
                write!(f, "deployment backend request failed: {}", err)
            }
        }
    }
}

/// Read/update contract the pipeline depends on instead of a concrete
/// cluster client. `update_primary_image` is a read-modify-write with no
/// optimistic-concurrency check: concurrent updates to the same deployment
/// are last-write-wins, and a version conflict enforced by the backend
/// surfaces as [`DeploymentError::Backend`], never retried here.
pub trait DeploymentApi: Clone + Send + Sync + 'static {
    fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Deployment, DeploymentError>> + Send;

    /// Overwrites the image of the first container and persists the whole
    /// deployment object back.
    fn update_primary_image(
        &self,
        namespace: &str,
        name: &str,
        image: &str,
    ) -> impl Future<Output = Result<(), DeploymentError>> + Send;

    /// Seeds a deployment. Our deployment view is too minimal to create a
    /// production-grade object from scratch; this exists so tests can set up
    /// backend state without a real cluster.
    fn create_deployment(
        &self,
        deployment: &Deployment,
    ) -> impl Future<Output = Result<(), DeploymentError>> + Send;
}

impl Deployment {
    fn from_kubernetes(kd: &KubeDeployment) -> Self {
        let containers = kd
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .map(|ps| {
                ps.containers
                    .iter()
                    .map(|c| Container {
                        name: c.name.clone(),
                        image: c.image.clone().unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Deployment {
            namespace: kd.metadata.namespace.clone().unwrap_or_default(),
            name: kd.metadata.name.clone().unwrap_or_default(),
            containers,
        }
    }

    fn to_kubernetes(&self) -> KubeDeployment {
        let containers = self
            .containers
            .iter()
            .map(|c| KubeContainer {
                name: c.name.clone(),
                image: Some(c.image.clone()),
                ..Default::default()
            })
            .collect();

        KubeDeployment {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Live cluster implementation backed by the in-cluster (or kubeconfig)
/// Kubernetes API.
#[derive(Clone)]
pub struct KubeDeployments {
    client: Client,
}

impl KubeDeployments {
    pub async fn create() -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
        let api_server_info = client.apiserver_version().await?;
        info!(
            "Connected to namespace {}, Kubernetes API server with version {}.{}",
            client.default_namespace(),
            api_server_info.major,
            api_server_info.minor
        );
        Ok(KubeDeployments { client })
    }

    fn api(&self, namespace: &str) -> Api<KubeDeployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_kube_error(err: kube::Error, namespace: &str, name: &str) -> DeploymentError {
    match err {
        kube::Error::Api(ref response) if response.code == 404 => DeploymentError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        other => DeploymentError::Backend(other),
    }
}

impl DeploymentApi for KubeDeployments {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Deployment, DeploymentError> {
        let kd = self
            .api(namespace)
            .get(name)
            .await
            .map_err(|err| map_kube_error(err, namespace, name))?;
        Ok(Deployment::from_kubernetes(&kd))
    }

    async fn update_primary_image(
        &self,
        namespace: &str,
        name: &str,
        image: &str,
    ) -> Result<(), DeploymentError> {
        let api = self.api(namespace);
        let mut kd = api
            .get(name)
            .await
            .map_err(|err| map_kube_error(err, namespace, name))?;

        let container = kd
            .spec
            .as_mut()
            .and_then(|s| s.template.spec.as_mut())
            .and_then(|ps| ps.containers.first_mut())
            .ok_or_else(|| DeploymentError::MissingContainer {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        container.image = Some(image.to_string());

        debug!(
            "Replacing deployment {}/{} with primary container image {}",
            namespace, name, image
        );
        api.replace(name, &PostParams::default(), &kd)
            .await
            .map_err(|err| map_kube_error(err, namespace, name))?;
        Ok(())
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), DeploymentError> {
        let kd = deployment.to_kubernetes();
        self.api(&deployment.namespace)
            .create(&PostParams::default(), &kd)
            .await
            .map_err(|err| map_kube_error(err, &deployment.namespace, &deployment.name))?;
        Ok(())
    }
}

/// In-memory implementation for tests. Deployments are keyed by
/// (namespace, name) and shared across clones.
#[derive(Clone, Default)]
pub struct FakeDeployments {
    store: Arc<RwLock<HashMap<(String, String), Deployment>>>,
}

impl FakeDeployments {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeploymentApi for FakeDeployments {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Deployment, DeploymentError> {
        let store = self.store.read().unwrap();
        store
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| DeploymentError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn update_primary_image(
        &self,
        namespace: &str,
        name: &str,
        image: &str,
    ) -> Result<(), DeploymentError> {
        let mut store = self.store.write().unwrap();
        let deployment = store
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| DeploymentError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        let container =
            deployment
                .containers
                .first_mut()
                .ok_or_else(|| DeploymentError::MissingContainer {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })?;
        container.image = image.to_string();
        Ok(())
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), DeploymentError> {
        let mut store = self.store.write().unwrap();
        store.insert(
            (deployment.namespace.clone(), deployment.name.clone()),
            deployment.clone(),
        );
        Ok(())
    }
}
