//! Container runtime seam and its Docker implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use dbdock_common::ProvisionError;
use futures::StreamExt;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("image pull failed: {0}")]
    PullFailed(#[source] BollardError),
    #[error("container creation failed: {0}")]
    CreationFailed(#[source] BollardError),
    #[error("container start failed: {0}")]
    StartFailed(#[source] BollardError),
    #[error("container stop failed: {0}")]
    StopFailed(#[source] BollardError),
    #[error("container removal failed: {0}")]
    RemovalFailed(#[source] BollardError),
    #[error("docker API error: {0}")]
    DockerApi(#[from] BollardError),
    #[error("internal runtime error: {0}")]
    Internal(String),
}

// The common taxonomy keeps the cause text so callers always see what the
// runtime reported.
impl From<RuntimeError> for ProvisionError {
    fn from(err: RuntimeError) -> Self {
        ProvisionError::Runtime(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Everything the runtime needs to materialize one database container.
#[derive(Debug, Clone)]
pub struct MaterializeSpec {
    pub container_name: String,
    pub image: String,
    pub internal_port: u16,
    pub user_port: u16,
    pub env_vars: BTreeMap<String, String>,
}

/// Narrow interface over the container engine. Each call is potentially slow
/// and fallible; the lifecycle layer bounds them with timeouts.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull the image and create (but do not start) the container.
    /// Returns the runtime handle for later start/stop/remove calls.
    async fn materialize(&self, spec: &MaterializeSpec) -> Result<String>;
    async fn start(&self, handle: &str) -> Result<()>;
    async fn stop(&self, handle: &str) -> Result<()>;
    async fn remove(&self, handle: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct DockerRuntime {
    docker: Arc<Docker>,
}

impl DockerRuntime {
    pub fn new(docker: Arc<Docker>) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    #[instrument(skip(self, spec), fields(name = %spec.container_name, image = %spec.image))]
    async fn materialize(&self, spec: &MaterializeSpec) -> Result<String> {
        info!("Pulling image...");
        let mut pull = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: spec.image.clone(),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = pull.next().await {
            progress.map_err(RuntimeError::PullFailed)?;
        }

        let container_port = format!("{}/tcp", spec.internal_port);
        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            container_port.clone(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(spec.user_port.to_string()),
            }]),
        );
        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(container_port, HashMap::new());

        let env: Vec<String> = spec
            .env_vars
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.container_name.clone(),
                    ..Default::default()
                }),
                Config {
                    image: Some(spec.image.clone()),
                    env: Some(env),
                    exposed_ports: Some(exposed_ports),
                    host_config: Some(HostConfig {
                        port_bindings: Some(port_bindings),
                        restart_policy: Some(RestartPolicy {
                            name: Some(RestartPolicyNameEnum::ALWAYS),
                            maximum_retry_count: None,
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .map_err(RuntimeError::CreationFailed)?;

        info!(container_id = %created.id, "Container created");
        Ok(created.id)
    }

    #[instrument(skip(self))]
    async fn start(&self, handle: &str) -> Result<()> {
        self.docker
            .start_container(handle, None::<StartContainerOptions<String>>)
            .await
            .map_err(RuntimeError::StartFailed)
    }

    #[instrument(skip(self))]
    async fn stop(&self, handle: &str) -> Result<()> {
        self.docker
            .stop_container(handle, Some(StopContainerOptions { t: 10 }))
            .await
            .map_err(RuntimeError::StopFailed)
    }

    #[instrument(skip(self))]
    async fn remove(&self, handle: &str) -> Result<()> {
        let options = Some(RemoveContainerOptions {
            force: true,
            ..Default::default()
        });
        match self.docker.remove_container(handle, options).await {
            Ok(()) => Ok(()),
            // Already gone is fine for teardown.
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                warn!(%handle, "Container already removed");
                Ok(())
            }
            Err(e) => Err(RuntimeError::RemovalFailed(e)),
        }
    }
}
