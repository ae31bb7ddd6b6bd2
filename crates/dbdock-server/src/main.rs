use bollard::Docker;
use dbdock_core::{
    DockerRuntime, InstanceRegistry, LifecycleConfig, LifecycleController, PortAllocator, TcpProbe,
};
use dbdock_server::{create_app, AppState};
use std::{net::SocketAddr, sync::Arc};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info,dbdock_server=debug,dbdock_core=debug")
        .init();

    let docker = Arc::new(Docker::connect_with_local_defaults()?);
    let registry = Arc::new(InstanceRegistry::new());
    let controller = Arc::new(LifecycleController::new(
        registry,
        PortAllocator::new(Arc::new(TcpProbe)),
        Arc::new(DockerRuntime::new(docker)),
        LifecycleConfig::default(),
    ));

    let public_host = std::env::var("DBDOCK_HOST").unwrap_or_else(|_| "localhost".to_string());
    let state = AppState {
        controller,
        public_host,
    };
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8000));
    info!("dbdock API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
