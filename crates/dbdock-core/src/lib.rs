//! Provisioning core for containerized database instances.
//!
//! The pieces compose leaf-first: [`catalog`] knows what each engine needs,
//! [`credentials`] fills configuration gaps, [`ports`] suggests free host
//! ports, [`registry`] owns the authoritative instance set, [`resolver`]
//! derives connection URLs, and [`lifecycle`] orchestrates everything
//! against the container [`runtime`].

// Re-export dependencies potentially needed by consumers (like the server)
pub use bollard;
pub use dbdock_common as common;

pub mod catalog;
pub mod credentials;
pub mod lifecycle;
pub mod ports;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod test_utils;

pub use lifecycle::{
    CreateRequest, LifecycleConfig, LifecycleController, StopOutcome, UpdateRequest,
};
pub use ports::{HostPortProbe, PortAllocator, TcpProbe};
pub use registry::InstanceRegistry;
pub use runtime::{ContainerRuntime, DockerRuntime};
