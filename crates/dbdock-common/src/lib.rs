// Re-export dependencies used in public interfaces of common types

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("instance name already in use: {0}")]
    NameConflict(String),

    #[error("port {0} is already bound to another instance")]
    PortConflict(u16),

    #[error("no such instance: {0}")]
    NotFound(String),

    #[error("{operation} is not allowed while instance is {status}")]
    InvalidState {
        operation: &'static str,
        status: InstanceStatus,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("container runtime failure: {0}")]
    Runtime(String),

    #[error("no free host ports available")]
    Exhausted,
}

// Define the primary Result type for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// The kind of database technology an instance runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// The most commonly provisioned engine, and the default in clients.
    #[default]
    Mysql,
    Mariadb,
    Postgres,
    Mongodb,
    Redis,
}

impl EngineKind {
    pub const ALL: [EngineKind; 5] = [
        EngineKind::Mysql,
        EngineKind::Mariadb,
        EngineKind::Postgres,
        EngineKind::Mongodb,
        EngineKind::Redis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Mysql => "mysql",
            EngineKind::Mariadb => "mariadb",
            EngineKind::Postgres => "postgres",
            EngineKind::Mongodb => "mongodb",
            EngineKind::Redis => "redis",
        }
    }
}

impl Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        // "postgresql" is accepted as an alias for callers migrating from
        // older clients that used the long form.
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(EngineKind::Mysql),
            "mariadb" => Ok(EngineKind::Mariadb),
            "postgres" | "postgresql" => Ok(EngineKind::Postgres),
            "mongodb" | "mongo" => Ok(EngineKind::Mongodb),
            "redis" => Ok(EngineKind::Redis),
            other => Err(ProvisionError::Validation(format!(
                "unsupported database type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Creating,
    Stopped,
    Running,
    Error,
}

impl Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceStatus::Creating => "creating",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Running => "running",
            InstanceStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// One provisioned, named database deployment and its configuration/state.
///
/// `name` and `engine` are immutable after creation. `user_port` and
/// `env_vars` may only change while the instance is stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    #[serde(rename = "db_type")]
    pub engine: EngineKind,
    pub internal_port: u16,
    pub user_port: u16,
    pub status: InstanceStatus,
    pub env_vars: BTreeMap<String, String>,
    /// Identifier handed back by the container runtime, once materialized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    pub fn new(
        name: String,
        engine: EngineKind,
        internal_port: u16,
        user_port: u16,
        env_vars: BTreeMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name,
            engine,
            internal_port,
            user_port,
            status: InstanceStatus::Creating,
            env_vars,
            container_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
