use std::collections::BTreeMap;

use dbdock_common::Instance;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDatabaseRequest {
    pub db_type: String,
    /// Generated when omitted.
    pub name: Option<String>,
    /// Host-side port; the first free suggestion is used when omitted.
    pub user_port: Option<u16>,
    pub internal_port: Option<u16>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateDatabaseRequest {
    pub new_env_vars: Option<BTreeMap<String, String>>,
    pub new_user_port: Option<u16>,
    pub new_internal_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusQuery {
    pub new_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseResponse {
    #[serde(flatten)]
    pub instance: Instance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_url: Option<String>,
}

/// Response to a status transition. `runtime_error` is set when a stop
/// intent succeeded at the registry but the container runtime reported a
/// failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateResponse {
    #[serde(flatten)]
    pub database: DatabaseResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_error: Option<String>,
}
