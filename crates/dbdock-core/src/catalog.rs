//! Static registry of supported database engines and their container
//! configuration. Adding an engine is a data change here; no caller needs to
//! change.

use dbdock_common::EngineKind;

/// What a configuration variable is for. Drives default generation and lets
/// callers reason about variables without sniffing their names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarRole {
    /// Credential material (passwords). Defaults are cryptographically random.
    Secret,
    /// A login handle (usernames).
    Identity,
    /// A database/schema identifier, constrained to the engine's identifier
    /// charset.
    Identifier,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvVarSpec {
    pub name: &'static str,
    pub role: VarRole,
}

/// Immutable configuration schema for one engine kind.
#[derive(Debug, Clone, Copy)]
pub struct EngineSpec {
    pub engine: EngineKind,
    pub image: &'static str,
    pub default_internal_port: u16,
    pub required: &'static [EnvVarSpec],
    pub optional: &'static [EnvVarSpec],
}

const MYSQL_REQUIRED: &[EnvVarSpec] = &[EnvVarSpec {
    name: "MYSQL_ROOT_PASSWORD",
    role: VarRole::Secret,
}];

const MYSQL_OPTIONAL: &[EnvVarSpec] = &[
    EnvVarSpec {
        name: "MYSQL_DATABASE",
        role: VarRole::Identifier,
    },
    EnvVarSpec {
        name: "MYSQL_USER",
        role: VarRole::Identity,
    },
    EnvVarSpec {
        name: "MYSQL_PASSWORD",
        role: VarRole::Secret,
    },
];

const POSTGRES_REQUIRED: &[EnvVarSpec] = &[EnvVarSpec {
    name: "POSTGRES_PASSWORD",
    role: VarRole::Secret,
}];

const POSTGRES_OPTIONAL: &[EnvVarSpec] = &[
    EnvVarSpec {
        name: "POSTGRES_USER",
        role: VarRole::Identity,
    },
    EnvVarSpec {
        name: "POSTGRES_DB",
        role: VarRole::Identifier,
    },
];

const MONGODB_OPTIONAL: &[EnvVarSpec] = &[
    EnvVarSpec {
        name: "MONGO_INITDB_ROOT_USERNAME",
        role: VarRole::Identity,
    },
    EnvVarSpec {
        name: "MONGO_INITDB_ROOT_PASSWORD",
        role: VarRole::Secret,
    },
    EnvVarSpec {
        name: "MONGO_INITDB_DATABASE",
        role: VarRole::Identifier,
    },
];

const REDIS_OPTIONAL: &[EnvVarSpec] = &[EnvVarSpec {
    name: "REDIS_PASSWORD",
    role: VarRole::Secret,
}];

static SPECS: [EngineSpec; 5] = [
    EngineSpec {
        engine: EngineKind::Mysql,
        image: "mysql:latest",
        default_internal_port: 3306,
        required: MYSQL_REQUIRED,
        optional: MYSQL_OPTIONAL,
    },
    EngineSpec {
        engine: EngineKind::Mariadb,
        image: "mariadb:latest",
        default_internal_port: 3306,
        required: MYSQL_REQUIRED,
        optional: MYSQL_OPTIONAL,
    },
    EngineSpec {
        engine: EngineKind::Postgres,
        image: "postgres:latest",
        default_internal_port: 5432,
        required: POSTGRES_REQUIRED,
        optional: POSTGRES_OPTIONAL,
    },
    EngineSpec {
        engine: EngineKind::Mongodb,
        image: "mongo:latest",
        default_internal_port: 27017,
        // Mongo starts without authentication unless root credentials are
        // supplied, so nothing is mandatory.
        required: &[],
        optional: MONGODB_OPTIONAL,
    },
    EngineSpec {
        engine: EngineKind::Redis,
        image: "redis:latest",
        default_internal_port: 6379,
        required: &[],
        optional: REDIS_OPTIONAL,
    },
];

/// Look up the configuration schema for an engine. Total over `EngineKind`;
/// unsupported engine strings are rejected when parsing the kind itself.
pub fn spec(engine: EngineKind) -> &'static EngineSpec {
    SPECS
        .iter()
        .find(|s| s.engine == engine)
        .expect("catalog covers every EngineKind variant")
}
