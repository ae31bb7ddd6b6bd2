//! Default secrets, handles and identifiers for new instances.
//!
//! Values are generated fresh on every call; determinism is deliberately not
//! offered. Caller-supplied values are never overwritten, only gaps are
//! filled.

use std::collections::BTreeMap;

use rand::distr::Alphanumeric;
use rand::Rng;

use crate::catalog::{EngineSpec, VarRole};

const SECRET_LEN: usize = 20;
const HANDLE_LEN: usize = 10;

const ADJECTIVES: &[&str] = &[
    "brave", "calm", "clever", "eager", "fancy", "gentle", "happy", "jolly", "keen", "lively",
    "mellow", "noble", "proud", "quick", "quiet", "sharp", "sleek", "steady", "swift", "wise",
];

const COLORS: &[&str] = &[
    "amber", "azure", "coral", "crimson", "emerald", "golden", "indigo", "ivory", "jade",
    "maroon", "olive", "scarlet", "silver", "teal", "violet",
];

const ANIMALS: &[&str] = &[
    "badger", "bison", "falcon", "ferret", "heron", "ibex", "jaguar", "lemur", "lynx", "marmot",
    "otter", "panda", "puffin", "raven", "salmon", "stoat", "tapir", "walrus", "wren", "yak",
];

/// Cryptographically random alphanumeric secret.
pub fn random_secret() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}

/// Random lowercase login handle.
pub fn random_handle() -> String {
    let mut rng = rand::rng();
    // Lead with a letter so the handle is valid for every engine.
    let mut handle = String::with_capacity(HANDLE_LEN);
    handle.push(char::from(rng.random_range(b'a'..=b'z')));
    while handle.len() < HANDLE_LEN {
        handle.push(
            char::from(rng.sample(Alphanumeric))
                .to_ascii_lowercase(),
        );
    }
    handle
}

fn random_slug(separator: char) -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let color = COLORS[rng.random_range(0..COLORS.len())];
    let animal = ANIMALS[rng.random_range(0..ANIMALS.len())];
    format!("{adjective}{separator}{color}{separator}{animal}")
}

/// Readable adjective-color-animal name for a new instance.
pub fn random_name() -> String {
    random_slug('-')
}

/// Readable database identifier. Underscore-joined so it stays inside the
/// identifier charset of every supported engine.
pub fn random_identifier() -> String {
    random_slug('_')
}

fn default_for(role: VarRole) -> String {
    match role {
        VarRole::Secret => random_secret(),
        VarRole::Identity => random_handle(),
        VarRole::Identifier => random_identifier(),
    }
}

/// Fill configuration gaps for a new instance.
///
/// Every missing required variable gets a role-appropriate default. Among
/// optional variables only identifiers (database names) are defaulted:
/// generating optional users or passwords would silently change which
/// credentials the engine image provisions.
pub fn fill_defaults(spec: &EngineSpec, env: &mut BTreeMap<String, String>) {
    for var in spec.required {
        if !env.contains_key(var.name) {
            env.insert(var.name.to_string(), default_for(var.role));
        }
    }
    for var in spec.optional {
        if var.role == VarRole::Identifier && !env.contains_key(var.name) {
            env.insert(var.name.to_string(), random_identifier());
        }
    }
}
