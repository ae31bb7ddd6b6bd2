//! Authoritative set of provisioned instances.
//!
//! Name uniqueness and port ownership are both decided here, inside one
//! critical section, so two concurrent creates that were suggested the same
//! port cannot both commit it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dbdock_common::{Instance, InstanceStatus, ProvisionError, Result};

/// Partial mutation applied by `update`. `None` fields are left untouched;
/// env vars are merged key-by-key over the existing mapping.
#[derive(Debug, Clone, Default)]
pub struct InstanceChanges {
    pub env_vars: Option<BTreeMap<String, String>>,
    pub user_port: Option<u16>,
    pub internal_port: Option<u16>,
}

#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: DashMap<String, Instance>,
    /// Host port -> owning instance name. Every instance reserves its port
    /// for its whole lifetime, running or not.
    ports: Mutex<HashMap<u16, String>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self) -> MutexGuard<'_, HashMap<u16, String>> {
        self.ports.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commit a new instance. Re-checks name and port uniqueness atomically;
    /// any earlier free-port suggestion was advisory only.
    pub fn create(&self, instance: Instance) -> Result<Instance> {
        match self.instances.entry(instance.name.clone()) {
            Entry::Occupied(_) => Err(ProvisionError::NameConflict(instance.name)),
            Entry::Vacant(slot) => {
                let mut ports = self.ledger();
                if ports.contains_key(&instance.user_port) {
                    return Err(ProvisionError::PortConflict(instance.user_port));
                }
                ports.insert(instance.user_port, instance.name.clone());
                drop(ports);
                slot.insert(instance.clone());
                Ok(instance)
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<Instance> {
        self.instances
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ProvisionError::NotFound(name.to_string()))
    }

    /// All instances, sorted by name for stable listings.
    pub fn list(&self) -> Vec<Instance> {
        let mut all: Vec<Instance> = self
            .instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Merge partial changes into a stopped instance. Port swaps re-validate
    /// the ledger inside the same critical section that records them.
    pub fn update(&self, name: &str, changes: InstanceChanges) -> Result<Instance> {
        let mut entry = self
            .instances
            .get_mut(name)
            .ok_or_else(|| ProvisionError::NotFound(name.to_string()))?;
        let instance = entry.value_mut();

        if instance.status != InstanceStatus::Stopped {
            return Err(ProvisionError::InvalidState {
                operation: "update",
                status: instance.status,
            });
        }

        if let Some(new_port) = changes.user_port {
            if new_port != instance.user_port {
                let mut ports = self.ledger();
                if ports.contains_key(&new_port) {
                    return Err(ProvisionError::PortConflict(new_port));
                }
                ports.remove(&instance.user_port);
                ports.insert(new_port, instance.name.clone());
                drop(ports);
                instance.user_port = new_port;
            }
        }

        if let Some(port) = changes.internal_port {
            instance.internal_port = port;
        }

        if let Some(env) = changes.env_vars {
            instance.env_vars.extend(env);
        }

        instance.updated_at = Utc::now();
        Ok(instance.clone())
    }

    pub fn set_status(&self, name: &str, status: InstanceStatus) -> Result<Instance> {
        let mut entry = self
            .instances
            .get_mut(name)
            .ok_or_else(|| ProvisionError::NotFound(name.to_string()))?;
        let instance = entry.value_mut();
        instance.status = status;
        instance.updated_at = Utc::now();
        Ok(instance.clone())
    }

    pub fn set_container_id(&self, name: &str, container_id: Option<String>) -> Result<Instance> {
        let mut entry = self
            .instances
            .get_mut(name)
            .ok_or_else(|| ProvisionError::NotFound(name.to_string()))?;
        let instance = entry.value_mut();
        instance.container_id = container_id;
        instance.updated_at = Utc::now();
        Ok(instance.clone())
    }

    /// Remove the record and release its port reservation.
    pub fn delete(&self, name: &str) -> Result<Instance> {
        let (_, instance) = self
            .instances
            .remove(name)
            .ok_or_else(|| ProvisionError::NotFound(name.to_string()))?;
        self.ledger().remove(&instance.user_port);
        Ok(instance)
    }

    pub fn is_port_reserved(&self, port: u16) -> bool {
        self.ledger().contains_key(&port)
    }
}
