//! Orchestrates create/update/start/stop/delete against the registry and the
//! container runtime, enforcing the instance state machine:
//!
//! `creating -> {stopped, error}`, `stopped <-> running`,
//! `{stopped, running, error} -> deleted`.
//!
//! Every mutating operation on one instance name is serialized by a per-name
//! mutex; operations on different names proceed concurrently. Runtime calls
//! are bounded by timeouts so an aborted or hung call lands the instance in
//! `error`, never a dangling `creating` record.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dbdock_common::{EngineKind, Instance, InstanceStatus, ProvisionError, Result};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::catalog::{self, EngineSpec};
use crate::credentials;
use crate::ports::PortAllocator;
use crate::registry::{InstanceChanges, InstanceRegistry};
use crate::runtime::{ContainerRuntime, MaterializeSpec};

#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    /// Generated when omitted.
    pub name: Option<String>,
    pub engine: EngineKind,
    /// Host-side port; the first free suggestion is used when omitted.
    pub user_port: Option<u16>,
    /// Container-side port; the engine default when omitted.
    pub internal_port: Option<u16>,
    pub env_vars: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub new_env_vars: Option<BTreeMap<String, String>>,
    pub new_user_port: Option<u16>,
    pub new_internal_port: Option<u16>,
}

/// Result of a stop intent. The status transition always succeeds; a runtime
/// failure is carried alongside instead of rolling the transition back.
#[derive(Debug, Clone)]
pub struct StopOutcome {
    pub instance: Instance,
    pub runtime_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Bound on image pull + container creation.
    pub materialize_timeout: Duration,
    /// Bound on start/stop/remove.
    pub op_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            materialize_timeout: Duration::from_secs(180),
            op_timeout: Duration::from_secs(30),
        }
    }
}

pub struct LifecycleController {
    registry: Arc<InstanceRegistry>,
    allocator: PortAllocator,
    runtime: Arc<dyn ContainerRuntime>,
    config: LifecycleConfig,
    /// Per-name serialization. Entries are kept for the process lifetime;
    /// dropping one while another task holds a clone would void the
    /// exclusion guarantee.
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Names whose configuration changed since the container was last
    /// materialized; the next start rebuilds the container first.
    stale: DashMap<String, ()>,
}

impl LifecycleController {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        allocator: PortAllocator,
        runtime: Arc<dyn ContainerRuntime>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            registry,
            allocator,
            runtime,
            config,
            locks: DashMap::new(),
            stale: DashMap::new(),
        }
    }

    fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn get(&self, name: &str) -> Result<Instance> {
        self.registry.get(name)
    }

    pub fn list(&self) -> Vec<Instance> {
        self.registry.list()
    }

    pub fn free_ports(&self, internal_port: u16, count: usize) -> Vec<u16> {
        self.allocator.free_ports(&self.registry, internal_port, count)
    }

    #[instrument(skip(self, req), fields(engine = %req.engine))]
    pub async fn create(&self, req: CreateRequest) -> Result<Instance> {
        let spec = catalog::spec(req.engine);
        let name = match req.name.filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => credentials::random_name(),
        };
        validate_name(&name)?;

        let mut env = req.env_vars;
        credentials::fill_defaults(spec, &mut env);
        ensure_required(spec, &env)?;
        let internal_port = req.internal_port.unwrap_or(spec.default_internal_port);

        let lock = self.name_lock(&name);
        let _guard = lock.lock().await;

        let user_port = match req.user_port {
            Some(port) => {
                if !self.allocator.host_free(port) {
                    return Err(ProvisionError::PortConflict(port));
                }
                port
            }
            None => self
                .allocator
                .free_ports(&self.registry, internal_port, 1)
                .first()
                .copied()
                .ok_or(ProvisionError::Exhausted)?,
        };

        // Commit re-checks name and port uniqueness atomically; the port
        // suggestion above was only advisory.
        let created = self.registry.create(Instance::new(
            name.clone(),
            req.engine,
            internal_port,
            user_port,
            env,
        ))?;
        info!(%name, user_port, "Instance record committed, materializing container");

        let materialize = MaterializeSpec {
            container_name: created.name.clone(),
            image: spec.image.to_string(),
            internal_port,
            user_port,
            env_vars: created.env_vars.clone(),
        };
        let mut cancel_guard = CancelGuard::arm(self.registry.as_ref(), &name);
        let outcome = timeout(
            self.config.materialize_timeout,
            self.runtime.materialize(&materialize),
        )
        .await;
        cancel_guard.disarm();
        match outcome {
            Ok(Ok(handle)) => {
                self.registry.set_container_id(&name, Some(handle))?;
                self.registry.set_status(&name, InstanceStatus::Stopped)
            }
            Ok(Err(e)) => {
                warn!(%name, error = %e, "Materialize failed, instance marked error");
                self.registry.set_status(&name, InstanceStatus::Error)?;
                Err(e.into())
            }
            Err(_) => {
                warn!(%name, "Materialize timed out, instance marked error");
                self.registry.set_status(&name, InstanceStatus::Error)?;
                Err(ProvisionError::Runtime(format!(
                    "materialize timed out after {:?}",
                    self.config.materialize_timeout
                )))
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn start(&self, name: &str) -> Result<Instance> {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;

        let instance = self.registry.get(name)?;
        if instance.status != InstanceStatus::Stopped {
            return Err(ProvisionError::InvalidState {
                operation: "start",
                status: instance.status,
            });
        }
        let spec = catalog::spec(instance.engine);
        ensure_required(spec, &instance.env_vars)?;
        if !self.allocator.host_free(instance.user_port) {
            return Err(ProvisionError::PortConflict(instance.user_port));
        }

        let mut cancel_guard = CancelGuard::arm(self.registry.as_ref(), name);
        let handle = match instance.container_id.clone() {
            Some(handle) if !self.stale.contains_key(name) => handle,
            previous => self.rematerialize(&instance, spec, previous).await?,
        };

        let outcome = timeout(self.config.op_timeout, self.runtime.start(&handle)).await;
        cancel_guard.disarm();
        match outcome {
            Ok(Ok(())) => self.registry.set_status(name, InstanceStatus::Running),
            Ok(Err(e)) => {
                warn!(%name, error = %e, "Runtime start failed");
                self.registry.set_status(name, InstanceStatus::Error)?;
                Err(e.into())
            }
            Err(_) => {
                warn!(%name, "Runtime start timed out");
                self.registry.set_status(name, InstanceStatus::Error)?;
                Err(ProvisionError::Runtime(format!(
                    "start timed out after {:?}",
                    self.config.op_timeout
                )))
            }
        }
    }

    /// Rebuild the container after a configuration change. The old container
    /// was created with the previous env/ports baked in, so starting it
    /// would resurrect the stale contract.
    async fn rematerialize(
        &self,
        instance: &Instance,
        spec: &EngineSpec,
        previous: Option<String>,
    ) -> Result<String> {
        if let Some(old) = previous {
            match timeout(self.config.op_timeout, self.runtime.remove(&old)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(name = %instance.name, error = %e, "Removing outdated container failed")
                }
                Err(_) => {
                    warn!(name = %instance.name, "Removing outdated container timed out")
                }
            }
        }

        let materialize = MaterializeSpec {
            container_name: instance.name.clone(),
            image: spec.image.to_string(),
            internal_port: instance.internal_port,
            user_port: instance.user_port,
            env_vars: instance.env_vars.clone(),
        };
        match timeout(
            self.config.materialize_timeout,
            self.runtime.materialize(&materialize),
        )
        .await
        {
            Ok(Ok(handle)) => {
                self.registry
                    .set_container_id(&instance.name, Some(handle.clone()))?;
                self.stale.remove(&instance.name);
                Ok(handle)
            }
            Ok(Err(e)) => {
                self.registry
                    .set_status(&instance.name, InstanceStatus::Error)?;
                Err(e.into())
            }
            Err(_) => {
                self.registry
                    .set_status(&instance.name, InstanceStatus::Error)?;
                Err(ProvisionError::Runtime(format!(
                    "materialize timed out after {:?}",
                    self.config.materialize_timeout
                )))
            }
        }
    }

    /// Stop intent always transitions to `stopped`; a runtime failure is
    /// reported in the outcome instead of rolling the status back, so the
    /// registry never claims a container is running that the operator asked
    /// to stop.
    #[instrument(skip(self))]
    pub async fn stop(&self, name: &str) -> Result<StopOutcome> {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;

        let instance = self.registry.get(name)?;
        if instance.status != InstanceStatus::Running {
            return Err(ProvisionError::InvalidState {
                operation: "stop",
                status: instance.status,
            });
        }
        let handle = instance.container_id.clone().ok_or_else(|| {
            ProvisionError::Runtime("running instance has no container handle".to_string())
        })?;

        let runtime_error = match timeout(self.config.op_timeout, self.runtime.stop(&handle)).await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                warn!(%name, error = %e, "Runtime stop failed, instance marked stopped anyway");
                Some(e.to_string())
            }
            Err(_) => {
                warn!(%name, "Runtime stop timed out, instance marked stopped anyway");
                Some(format!("stop timed out after {:?}", self.config.op_timeout))
            }
        };

        let instance = self.registry.set_status(name, InstanceStatus::Stopped)?;
        Ok(StopOutcome {
            instance,
            runtime_error,
        })
    }

    /// Merge configuration changes into a stopped instance. The runtime is
    /// not touched here; the next start rebuilds the container.
    #[instrument(skip(self, req))]
    pub async fn update(&self, name: &str, req: UpdateRequest) -> Result<Instance> {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;

        let current = self.registry.get(name)?;
        if current.status != InstanceStatus::Stopped {
            return Err(ProvisionError::InvalidState {
                operation: "update",
                status: current.status,
            });
        }

        let spec = catalog::spec(current.engine);
        let mut merged = current.env_vars.clone();
        if let Some(env) = &req.new_env_vars {
            merged.extend(env.clone());
        }
        ensure_required(spec, &merged)?;

        if let Some(port) = req.new_user_port {
            if port != current.user_port && !self.allocator.host_free(port) {
                return Err(ProvisionError::PortConflict(port));
            }
        }

        let changed = req.new_env_vars.is_some()
            || req.new_user_port.is_some_and(|p| p != current.user_port)
            || req
                .new_internal_port
                .is_some_and(|p| p != current.internal_port);
        let updated = self.registry.update(
            name,
            InstanceChanges {
                env_vars: req.new_env_vars,
                user_port: req.new_user_port,
                internal_port: req.new_internal_port,
            },
        )?;
        if changed {
            self.stale.insert(name.to_string(), ());
        }
        Ok(updated)
    }

    /// Tear the instance down: best-effort stop and container removal, then
    /// the registry record goes away and the name and port become reusable.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<()> {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;

        let instance = self.registry.get(name)?;
        if let Some(handle) = &instance.container_id {
            if instance.status == InstanceStatus::Running {
                match timeout(self.config.op_timeout, self.runtime.stop(handle)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(%name, error = %e, "Runtime stop during delete failed"),
                    Err(_) => warn!(%name, "Runtime stop during delete timed out"),
                }
            }
            match timeout(self.config.op_timeout, self.runtime.remove(handle)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(%name, error = %e, "Runtime removal failed, record deleted anyway")
                }
                Err(_) => warn!(%name, "Runtime removal timed out, record deleted anyway"),
            }
        }

        self.registry.delete(name)?;
        self.stale.remove(name);
        info!(%name, "Instance deleted");
        Ok(())
    }
}

/// Flips the instance to `error` if the owning future is dropped while a
/// runtime call is in flight. Handler futures are cancelled when the client
/// disconnects; without this, an aborted create would strand the committed
/// record in `creating` forever.
struct CancelGuard<'a> {
    registry: &'a InstanceRegistry,
    name: &'a str,
    armed: bool,
}

impl<'a> CancelGuard<'a> {
    fn arm(registry: &'a InstanceRegistry, name: &'a str) -> Self {
        Self {
            registry,
            name,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(name = %self.name, "Operation cancelled mid-flight, instance marked error");
            let _ = self.registry.set_status(self.name, InstanceStatus::Error);
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    let starts_ok = name
        .chars()
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false);
    let chars_ok = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if starts_ok && chars_ok && name.len() <= 63 {
        Ok(())
    } else {
        Err(ProvisionError::Validation(format!(
            "invalid instance name: {name:?} (alphanumeric plus '-', '_', '.', max 63 chars)"
        )))
    }
}

fn ensure_required(spec: &EngineSpec, env: &BTreeMap<String, String>) -> Result<()> {
    for var in spec.required {
        if env.get(var.name).map(|v| !v.is_empty()) != Some(true) {
            return Err(ProvisionError::Validation(format!(
                "missing required environment variable: {}",
                var.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockRuntime, StaticProbe};

    fn controller(runtime: MockRuntime) -> (Arc<LifecycleController>, Arc<InstanceRegistry>) {
        controller_with_probe(runtime, StaticProbe::all_free())
    }

    fn controller_with_probe(
        runtime: MockRuntime,
        probe: StaticProbe,
    ) -> (Arc<LifecycleController>, Arc<InstanceRegistry>) {
        let registry = Arc::new(InstanceRegistry::new());
        let controller = Arc::new(LifecycleController::new(
            registry.clone(),
            PortAllocator::new(Arc::new(probe)),
            Arc::new(runtime),
            LifecycleConfig::default(),
        ));
        (controller, registry)
    }

    fn mysql_request(name: &str) -> CreateRequest {
        CreateRequest {
            name: Some(name.to_string()),
            engine: EngineKind::Mysql,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_fills_credentials_and_lands_stopped() {
        let (controller, _) = controller(MockRuntime::new());

        let instance = controller.create(mysql_request("shop-db")).await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Stopped);
        assert_eq!(instance.container_id.as_deref(), Some("ctr-shop-db"));
        assert!(instance.env_vars["MYSQL_ROOT_PASSWORD"].len() >= 16);
        assert!(instance.env_vars.contains_key("MYSQL_DATABASE"));
        // Internal port defaulted from the catalog, public port from the scan.
        assert_eq!(instance.internal_port, 3306);
        assert_eq!(instance.user_port, 3306);
    }

    #[tokio::test]
    async fn test_create_generates_name_when_omitted() {
        let (controller, _) = controller(MockRuntime::new());
        let instance = controller
            .create(CreateRequest {
                engine: EngineKind::Redis,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!instance.name.is_empty());
        assert!(instance.name.contains('-'));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_name() {
        let (controller, _) = controller(MockRuntime::new());
        let err = controller
            .create(CreateRequest {
                name: Some("bad name!".to_string()),
                engine: EngineKind::Redis,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
    }

    #[tokio::test]
    async fn test_concurrent_same_name_creates_one_wins() {
        let (controller, _) = controller(MockRuntime::new());

        let (a, b) = tokio::join!(
            controller.create(mysql_request("shared")),
            controller.create(mysql_request("shared")),
        );
        let conflicts = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(ProvisionError::NameConflict(_))))
            .count();
        assert_eq!(conflicts, 1, "exactly one create must lose: {a:?} / {b:?}");
        assert_eq!([&a, &b].iter().filter(|r| r.is_ok()).count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_creates_never_share_a_port() {
        let (controller, _) = controller(MockRuntime::new());

        let (a, b) = tokio::join!(
            controller.create(mysql_request("first")),
            controller.create(mysql_request("second")),
        );
        match (a, b) {
            (Ok(a), Ok(b)) => assert_ne!(a.user_port, b.user_port),
            (Ok(_), Err(e)) | (Err(e), Ok(_)) => {
                assert!(matches!(e, ProvisionError::PortConflict(_)))
            }
            (Err(a), Err(b)) => panic!("both creates failed: {a} / {b}"),
        }
    }

    #[tokio::test]
    async fn test_create_with_explicit_taken_port_conflicts() {
        let (controller, _) = controller(MockRuntime::new());
        controller
            .create(CreateRequest {
                user_port: Some(13306),
                ..mysql_request("first")
            })
            .await
            .unwrap();

        let err = controller
            .create(CreateRequest {
                user_port: Some(13306),
                ..mysql_request("second")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::PortConflict(13306)));
    }

    #[tokio::test]
    async fn test_materialize_failure_lands_in_error_and_delete_reclaims() {
        let (controller, _) = controller(MockRuntime::new().failing_materialize());

        let err = controller.create(mysql_request("broken")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Runtime(_)));
        assert_eq!(
            controller.get("broken").unwrap().status,
            InstanceStatus::Error
        );

        // The error record is reclaimable; afterwards the name is free again.
        controller.delete("broken").await.unwrap();
        controller.create(mysql_request("broken")).await.unwrap();
    }

    #[tokio::test]
    async fn test_materialize_timeout_marks_error() {
        let registry = Arc::new(InstanceRegistry::new());
        let controller = LifecycleController::new(
            registry,
            PortAllocator::new(Arc::new(StaticProbe::all_free())),
            Arc::new(MockRuntime::new().with_materialize_delay(Duration::from_secs(5))),
            LifecycleConfig {
                materialize_timeout: Duration::from_millis(20),
                op_timeout: Duration::from_millis(20),
            },
        );

        let err = controller.create(mysql_request("slow")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Runtime(_)));
        assert_eq!(controller.get("slow").unwrap().status, InstanceStatus::Error);
    }

    #[tokio::test]
    async fn test_aborted_create_lands_in_error_not_creating() {
        let registry = Arc::new(InstanceRegistry::new());
        let controller = Arc::new(LifecycleController::new(
            registry.clone(),
            PortAllocator::new(Arc::new(StaticProbe::all_free())),
            Arc::new(MockRuntime::new().with_materialize_delay(Duration::from_secs(60))),
            LifecycleConfig::default(),
        ));

        let create = tokio::spawn({
            let controller = controller.clone();
            async move { controller.create(mysql_request("doomed")).await }
        });
        // Let the task commit its record and block inside the runtime call,
        // then drop it the way a disconnected client would.
        tokio::time::sleep(Duration::from_millis(50)).await;
        create.abort();
        assert!(create.await.unwrap_err().is_cancelled());

        let instance = registry.get("doomed").unwrap();
        assert_eq!(instance.status, InstanceStatus::Error);
    }

    #[tokio::test]
    async fn test_start_stop_round_trip() {
        let (controller, _) = controller(MockRuntime::new());
        controller.create(mysql_request("db")).await.unwrap();

        let started = controller.start("db").await.unwrap();
        assert_eq!(started.status, InstanceStatus::Running);

        let outcome = controller.stop("db").await.unwrap();
        assert_eq!(outcome.instance.status, InstanceStatus::Stopped);
        assert!(outcome.runtime_error.is_none());
    }

    #[tokio::test]
    async fn test_start_only_from_stopped() {
        let (controller, _) = controller(MockRuntime::new());
        controller.create(mysql_request("db")).await.unwrap();
        controller.start("db").await.unwrap();

        let err = controller.start("db").await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::InvalidState {
                operation: "start",
                status: InstanceStatus::Running,
            }
        ));
    }

    #[tokio::test]
    async fn test_start_rejects_missing_required_var_before_runtime() {
        let runtime = Arc::new(MockRuntime::new());
        let registry = Arc::new(InstanceRegistry::new());
        let controller = LifecycleController::new(
            registry.clone(),
            PortAllocator::new(Arc::new(StaticProbe::all_free())),
            runtime.clone(),
            LifecycleConfig::default(),
        );

        // A record whose required secret never got set.
        let mut instance = Instance::new(
            "hollow".to_string(),
            EngineKind::Postgres,
            5432,
            15432,
            BTreeMap::new(),
        );
        instance.status = InstanceStatus::Stopped;
        instance.container_id = Some("ctr-hollow".to_string());
        registry.create(instance).unwrap();

        let err = controller.start("hollow").await.unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
        assert!(runtime.calls().is_empty(), "runtime must not be touched");
    }

    #[tokio::test]
    async fn test_update_rejects_host_bound_port() {
        let (controller, _) = controller_with_probe(
            MockRuntime::new(),
            StaticProbe::with_busy(&[23306]),
        );
        controller
            .create(CreateRequest {
                user_port: Some(13306),
                ..mysql_request("db")
            })
            .await
            .unwrap();
        // Move to a port some other process has since grabbed.
        controller
            .update(
                "db",
                UpdateRequest {
                    new_user_port: Some(23306),
                    ..Default::default()
                },
            )
            .await
            .map(|_| ())
            .unwrap_err();
    }

    #[tokio::test]
    async fn test_stop_failure_still_lands_stopped_with_error_reported() {
        let (controller, _) = controller(MockRuntime::new().failing_stop());
        controller.create(mysql_request("cache")).await.unwrap();
        controller.start("cache").await.unwrap();

        let outcome = controller.stop("cache").await.unwrap();
        assert_eq!(outcome.instance.status, InstanceStatus::Stopped);
        let reported = outcome.runtime_error.expect("runtime error must surface");
        assert!(reported.contains("scripted stop failure"));
    }

    #[tokio::test]
    async fn test_update_only_while_stopped() {
        let (controller, _) = controller(MockRuntime::new());
        controller.create(mysql_request("db")).await.unwrap();
        controller.start("db").await.unwrap();

        let err = controller
            .update(
                "db",
                UpdateRequest {
                    new_user_port: Some(23306),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::InvalidState {
                operation: "update",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_update_marks_container_for_rebuild_on_next_start() {
        let runtime = Arc::new(MockRuntime::new());
        let registry = Arc::new(InstanceRegistry::new());
        let controller = LifecycleController::new(
            registry,
            PortAllocator::new(Arc::new(StaticProbe::all_free())),
            runtime.clone(),
            LifecycleConfig::default(),
        );
        controller.create(mysql_request("db")).await.unwrap();

        let mut env = BTreeMap::new();
        env.insert("MYSQL_DATABASE".to_string(), "renamed".to_string());
        controller
            .update(
                "db",
                UpdateRequest {
                    new_env_vars: Some(env),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        controller.start("db").await.unwrap();
        let calls = runtime.calls();
        // Old container removed, a fresh one materialized, then started.
        assert_eq!(
            calls,
            vec![
                "materialize:db",
                "remove:ctr-db",
                "materialize:db",
                "start:ctr-db"
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_forces_stop_and_is_final() {
        let runtime = Arc::new(MockRuntime::new());
        let registry = Arc::new(InstanceRegistry::new());
        let controller = LifecycleController::new(
            registry,
            PortAllocator::new(Arc::new(StaticProbe::all_free())),
            runtime.clone(),
            LifecycleConfig::default(),
        );
        controller.create(mysql_request("db")).await.unwrap();
        controller.start("db").await.unwrap();

        controller.delete("db").await.unwrap();
        let calls = runtime.calls();
        assert!(calls.contains(&"stop:ctr-db".to_string()));
        assert!(calls.contains(&"remove:ctr-db".to_string()));

        assert!(matches!(
            controller.delete("db").await.unwrap_err(),
            ProvisionError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_free_ports_reflect_live_registry() {
        let (controller, _) = controller(MockRuntime::new());
        let before = controller.free_ports(5432, 3);
        assert_eq!(before, vec![5432, 5433, 5434]);

        controller
            .create(CreateRequest {
                name: Some("pg".to_string()),
                engine: EngineKind::Postgres,
                user_port: Some(5432),
                ..Default::default()
            })
            .await
            .unwrap();

        let after = controller.free_ports(5432, 3);
        assert_eq!(after, vec![5433, 5434, 5435]);
    }
}
