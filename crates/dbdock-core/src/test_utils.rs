//! Scriptable runtime and host-probe doubles for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::ports::HostPortProbe;
use crate::runtime::{ContainerRuntime, MaterializeSpec, Result, RuntimeError};

/// Records every call and can be scripted to fail or stall per operation.
#[derive(Debug, Default)]
pub struct MockRuntime {
    calls: Mutex<Vec<String>>,
    fail_materialize: AtomicBool,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    fail_remove: AtomicBool,
    materialize_delay: Mutex<Option<Duration>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_materialize(self) -> Self {
        self.fail_materialize.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_start(self) -> Self {
        self.fail_start.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_stop(self) -> Self {
        self.fail_stop.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_remove(self) -> Self {
        self.fail_remove.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_materialize_delay(self, delay: Duration) -> Self {
        *self
            .materialize_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: String) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn materialize(&self, spec: &MaterializeSpec) -> Result<String> {
        self.record(format!("materialize:{}", spec.container_name));
        let delay = *self
            .materialize_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_materialize.load(Ordering::SeqCst) {
            return Err(RuntimeError::Internal("scripted materialize failure".to_string()));
        }
        Ok(format!("ctr-{}", spec.container_name))
    }

    async fn start(&self, handle: &str) -> Result<()> {
        self.record(format!("start:{handle}"));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(RuntimeError::Internal("scripted start failure".to_string()));
        }
        Ok(())
    }

    async fn stop(&self, handle: &str) -> Result<()> {
        self.record(format!("stop:{handle}"));
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(RuntimeError::Internal("scripted stop failure".to_string()));
        }
        Ok(())
    }

    async fn remove(&self, handle: &str) -> Result<()> {
        self.record(format!("remove:{handle}"));
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(RuntimeError::Internal("scripted remove failure".to_string()));
        }
        Ok(())
    }
}

/// Deterministic host probe.
#[derive(Debug, Clone)]
pub enum StaticProbe {
    AllFree,
    AllBusy,
    Busy(HashSet<u16>),
}

impl StaticProbe {
    pub fn all_free() -> Self {
        StaticProbe::AllFree
    }

    pub fn all_busy() -> Self {
        StaticProbe::AllBusy
    }

    pub fn with_busy(ports: &[u16]) -> Self {
        StaticProbe::Busy(ports.iter().copied().collect())
    }
}

impl HostPortProbe for StaticProbe {
    fn is_free(&self, port: u16) -> bool {
        match self {
            StaticProbe::AllFree => true,
            StaticProbe::AllBusy => false,
            StaticProbe::Busy(busy) => !busy.contains(&port),
        }
    }
}
