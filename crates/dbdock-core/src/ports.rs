//! Free host port discovery.
//!
//! Suggestions are advisory: availability changes between the scan and the
//! commit, so the registry re-checks ownership when an instance is written.

use std::sync::Arc;

use crate::registry::InstanceRegistry;

/// Seam over the host network, so tests can run without binding sockets.
pub trait HostPortProbe: Send + Sync {
    fn is_free(&self, port: u16) -> bool;
}

/// Probes by attempting a TCP bind on the wildcard address.
#[derive(Debug, Default)]
pub struct TcpProbe;

impl HostPortProbe for TcpProbe {
    fn is_free(&self, port: u16) -> bool {
        std::net::TcpListener::bind(("0.0.0.0", port)).is_ok()
    }
}

pub struct PortAllocator {
    probe: Arc<dyn HostPortProbe>,
}

impl PortAllocator {
    /// How many candidates the HTTP surface offers per request.
    pub const DEFAULT_COUNT: usize = 10;

    const FIRST_UNPRIVILEGED: u16 = 1024;

    pub fn new(probe: Arc<dyn HostPortProbe>) -> Self {
        Self { probe }
    }

    pub fn host_free(&self, port: u16) -> bool {
        self.probe.is_free(port)
    }

    /// Up to `count` free host ports, ascending.
    ///
    /// The scan starts at `internal_port` purely as a hint for the band the
    /// UI offers first; which host ports are actually free has nothing to do
    /// with the container-side port. Results are recomputed on every call,
    /// never cached. An empty result signals exhaustion, not an error.
    pub fn free_ports(
        &self,
        registry: &InstanceRegistry,
        internal_port: u16,
        count: usize,
    ) -> Vec<u16> {
        let start = internal_port.max(Self::FIRST_UNPRIVILEGED);
        let mut free = Vec::with_capacity(count);
        for port in start..=u16::MAX {
            if free.len() == count {
                break;
            }
            if registry.is_port_reserved(port) {
                continue;
            }
            if self.probe.is_free(port) {
                free.push(port);
            }
        }
        free
    }
}
