//! Local port arena for `kubectl port-forward`.

use std::collections::HashMap;
use std::net::TcpListener;
use std::ops::Range;
use std::sync::Mutex;

use crate::sidecar::error::{Result, SidecarError};

/// Hands out local ports from a fixed range, one per owner.
///
/// The lock is only held for bookkeeping, never across an await.
#[derive(Debug)]
pub struct PortAllocator {
    range: Range<u16>,
    assigned: Mutex<HashMap<String, u16>>,
}

impl PortAllocator {
    pub fn new(range: Range<u16>) -> Self {
        Self {
            range,
            assigned: Mutex::new(HashMap::new()),
        }
    }

    /// Port already held by `owner`, or a fresh one that is free on the host.
    pub fn allocate(&self, owner: &str) -> Result<u16> {
        let mut assigned = self
            .assigned
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(port) = assigned.get(owner) {
            return Ok(*port);
        }

        let taken: Vec<u16> = assigned.values().copied().collect();
        let port = self
            .range
            .clone()
            .find(|p| !taken.contains(p) && host_port_free(*p))
            .ok_or(SidecarError::PortsExhausted {
                start: self.range.start,
                end: self.range.end,
            })?;

        assigned.insert(owner.to_string(), port);
        Ok(port)
    }

    pub fn release(&self, owner: &str) -> Option<u16> {
        self.assigned
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(owner)
    }

    pub fn port_of(&self, owner: &str) -> Option<u16> {
        self.assigned
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(owner)
            .copied()
    }
}

fn host_port_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_range(len: u16) -> Range<u16> {
        // Let the OS pick a free port and build a small range around it.
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let start = listener.local_addr().unwrap().port();
        drop(listener);
        start..start.saturating_add(len)
    }

    #[test]
    fn test_allocate_is_stable_per_owner() {
        let ports = PortAllocator::new(free_range(10));
        let a = ports.allocate("a").unwrap();
        assert_eq!(ports.allocate("a").unwrap(), a);
        assert_eq!(ports.port_of("a"), Some(a));

        let b = ports.allocate("b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_release_frees_port() {
        let ports = PortAllocator::new(free_range(1));
        let a = ports.allocate("a").unwrap();
        assert!(matches!(
            ports.allocate("b"),
            Err(SidecarError::PortsExhausted { .. })
        ));
        assert_eq!(ports.release("a"), Some(a));
        assert_eq!(ports.allocate("b").unwrap(), a);
    }
}
