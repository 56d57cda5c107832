//! Guard identity and the target process handle.

use std::sync::Mutex;

use snapstore::NodeId;

/// Who this guard is. Fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardIdentity {
    pub node_id: NodeId,
}

impl GuardIdentity {
    pub fn new(node_id: NodeId) -> Self {
        Self { node_id }
    }

    pub fn is_self(&self, node_id: NodeId) -> bool {
        self.node_id == node_id
    }
}

/// The process this guard checkpoints and restores.
///
/// Only the restore engine replaces or clears the pid; everything else reads it.
#[derive(Debug)]
pub struct TargetProcess {
    pid: Mutex<Option<u32>>,
}

impl TargetProcess {
    pub fn new(pid: u32) -> Self {
        Self {
            pid: Mutex::new(Some(pid)),
        }
    }

    pub fn empty() -> Self {
        Self {
            pid: Mutex::new(None),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        *self.lock()
    }

    pub fn replace(&self, pid: u32) -> Option<u32> {
        self.lock().replace(pid)
    }

    pub fn clear(&self) -> Option<u32> {
        self.lock().take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<u32>> {
        // The guarded value is a plain Option; a poisoned lock still holds a valid pid
        self.pid.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let identity = GuardIdentity::new(1);
        assert!(identity.is_self(1));
        assert!(!identity.is_self(2));
    }

    #[test]
    fn test_target_process_lifecycle() {
        let target = TargetProcess::new(100);
        assert_eq!(target.pid(), Some(100));

        assert_eq!(target.replace(200), Some(100));
        assert_eq!(target.pid(), Some(200));

        assert_eq!(target.clear(), Some(200));
        assert_eq!(target.pid(), None);
        assert_eq!(TargetProcess::empty().pid(), None);
    }
}
