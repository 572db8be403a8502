//! UE Registry
//!
//! Process-wide directory of the UEs alive in a run. The MAC registers
//! itself at init and deregisters at teardown; the registry is injected as a
//! shared handle so multi-UE drivers can share one instance.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use common::types::MacNodeId;
use tracing::debug;

/// Registered UE entry
#[derive(Debug, Clone)]
pub struct UeInfo {
    pub id: MacNodeId,
    pub cell_id: MacNodeId,
    /// PHY initialization flag
    pub init: bool,
}

/// Directory of registered UEs
#[derive(Debug, Default)]
pub struct Binder {
    ues: BTreeMap<MacNodeId, UeInfo>,
}

/// Shared handle to the registry; the stack is single-threaded
pub type BinderHandle = Rc<RefCell<Binder>>;

impl Binder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh shared registry
    pub fn shared() -> BinderHandle {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Register a UE. Re-registering an id replaces the previous entry.
    pub fn add_ue_info(&mut self, info: UeInfo) {
        debug!(id = %info.id, "registering UE");
        self.ues.insert(info.id, info);
    }

    /// Deregister a UE, returning whether it was present
    pub fn remove_ue_info(&mut self, id: MacNodeId) -> bool {
        debug!(id = %id, "removing UE");
        self.ues.remove(&id).is_some()
    }

    pub fn ue_info(&self, id: MacNodeId) -> Option<&UeInfo> {
        self.ues.get(&id)
    }

    pub fn len(&self) -> usize {
        self.ues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_remove() {
        let binder = Binder::shared();
        binder.borrow_mut().add_ue_info(UeInfo {
            id: MacNodeId(1025),
            cell_id: MacNodeId(1),
            init: false,
        });
        assert_eq!(binder.borrow().len(), 1);
        assert!(binder.borrow().ue_info(MacNodeId(1025)).is_some());
        assert!(binder.borrow_mut().remove_ue_info(MacNodeId(1025)));
        assert!(binder.borrow().is_empty());
        assert!(!binder.borrow_mut().remove_ue_info(MacNodeId(1025)));
    }
}
