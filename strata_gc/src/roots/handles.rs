//! Global and local handles.
//!
//! Handles are the embedder's way to keep values alive across allocations.
//! The collector updates the stored value when it moves an object, so a
//! handle must be read again after anything that may collect.

use strata_core::TaggedValue;

/// A persistent root, valid until destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalHandle(u32);

/// A root that lives until its scope closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalHandle(u32);

/// Marker of an open handle scope.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a handle scope must be closed"]
pub struct HandleScope {
    depth: usize,
    start: usize,
}

/// Slot storage for global handles, reusing freed indices.
#[derive(Debug, Default)]
pub struct GlobalHandles {
    slots: Vec<Option<TaggedValue>>,
    free: Vec<u32>,
}

impl GlobalHandles {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` in a new global handle.
    pub fn create(&mut self, value: TaggedValue) -> GlobalHandle {
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(value);
                GlobalHandle(index)
            }
            None => {
                self.slots.push(Some(value));
                GlobalHandle((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Release a handle. Its slot is reused by later handles.
    pub fn destroy(&mut self, handle: GlobalHandle) {
        if let Some(slot @ Some(_)) = self.slots.get_mut(handle.0 as usize) {
            *slot = None;
            self.free.push(handle.0);
        }
    }

    /// Current value, or `None` if the handle was destroyed.
    pub fn get(&self, handle: GlobalHandle) -> Option<TaggedValue> {
        self.slots.get(handle.0 as usize).copied().flatten()
    }

    /// Replace the value. Returns false if the handle was destroyed.
    pub fn set(&mut self, handle: GlobalHandle, value: TaggedValue) -> bool {
        match self.slots.get_mut(handle.0 as usize) {
            Some(Some(slot)) => {
                *slot = value;
                true
            }
            _ => false,
        }
    }

    /// Live handles.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Check whether no handle is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every live value, mutably.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut TaggedValue> {
        self.slots.iter_mut().flatten()
    }
}

/// Stack of local handles grouped by scopes.
#[derive(Debug, Default)]
pub struct LocalHandles {
    values: Vec<TaggedValue>,
    scopes: Vec<usize>,
}

impl LocalHandles {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a scope; handles created until it closes die with it.
    pub fn open_scope(&mut self) -> HandleScope {
        self.scopes.push(self.values.len());
        HandleScope {
            depth: self.scopes.len(),
            start: self.values.len(),
        }
    }

    /// Close `scope` and every handle created inside it.
    ///
    /// Scopes close in reverse order of opening.
    pub fn close_scope(&mut self, scope: HandleScope) {
        if self.scopes.len() != scope.depth {
            crate::error::contract_violation!(
                "handle scope closed out of order (depth {} of {})",
                scope.depth,
                self.scopes.len()
            );
        }
        self.scopes.truncate(scope.depth.saturating_sub(1));
        self.values.truncate(scope.start);
    }

    /// Create a handle in the innermost scope.
    pub fn create(&mut self, value: TaggedValue) -> LocalHandle {
        if self.scopes.is_empty() {
            crate::error::contract_violation!("local handle created outside any scope");
        }
        self.values.push(value);
        LocalHandle((self.values.len() - 1) as u32)
    }

    /// Current value, or `None` if the handle's scope closed.
    pub fn get(&self, handle: LocalHandle) -> Option<TaggedValue> {
        self.values.get(handle.0 as usize).copied()
    }

    /// Live handles across all scopes.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check whether no handle is live.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Every live value, mutably.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut TaggedValue> {
        self.values.iter_mut()
    }
}
