//! Root tracking and handle management.
//!
//! Roots are the starting points of every collection:
//! - Global handles held by the embedder
//! - Local handles in open handle scopes
//! - Registered [`RootProvider`]s (interpreter stacks, caches)
//!
//! A collector visits each root slot through a [`RootVisitor`] and may
//! rewrite it when the referenced object moves.

mod handles;

pub use handles::{GlobalHandle, GlobalHandles, HandleScope, LocalHandle, LocalHandles};

use strata_core::TaggedValue;

/// Callback applied to every root slot.
pub trait RootVisitor {
    /// Visit one slot. The visitor may overwrite it with a new location.
    fn visit_root(&mut self, root: &mut TaggedValue);
}

impl<F: FnMut(&mut TaggedValue)> RootVisitor for F {
    #[inline]
    fn visit_root(&mut self, root: &mut TaggedValue) {
        self(root)
    }
}

/// Source of roots outside the handle tables.
pub trait RootProvider {
    /// Present every root slot to `visitor`.
    fn visit_roots(&mut self, visitor: &mut dyn RootVisitor);
}

/// All roots of one heap.
#[derive(Default)]
pub struct RootSet {
    globals: GlobalHandles,
    locals: LocalHandles,
    providers: Vec<Box<dyn RootProvider + Send>>,
}

impl RootSet {
    /// Create an empty root set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Global handle table.
    #[inline]
    pub fn globals(&self) -> &GlobalHandles {
        &self.globals
    }

    /// Global handle table, mutably.
    #[inline]
    pub fn globals_mut(&mut self) -> &mut GlobalHandles {
        &mut self.globals
    }

    /// Local handle stack.
    #[inline]
    pub fn locals(&self) -> &LocalHandles {
        &self.locals
    }

    /// Local handle stack, mutably.
    #[inline]
    pub fn locals_mut(&mut self) -> &mut LocalHandles {
        &mut self.locals
    }

    /// Register an additional root source.
    pub fn add_provider(&mut self, provider: Box<dyn RootProvider + Send>) {
        self.providers.push(provider);
    }

    /// Number of registered providers.
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Visit every root slot.
    pub fn visit(&mut self, visitor: &mut dyn RootVisitor) {
        for value in self.globals.values_mut() {
            visitor.visit_root(value);
        }
        for value in self.locals.values_mut() {
            visitor.visit_root(value);
        }
        for provider in &mut self.providers {
            provider.visit_roots(visitor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stack(Vec<TaggedValue>);

    impl RootProvider for Stack {
        fn visit_roots(&mut self, visitor: &mut dyn RootVisitor) {
            for slot in &mut self.0 {
                visitor.visit_root(slot);
            }
        }
    }

    #[test]
    fn test_visit_reaches_every_source() {
        let mut roots = RootSet::new();
        roots.globals_mut().create(TaggedValue::from_small_int(1).unwrap());
        let scope = roots.locals_mut().open_scope();
        roots.locals_mut().create(TaggedValue::from_small_int(2).unwrap());
        roots.add_provider(Box::new(Stack(vec![TaggedValue::from_small_int(3).unwrap()])));

        let mut sum = 0;
        roots.visit(&mut |slot: &mut TaggedValue| {
            sum += slot.to_small_int().unwrap();
            *slot = TaggedValue::ZERO;
        });
        assert_eq!(sum, 6);

        let mut after = 0;
        roots.visit(&mut |slot: &mut TaggedValue| after += slot.to_small_int().unwrap());
        assert_eq!(after, 0);
        roots.locals_mut().close_scope(scope);
        assert_eq!(roots.provider_count(), 1);
    }
}
