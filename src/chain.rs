//! Cancellation chain.
//!
//! Every [`Sequence`](crate::Sequence) owns a [`SequenceHandle`]. A derived
//! sequence's handle points at the handle of the sequence it was built from,
//! so the handles form a single-parent list that ends at the root source.
//! Terminating any handle walks that list and stops the whole pipeline.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type ReleaseHook = Box<dyn FnOnce() + Send>;

struct Node {
    label: &'static str,
    parent: Option<SequenceHandle>,
    terminated: AtomicBool,
    release: Mutex<Option<ReleaseHook>>,
}

/// Shared link in the cancellation chain.
///
/// Cloning a handle is cheap and clones refer to the same node.
#[derive(Clone)]
pub struct SequenceHandle {
    node: Arc<Node>,
}

impl SequenceHandle {
    /// Create the handle for a root source.
    pub fn root(label: &'static str) -> Self {
        Self::with_parent(label, None)
    }

    /// Create the handle for a sequence derived from `parent`.
    pub fn child(label: &'static str, parent: &SequenceHandle) -> Self {
        Self::with_parent(label, Some(parent.clone()))
    }

    fn with_parent(label: &'static str, parent: Option<SequenceHandle>) -> Self {
        Self {
            node: Arc::new(Node {
                label,
                parent,
                terminated: AtomicBool::new(false),
                release: Mutex::new(None),
            }),
        }
    }

    /// Operator or source name this handle was created for.
    pub fn label(&self) -> &'static str {
        self.node.label
    }

    /// The immediate upstream handle, `None` for a root.
    pub fn parent(&self) -> Option<&SequenceHandle> {
        self.node.parent.as_ref()
    }

    /// Walk to the root of the chain.
    pub fn root_of(&self) -> &SequenceHandle {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Number of links between this handle and the root.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self;
        while let Some(parent) = current.parent() {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// Install the primitive that releases this node's resource.
    ///
    /// Replaces any hook installed earlier. If the node was already
    /// terminated the hook runs immediately.
    pub fn on_release(&self, hook: impl FnOnce() + Send + 'static) {
        let mut slot = self
            .node
            .release
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_terminated() {
            drop(slot);
            hook();
            return;
        }
        *slot = Some(Box::new(hook));
    }

    /// Whether this node has been terminated.
    pub fn is_terminated(&self) -> bool {
        self.node.terminated.load(Ordering::Acquire)
    }

    /// Terminate the pipeline this handle belongs to.
    ///
    /// Marks every node from this one up to the root as terminated and runs
    /// each node's release hook, the root's last. Calling it twice is a no-op.
    pub fn terminate(&self) {
        let mut current = Some(self);
        while let Some(handle) = current {
            handle.release();
            current = handle.parent();
        }
    }

    fn release(&self) {
        if self.node.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let hook = self
            .node
            .release
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(hook) = hook {
            tracing::debug!(source = self.node.label, "releasing sequence resource");
            hook();
        }
    }
}

/// Slot for a sequence opened lazily inside an operator.
///
/// Operators such as `flatten` and `wrap` create their inner sequences while
/// being pulled, after their own handle exists. The link keeps the handle of
/// the current inner sequence so that terminating the owner also terminates
/// it. An inner sequence set after the owner was released is terminated at
/// once.
#[derive(Clone, Default)]
pub(crate) struct InnerLink {
    state: Arc<Mutex<LinkState>>,
}

#[derive(Default)]
struct LinkState {
    released: bool,
    current: Option<SequenceHandle>,
}

impl InnerLink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Install the link as `owner`'s release hook.
    pub(crate) fn attach(&self, owner: &SequenceHandle) {
        let link = self.clone();
        owner.on_release(move || link.release());
    }

    /// Record `handle` as the current inner sequence.
    pub(crate) fn set(&self, handle: &SequenceHandle) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.released {
            drop(state);
            handle.terminate();
            return;
        }
        state.current = Some(handle.clone());
    }

    fn release(&self) {
        let current = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.released = true;
            state.current.take()
        };
        if let Some(handle) = current {
            handle.terminate();
        }
    }
}

impl fmt::Debug for SequenceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceHandle")
            .field("label", &self.node.label)
            .field("depth", &self.depth())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_root_has_no_parent() {
        let root = SequenceHandle::root("values");
        assert!(root.parent().is_none());
        assert_eq!(root.depth(), 0);
        assert_eq!(root.root_of().label(), "values");
    }

    #[test]
    fn test_child_walks_to_root() {
        let root = SequenceHandle::root("read");
        let mid = SequenceHandle::child("map", &root);
        let leaf = SequenceHandle::child("first", &mid);
        assert_eq!(leaf.depth(), 2);
        assert_eq!(leaf.root_of().label(), "read");
    }

    #[test]
    fn test_terminate_runs_root_hook_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let root = SequenceHandle::root("read");
        let counter = calls.clone();
        root.on_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let leaf = SequenceHandle::child("first", &SequenceHandle::child("map", &root));

        leaf.terminate();
        leaf.terminate();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(root.is_terminated());
        assert!(leaf.is_terminated());
    }

    #[test]
    fn test_terminate_does_not_touch_descendants() {
        let root = SequenceHandle::root("values");
        let child = SequenceHandle::child("map", &root);
        root.terminate();
        assert!(root.is_terminated());
        assert!(!child.is_terminated());
    }

    #[test]
    fn test_hook_installed_after_termination_runs_immediately() {
        let root = SequenceHandle::root("exec");
        root.terminate();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        root.on_release(move || flag.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_inner_link_follows_owner() {
        let owner = SequenceHandle::child("flatten", &SequenceHandle::root("values"));
        let link = InnerLink::new();
        link.attach(&owner);

        let first = SequenceHandle::root("read");
        let second = SequenceHandle::root("read");
        link.set(&first);
        link.set(&second);
        owner.terminate();

        assert!(!first.is_terminated());
        assert!(second.is_terminated());

        let late = SequenceHandle::root("read");
        link.set(&late);
        assert!(late.is_terminated());
    }
}
