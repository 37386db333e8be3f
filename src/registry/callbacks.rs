use std::collections::HashMap;

use crate::core::{ObjectIdentity, Result};
use crate::entity::AnyEntity;

pub(crate) type ApplyFn = Box<dyn Fn(&dyn AnyEntity, &mut dyn AnyEntity) -> Result<()> + Send>;

pub(crate) struct AggregateCallback {
    pub(crate) root: ObjectIdentity,
    pub(crate) apply: ApplyFn,
}

/// Aggregate-root callbacks indexed by child identity, in registration order.
#[derive(Default)]
pub(crate) struct AggregateCallbacks {
    by_child: HashMap<ObjectIdentity, Vec<AggregateCallback>>,
}

impl AggregateCallbacks {
    pub(crate) fn register(&mut self, root: ObjectIdentity, child: ObjectIdentity, apply: ApplyFn) {
        self.by_child
            .entry(child)
            .or_default()
            .push(AggregateCallback { root, apply });
    }

    pub(crate) fn for_child(&self, child: ObjectIdentity) -> Option<&[AggregateCallback]> {
        self.by_child.get(&child).map(Vec::as_slice)
    }

    pub(crate) fn remove_child(&mut self, child: ObjectIdentity) {
        self.by_child.remove(&child);
    }

    pub(crate) fn remove_root(&mut self, root: ObjectIdentity) {
        self.by_child.retain(|_, callbacks| {
            callbacks.retain(|callback| callback.root != root);
            !callbacks.is_empty()
        });
    }

    pub(crate) fn count(&self) -> usize {
        self.by_child.values().map(Vec::len).sum()
    }

    pub(crate) fn clear(&mut self) {
        self.by_child.clear();
    }
}
