use std::collections::HashSet;

use crate::core::ObjectIdentity;

/// Insertion-ordered set of scheduled identities.
#[derive(Debug, Default, Clone)]
pub(crate) struct ScheduleSet {
    order: Vec<ObjectIdentity>,
    members: HashSet<ObjectIdentity>,
}

impl ScheduleSet {
    /// Adds an identity, returning `false` if it was already scheduled.
    pub(crate) fn insert(&mut self, identity: ObjectIdentity) -> bool {
        if !self.members.insert(identity) {
            return false;
        }
        self.order.push(identity);
        true
    }

    pub(crate) fn remove(&mut self, identity: ObjectIdentity) -> bool {
        if !self.members.remove(&identity) {
            return false;
        }
        self.order.retain(|scheduled| *scheduled != identity);
        true
    }

    pub(crate) fn contains(&self, identity: ObjectIdentity) -> bool {
        self.members.contains(&identity)
    }

    pub(crate) fn as_slice(&self) -> &[ObjectIdentity] {
        &self.order
    }

    pub(crate) fn to_vec(&self) -> Vec<ObjectIdentity> {
        self.order.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent_and_ordered() {
        let (a, b) = (ObjectIdentity::next(), ObjectIdentity::next());
        let mut set = ScheduleSet::default();
        assert!(set.insert(b));
        assert!(set.insert(a));
        assert!(!set.insert(b));
        assert_eq!(set.as_slice(), &[b, a]);
    }

    #[test]
    fn test_remove() {
        let (a, b) = (ObjectIdentity::next(), ObjectIdentity::next());
        let mut set = ScheduleSet::default();
        set.insert(a);
        set.insert(b);
        assert!(set.remove(a));
        assert!(!set.remove(a));
        assert!(!set.contains(a));
        assert_eq!(set.len(), 1);
    }
}
