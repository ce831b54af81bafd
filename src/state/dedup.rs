use crate::extract::Identity;
use std::collections::BTreeSet;

/// Set of identities already admitted in this run or persisted by earlier runs
///
/// Identities are only ever added. An item that was admitted and later dropped
/// stays in the set, so it is not retried on a later page.
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    seen: BTreeSet<Identity>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a deduplicator pre-loaded with identities from a checkpoint
    pub fn seeded<I>(identities: I) -> Self
    where
        I: IntoIterator<Item = Identity>,
    {
        Self {
            seen: identities.into_iter().collect(),
        }
    }

    /// Adds identities found in the output destination
    ///
    /// # Returns
    ///
    /// The number of identities that were not already known
    pub fn extend<I>(&mut self, identities: I) -> usize
    where
        I: IntoIterator<Item = Identity>,
    {
        let before = self.seen.len();
        self.seen.extend(identities);
        self.seen.len() - before
    }

    pub fn seen(&self, identity: &Identity) -> bool {
        self.seen.contains(identity)
    }

    /// Checks and inserts in one step
    ///
    /// # Returns
    ///
    /// * `true` - The identity was new and is now admitted
    /// * `false` - The identity had already been seen
    pub fn admit(&mut self, identity: Identity) -> bool {
        self.seen.insert(identity)
    }

    /// All identities seen so far, in sorted order
    pub fn identities(&self) -> &BTreeSet<Identity> {
        &self.seen
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
