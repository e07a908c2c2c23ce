//! Connection table with stable identifiers.
//!
//! Entries are stored densely and compacted on removal, so iteration touches
//! only live connections, but every connection is addressed by a [`ConnId`]
//! that never changes and is never reused for the lifetime of the table.

/// Stable identifier for one accepted connection.
///
/// Allocated once per connection and never recycled. `0` is reserved for the
/// listener and is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    /// The raw identifier value.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Rebuild an identifier from its raw value.
    ///
    /// Intended for runtimes that round-trip the ID through a poll token.
    pub fn from_raw(raw: u64) -> ConnId {
        ConnId(raw)
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Dense table of per-connection state keyed by [`ConnId`].
///
/// Removal shifts later entries down one slot (order-preserving compaction),
/// which keeps iteration dense without invalidating any identifier.
#[derive(Debug)]
pub struct ConnTable<T> {
    entries: Vec<(ConnId, T)>,
    next: u64,
}

impl<T> Default for ConnTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConnTable<T> {
    /// An empty table. The first allocated ID is `1`.
    pub fn new() -> Self {
        Self { entries: Vec::new(), next: 1 }
    }

    /// Insert `value` under a freshly allocated identifier.
    pub fn allocate(&mut self, value: T) -> ConnId {
        let id = ConnId(self.next);
        self.next += 1;
        self.entries.push((id, value));
        id
    }

    /// Insert `value` under an identifier minted elsewhere.
    ///
    /// Used by engines that mirror a runtime-owned table and must agree with
    /// it on identifiers.
    pub fn insert(&mut self, id: ConnId, value: T) {
        self.entries.push((id, value));
    }

    /// Remove and return the entry for `id`, compacting the table.
    pub fn remove(&mut self, id: ConnId) -> Option<T> {
        let pos = self.entries.iter().position(|(eid, _)| *eid == id)?;
        Some(self.entries.remove(pos).1)
    }

    /// Shared access to the entry for `id`.
    pub fn get(&self, id: ConnId) -> Option<&T> {
        self.entries.iter().find(|(eid, _)| *eid == id).map(|(_, v)| v)
    }

    /// Mutable access to the entry for `id`.
    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut T> {
        self.entries.iter_mut().find(|(eid, _)| *eid == id).map(|(_, v)| v)
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: ConnId) -> bool {
        self.entries.iter().any(|(eid, _)| *eid == id)
    }

    /// Live identifiers, oldest first.
    pub fn ids(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    /// Live entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (ConnId, &T)> {
        self.entries.iter().map(|(id, v)| (*id, v))
    }

    /// Mutable iteration over live entries, oldest first.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ConnId, &mut T)> {
        self.entries.iter_mut().map(|(id, v)| (*id, v))
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_across_removal() {
        let mut table = ConnTable::new();
        let a = table.allocate("a");
        let b = table.allocate("b");
        let c = table.allocate("c");

        assert_eq!(table.remove(b), Some("b"));
        assert_eq!(table.get(a), Some(&"a"));
        assert_eq!(table.get(c), Some(&"c"));
        assert_eq!(table.get(b), None);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut table = ConnTable::new();
        let a = table.allocate(());
        table.remove(a);
        let b = table.allocate(());
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn removal_preserves_iteration_order() {
        let mut table = ConnTable::new();
        let ids: Vec<_> = (0..5).map(|n| table.allocate(n)).collect();
        table.remove(ids[1]);
        table.remove(ids[3]);

        let order: Vec<_> = table.iter().map(|(_, v)| *v).collect();
        assert_eq!(order, vec![0, 2, 4]);
    }

    #[test]
    fn zero_is_reserved() {
        let mut table = ConnTable::new();
        assert_eq!(table.allocate(()).raw(), 1);
    }
}
