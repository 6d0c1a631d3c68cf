//! Optimistic in-memory collection of tracked records.
//!
//! Edits made in a dialog are merged into the cached collection before anything is sent to
//! the gateway. Every operation returns a new collection and leaves the receiver untouched,
//! so a handler can hold on to the previous snapshot while computing the next one.

use crate::engine::tracker::{LocalToken, Record, RecordId, Tracked, dirty_count};
use log::debug;

/// Monotonic source of identities for records created locally.
#[derive(Debug, Default)]
pub struct PendingIds {
    next: u64,
}

impl PendingIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate<K>(&mut self) -> RecordId<K> {
        self.next += 1;
        RecordId::Pending(LocalToken(self.next))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordStore<T: Record> {
    entries: Vec<Tracked<T>>,
}

impl<T: Record> Default for RecordStore<T> {
    fn default() -> Self {
        RecordStore { entries: Vec::new() }
    }
}

impl<T: Record> RecordStore<T> {
    /// Collection from a full load response; every record becomes its own baseline.
    pub fn from_loaded<I: IntoIterator<Item = T>>(records: I) -> Self {
        RecordStore {
            entries: records.into_iter().map(Tracked::loaded).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All records, soft-deleted ones included.
    pub fn iter(&self) -> impl Iterator<Item = &Tracked<T>> {
        self.entries.iter()
    }

    /// Records that are not soft-deleted.
    pub fn visible(&self) -> impl Iterator<Item = &Tracked<T>> {
        self.entries.iter().filter(|e| !e.current.is_deleted())
    }

    /// Look up by live identity.
    pub fn find(&self, id: &RecordId<T::Key>) -> Option<&Tracked<T>> {
        self.entries.iter().find(|e| &e.current.id() == id)
    }

    /// Look up by the identity the record entered the collection with.
    pub fn find_origin(&self, origin: &RecordId<T::Key>) -> Option<&Tracked<T>> {
        self.entries.iter().find(|e| e.origin() == origin)
    }

    pub fn dirty_count(&self) -> usize {
        dirty_count(&self.entries)
    }

    /// Merge a record coming back from an edit dialog.
    ///
    /// Creating: any earlier entry with the same origin is dropped before the record is
    /// appended. Updating: the entry with the same origin (or, failing that, the same live
    /// id) is shallow-merged with `updated`.
    pub fn merge_saved(&self, updated: Tracked<T>, creating: bool) -> Self {
        if creating {
            let mut entries: Vec<Tracked<T>> = self
                .entries
                .iter()
                .filter(|e| e.origin() != updated.origin())
                .cloned()
                .collect();
            entries.push(updated);
            return RecordStore { entries };
        }

        let index = self
            .entries
            .iter()
            .position(|e| e.origin() == updated.origin())
            .or_else(|| {
                let live = updated.current.id();
                self.entries.iter().position(|e| e.current.id() == live)
            });

        let mut entries = self.entries.clone();
        match index {
            Some(i) => {
                let merged = entries[i].merged_with(updated);
                entries[i] = merged;
            }
            None => debug!("merge_saved: no entry for {:?}, collection unchanged", updated.origin()),
        }
        RecordStore { entries }
    }

    /// Apply `edit` to every record matching `select`, returning the new collection and
    /// how many records were touched.
    pub fn update_where<P, F>(&self, mut select: P, mut edit: F) -> (Self, usize)
    where
        P: FnMut(&T) -> bool,
        F: FnMut(&T) -> T,
    {
        let mut touched = 0;
        let entries = self
            .entries
            .iter()
            .map(|e| {
                if select(&e.current) {
                    touched += 1;
                    let mut next = e.clone();
                    next.current = edit(&e.current);
                    next
                } else {
                    e.clone()
                }
            })
            .collect();
        (RecordStore { entries }, touched)
    }

    /// Accept every live record as confirmed. Dirty count drops to zero.
    pub fn rebased(&self) -> Self {
        let mut entries = self.entries.clone();
        for e in &mut entries {
            e.rebase();
        }
        RecordStore { entries }
    }

    /// Live state of every record that is not soft-deleted, in collection order.
    pub fn live_records(&self) -> Vec<T> {
        self.visible().map(|e| e.current.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tracker::FieldChanges;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: RecordId<u32>,
        name: String,
        deleted: bool,
    }

    impl Record for Item {
        type Key = u32;

        fn id(&self) -> RecordId<u32> {
            self.id.clone()
        }

        fn is_deleted(&self) -> bool {
            self.deleted
        }

        fn changes_from(&self, baseline: &Self) -> FieldChanges {
            let Item { id, name, deleted } = self;
            FieldChanges::new()
                .field("id", id, &baseline.id)
                .text("name", Some(name.as_str()), Some(baseline.name.as_str()))
                .field("deleted", deleted, &baseline.deleted)
        }
    }

    fn item(id: u32, name: &str) -> Item {
        Item {
            id: RecordId::Saved(id),
            name: name.into(),
            deleted: false,
        }
    }

    fn store() -> RecordStore<Item> {
        RecordStore::from_loaded(vec![item(1, "a"), item(2, "b")])
    }

    #[test]
    fn pending_ids_are_monotonic() {
        let mut ids = PendingIds::new();
        let a: RecordId<u32> = ids.allocate();
        let b: RecordId<u32> = ids.allocate();
        assert!(a.is_pending());
        assert_ne!(a, b);
    }

    #[test]
    fn update_merges_without_touching_input() {
        let before = store();
        let mut edit = before.find(&RecordId::Saved(2)).cloned().expect("entry 2");
        edit.current.name = "bb".into();

        let after = before.merge_saved(edit, false);
        assert_eq!(before.dirty_count(), 0);
        assert_eq!(after.dirty_count(), 1);
        assert_eq!(after.len(), 2);
        assert_eq!(after.find(&RecordId::Saved(2)).map(|e| e.current.name.as_str()), Some("bb"));
    }

    #[test]
    fn update_matches_renumbered_record_by_origin() {
        let before = store();
        let mut edit = before.find(&RecordId::Saved(1)).cloned().expect("entry 1");
        edit.current.id = RecordId::Saved(9);
        let after = before.merge_saved(edit.clone(), false);

        let mut again = after.find_origin(&RecordId::Saved(1)).cloned().expect("still keyed by origin");
        again.current.name = "renamed".into();
        let after = after.merge_saved(again, false);

        assert_eq!(after.len(), 2);
        let merged = after.find(&RecordId::Saved(9)).expect("live id 9");
        assert_eq!(merged.origin(), &RecordId::Saved(1));
        assert_eq!(merged.current.name, "renamed");
        assert!(merged.is_changed("id"));
    }

    #[test]
    fn creating_replaces_stale_draft_with_same_origin() {
        let mut ids = PendingIds::new();
        let pending = ids.allocate();
        let first = Tracked::draft(Item {
            id: pending.clone(),
            name: "draft".into(),
            deleted: false,
        });
        let store = store().merge_saved(first.clone(), true);
        assert_eq!(store.len(), 3);

        let mut second = first;
        second.current.name = "final".into();
        let store = store.merge_saved(second, true);
        assert_eq!(store.len(), 3);
        let drafts: Vec<_> = store.iter().filter(|e| e.origin().is_pending()).collect();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].current.name, "final");
    }

    #[test]
    fn rebase_after_merge_clears_dirty_state() {
        let mut edit = store().find(&RecordId::Saved(1)).cloned().expect("entry 1");
        edit.current.deleted = true;
        let merged = store().merge_saved(edit, false);
        assert_eq!(merged.dirty_count(), 1);
        assert_eq!(merged.live_records().len(), 1);
        assert_eq!(merged.iter().count(), 2);

        let rebased = merged.rebased();
        assert_eq!(rebased.dirty_count(), 0);
        assert!(rebased.iter().all(|e| !e.is_dirty()));
    }

    #[test]
    fn unknown_update_leaves_collection_unchanged() {
        let before = store();
        let stray = Tracked::loaded(item(42, "x"));
        let after = before.merge_saved(stray, false);
        assert_eq!(before, after);
    }

    #[test]
    fn update_where_counts_touched_records() {
        let (after, touched) = store().update_where(|i| i.name == "b", |i| Item { deleted: true, ..i.clone() });
        assert_eq!(touched, 1);
        assert_eq!(after.dirty_count(), 1);
        assert_eq!(after.visible().count(), 1);
    }
}
