//! Change tracking between a live record and its last server-confirmed baseline.
//!
//! Every editable row (device entity customizations, schedule entries, custom entities,
//! modules) is held as a [`Tracked`] pair. Whether a row is dirty is a structural diff of
//! the pair; the number of dirty rows is what gates "apply" / "cancel" and blocks leaving
//! a screen with unsaved edits.

use std::fmt;

/// Client-side identity handed out to records that have never been saved.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalToken(pub(crate) u64);

impl fmt::Display for LocalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "new#{}", self.0)
    }
}

/// Identity of a record: assigned by the gateway, or pending until the next save.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordId<K> {
    Saved(K),
    Pending(LocalToken),
}

impl<K> RecordId<K> {
    pub fn is_pending(&self) -> bool {
        matches!(self, RecordId::Pending(_))
    }

    pub fn saved(&self) -> Option<&K> {
        match self {
            RecordId::Saved(k) => Some(k),
            RecordId::Pending(_) => None,
        }
    }
}

impl<K: fmt::Display> fmt::Display for RecordId<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Saved(k) => write!(f, "{}", k),
            RecordId::Pending(t) => write!(f, "{}", t),
        }
    }
}

/// A row type whose live state can be compared against a baseline copy of itself.
pub trait Record: Clone {
    type Key: Clone + PartialEq + fmt::Debug;

    /// Live identity, as shown to the user. May differ from the identity it was loaded with.
    fn id(&self) -> RecordId<Self::Key>;

    fn is_deleted(&self) -> bool;

    /// Names of the fields whose live value differs from `baseline`.
    fn changes_from(&self, baseline: &Self) -> FieldChanges;
}

/// Set of changed field names for one record.
///
/// A record that was never loaded reports every field as changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldChanges {
    fields: Vec<&'static str>,
    unsaved: bool,
}

impl FieldChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unsaved() -> Self {
        FieldChanges {
            fields: Vec::new(),
            unsaved: true,
        }
    }

    /// Strict comparison, used for numeric, boolean and identity fields.
    pub fn field<V: PartialEq + ?Sized>(mut self, name: &'static str, current: &V, baseline: &V) -> Self {
        if current != baseline {
            self.fields.push(name);
        }
        self
    }

    /// Optional text: missing and empty compare equal.
    pub fn text(mut self, name: &'static str, current: Option<&str>, baseline: Option<&str>) -> Self {
        if current.unwrap_or_default() != baseline.unwrap_or_default() {
            self.fields.push(name);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        !self.unsaved && self.fields.is_empty()
    }

    pub fn is_unsaved(&self) -> bool {
        self.unsaved
    }

    pub fn contains(&self, name: &str) -> bool {
        self.unsaved || self.fields.contains(&name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().copied()
    }
}

/// Live record paired with the last server-confirmed copy of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<T: Record> {
    origin: RecordId<T::Key>,
    pub current: T,
    baseline: Option<T>,
}

impl<T: Record> Tracked<T> {
    /// Record fresh from a load response; it becomes its own baseline.
    pub fn loaded(record: T) -> Self {
        Tracked {
            origin: record.id(),
            baseline: Some(record.clone()),
            current: record,
        }
    }

    /// Record created locally and not yet confirmed by the gateway.
    pub fn draft(record: T) -> Self {
        Tracked {
            origin: record.id(),
            current: record,
            baseline: None,
        }
    }

    /// Identity the record had when it entered the collection. Never changes while editing.
    pub fn origin(&self) -> &RecordId<T::Key> {
        &self.origin
    }

    pub fn baseline(&self) -> Option<&T> {
        self.baseline.as_ref()
    }

    pub fn changes(&self) -> FieldChanges {
        match &self.baseline {
            Some(baseline) => self.current.changes_from(baseline),
            None => FieldChanges::unsaved(),
        }
    }

    pub fn is_changed(&self, field: &str) -> bool {
        self.changes().contains(field)
    }

    pub fn is_dirty(&self) -> bool {
        !self.changes().is_empty()
    }

    /// Accept the live state as the new baseline.
    pub fn rebase(&mut self) {
        self.origin = self.current.id();
        self.baseline = Some(self.current.clone());
    }

    /// Shallow merge: `updated` wins for the live state, our identity and baseline
    /// survive unless `updated` carries its own baseline.
    pub(crate) fn merged_with(&self, updated: Tracked<T>) -> Self {
        Tracked {
            origin: self.origin.clone(),
            current: updated.current,
            baseline: updated.baseline.or_else(|| self.baseline.clone()),
        }
    }
}

pub fn is_dirty<T: Record>(record: &Tracked<T>) -> bool {
    record.is_dirty()
}

/// Number of dirty records, soft-deleted ones included.
pub fn dirty_count<'a, T, I>(records: I) -> usize
where
    T: Record + 'a,
    I: IntoIterator<Item = &'a Tracked<T>>,
{
    records.into_iter().filter(|r| r.is_dirty()).count()
}
