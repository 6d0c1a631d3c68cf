//! Pieces shared by the editing sessions: errors, save outcomes, and the single-record
//! editor that sits between a cached collection and its edit dialog.

use crate::client::GatewayError;
use crate::engine::codec::CodecError;
use crate::engine::store::{PendingIds, RecordStore};
use crate::engine::tracker::{Record, RecordId, Tracked};
use crate::validate::ValidationError;
use std::error::Error;
use std::fmt::{self, Display, Formatter};

#[derive(Debug)]
pub enum SessionError {
    /// Local validation failed; nothing was sent.
    Validation(Vec<ValidationError>),
    /// The customization batch does not fit; nothing was sent.
    Codec(CodecError),
    Gateway(GatewayError),
    UnknownRecord(String),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Validation(errors) => {
                let joined = errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
                write!(f, "validation failed: {}", joined)
            }
            SessionError::Codec(e) => write!(f, "{}", e),
            SessionError::Gateway(e) => write!(f, "gateway error: {}", e),
            SessionError::UnknownRecord(id) => write!(f, "no record {}", id),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SessionError::Codec(e) => Some(e),
            SessionError::Gateway(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GatewayError> for SessionError {
    fn from(value: GatewayError) -> Self {
        SessionError::Gateway(value)
    }
}

impl From<CodecError> for SessionError {
    fn from(value: CodecError) -> Self {
        SessionError::Codec(value)
    }
}

impl From<Vec<ValidationError>> for SessionError {
    fn from(value: Vec<ValidationError>) -> Self {
        SessionError::Validation(value)
    }
}

impl From<ValidationError> for SessionError {
    fn from(value: ValidationError) -> Self {
        SessionError::Validation(vec![value])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    NothingToSave,
    Saved { records: usize },
    /// Accepted, but the gateway has to restart before the change takes effect.
    RestartRequired { records: usize },
}

/// Record open in the edit dialog.
#[derive(Debug, Clone)]
struct Draft<T: Record> {
    record: Tracked<T>,
    creating: bool,
}

/// Cached collection plus at most one record being edited.
#[derive(Debug)]
pub struct Editor<T: Record> {
    store: RecordStore<T>,
    ids: PendingIds,
    open: Option<Draft<T>>,
}

impl<T: Record> Editor<T> {
    pub fn new(records: Vec<T>) -> Self {
        Editor {
            store: RecordStore::from_loaded(records),
            ids: PendingIds::new(),
            open: None,
        }
    }

    pub fn store(&self) -> &RecordStore<T> {
        &self.store
    }

    pub fn dirty_count(&self) -> usize {
        self.store.dirty_count()
    }

    /// Replace the collection with a fresh load. Any open dialog is discarded.
    pub fn replace(&mut self, records: Vec<T>) {
        self.store = RecordStore::from_loaded(records);
        self.open = None;
    }

    /// Accept the live collection as the new baseline.
    pub fn rebase(&mut self) {
        self.store = self.store.rebased();
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn is_creating(&self) -> bool {
        self.open.as_ref().is_some_and(|d| d.creating)
    }

    /// Open the dialog on a new record built by `make` around a fresh pending id.
    pub fn begin_create<F>(&mut self, make: F) -> &mut T
    where
        F: FnOnce(RecordId<T::Key>) -> T,
    {
        let record = make(self.ids.allocate());
        let draft = self.open.insert(Draft {
            record: Tracked::draft(record),
            creating: true,
        });
        &mut draft.record.current
    }

    /// Open the dialog on a copy of the record that entered the collection as `origin`.
    pub fn begin_edit(&mut self, origin: &RecordId<T::Key>) -> Result<&mut T, SessionError>
    where
        T::Key: Display,
    {
        let record = self
            .store
            .find_origin(origin)
            .cloned()
            .ok_or_else(|| SessionError::UnknownRecord(origin.to_string()))?;
        let draft = self.open.insert(Draft { record, creating: false });
        Ok(&mut draft.record.current)
    }

    pub fn draft(&self) -> Option<&T> {
        self.open.as_ref().map(|d| &d.record.current)
    }

    pub fn draft_mut(&mut self) -> Option<&mut T> {
        self.open.as_mut().map(|d| &mut d.record.current)
    }

    /// Origin of the open record, used to exclude it from uniqueness checks.
    pub fn draft_origin(&self) -> Option<&RecordId<T::Key>> {
        self.open.as_ref().map(|d| d.record.origin())
    }

    /// Baseline of the open record, if it was ever loaded.
    pub fn draft_baseline(&self) -> Option<&T> {
        self.open.as_ref().and_then(|d| d.record.baseline())
    }

    /// Merge the open record into the collection and close the dialog.
    pub fn commit(&mut self) -> Option<RecordId<T::Key>> {
        let draft = self.open.take()?;
        let origin = draft.record.origin().clone();
        self.store = self.store.merge_saved(draft.record, draft.creating);
        Some(origin)
    }

    /// Close the dialog without touching the collection.
    pub fn close(&mut self) {
        self.open = None;
    }

    /// Apply `edit` to the record that entered the collection as `origin`.
    pub fn update<F>(&mut self, origin: &RecordId<T::Key>, edit: F) -> Result<(), SessionError>
    where
        T::Key: Display,
        F: FnOnce(&T) -> T,
    {
        let mut target = self
            .store
            .find_origin(origin)
            .cloned()
            .ok_or_else(|| SessionError::UnknownRecord(origin.to_string()))?;
        target.current = edit(&target.current);
        self.store = self.store.merge_saved(target, false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tracker::FieldChanges;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: RecordId<u32>,
        text: String,
        deleted: bool,
    }

    impl Record for Note {
        type Key = u32;

        fn id(&self) -> RecordId<u32> {
            self.id.clone()
        }

        fn is_deleted(&self) -> bool {
            self.deleted
        }

        fn changes_from(&self, baseline: &Self) -> FieldChanges {
            let Note { id, text, deleted } = self;
            FieldChanges::new()
                .field("id", id, &baseline.id)
                .field("text", text, &baseline.text)
                .field("deleted", deleted, &baseline.deleted)
        }
    }

    fn note(id: u32, text: &str) -> Note {
        Note {
            id: RecordId::Saved(id),
            text: text.into(),
            deleted: false,
        }
    }

    #[test]
    fn create_commit_and_edit_again() {
        let mut editor = Editor::new(vec![note(1, "a")]);
        let draft = editor.begin_create(|id| Note {
            id,
            text: "new".into(),
            deleted: false,
        });
        draft.text = "newer".into();
        assert!(editor.is_creating());
        assert_eq!(editor.dirty_count(), 0);

        let origin = editor.commit().expect("draft was open");
        assert!(!editor.is_open());
        assert_eq!(editor.dirty_count(), 1);

        editor.begin_edit(&origin).expect("committed record").text = "final".into();
        assert!(!editor.is_creating());
        editor.commit();
        assert_eq!(editor.store().len(), 2);
        assert_eq!(editor.store().find_origin(&origin).map(|t| t.current.text.as_str()), Some("final"));
    }

    #[test]
    fn closing_discards_the_draft() {
        let mut editor = Editor::new(vec![note(1, "a")]);
        editor.begin_edit(&RecordId::Saved(1)).expect("loaded").text = "changed".into();
        editor.close();
        assert_eq!(editor.dirty_count(), 0);
        assert!(editor.commit().is_none());
    }

    #[test]
    fn unknown_origin_is_reported() {
        let mut editor = Editor::new(vec![note(1, "a")]);
        let err = editor.begin_edit(&RecordId::Saved(7)).unwrap_err();
        assert_eq!(err.to_string(), "no record 7");
    }

    #[test]
    fn update_then_rebase() {
        let mut editor = Editor::new(vec![note(1, "a"), note(2, "b")]);
        editor
            .update(&RecordId::Saved(2), |n| Note { deleted: true, ..n.clone() })
            .expect("record 2");
        assert_eq!(editor.dirty_count(), 1);
        editor.rebase();
        assert_eq!(editor.dirty_count(), 0);
    }
}
