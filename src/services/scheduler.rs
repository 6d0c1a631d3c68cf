//! Scheduler screen: the gateway's list of timed and conditional commands.
//!
//! The whole non-deleted list is posted on save; the gateway renumbers entries, so a
//! successful save is followed by a reload.

use crate::client::{Gateway, GatewayError};
use crate::engine::schedule_flags::{ScheduleKind, ScheduleType, decode_type, encode_type};
use crate::engine::tracker::{FieldChanges, Record, RecordId};
use crate::models::ems::ScheduleItem;
use crate::services::poll::PolledView;
use crate::services::session::{Editor, SaveOutcome, SessionError};
use crate::validate::{self, ValidationError};
use log::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub id: RecordId<u32>,
    pub active: bool,
    pub kind: ScheduleKind,
    /// Time of day, timer duration, or condition expression depending on `kind`.
    pub time: String,
    pub cmd: String,
    pub value: String,
    pub name: String,
    pub deleted: bool,
}

impl ScheduleEntry {
    pub fn from_wire(item: ScheduleItem) -> Self {
        ScheduleEntry {
            id: RecordId::Saved(item.id),
            active: item.active,
            kind: decode_type(item.flags),
            time: item.time,
            cmd: item.cmd,
            value: item.value,
            name: item.name,
            deleted: false,
        }
    }

    pub fn to_wire(&self, id: u32) -> ScheduleItem {
        ScheduleItem {
            id,
            active: self.active,
            flags: encode_type(self.kind),
            time: self.time.clone(),
            cmd: self.cmd.clone(),
            value: self.value.clone(),
            name: self.name.clone(),
        }
    }

    fn blank(id: RecordId<u32>) -> Self {
        ScheduleEntry {
            id,
            active: false,
            kind: ScheduleKind::default(),
            time: String::new(),
            cmd: String::new(),
            value: String::new(),
            name: String::new(),
            deleted: false,
        }
    }

    /// Change the schedule type. Day bits and the time field never carry over.
    pub fn set_type(&mut self, t: ScheduleType) {
        if self.kind.schedule_type() != t {
            self.kind = ScheduleKind::fresh(t);
            self.time.clear();
        }
    }
}

impl Record for ScheduleEntry {
    type Key = u32;

    fn id(&self) -> RecordId<u32> {
        self.id.clone()
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn changes_from(&self, baseline: &Self) -> FieldChanges {
        let ScheduleEntry {
            id,
            active,
            kind,
            time,
            cmd,
            value,
            name,
            deleted,
        } = self;
        FieldChanges::new()
            .field("id", id, &baseline.id)
            .field("active", active, &baseline.active)
            .field("kind", kind, &baseline.kind)
            .field("time", time, &baseline.time)
            .field("cmd", cmd, &baseline.cmd)
            .field("value", value, &baseline.value)
            .text("name", Some(name.as_str()), Some(baseline.name.as_str()))
            .field("deleted", deleted, &baseline.deleted)
    }
}

/// Field checks for `entry` against every other live entry of the schedule.
pub fn validate_entry(
    entry: &ScheduleEntry,
    original_name: Option<&str>,
    others: &[&ScheduleEntry],
) -> Result<(), Vec<ValidationError>> {
    validate::collect([
        validate::schedule_name(&entry.name),
        validate::unique_name("name", &entry.name, original_name, others.iter().map(|o| o.name.as_str())),
        validate::schedule_command(&entry.cmd),
        validate::schedule_time(entry.kind, &entry.time),
    ])
}

#[derive(Debug)]
pub struct ScheduleSession {
    editor: Editor<ScheduleEntry>,
}

impl ScheduleSession {
    pub fn load(gateway: &dyn Gateway) -> Result<Self, SessionError> {
        let items = gateway.schedule()?;
        info!("Loaded {} schedule item(s)", items.len());
        Ok(ScheduleSession {
            editor: Editor::new(items.into_iter().map(ScheduleEntry::from_wire).collect()),
        })
    }

    /// Live entries, soft-deleted ones hidden, ordered days first then by type.
    pub fn entries(&self) -> Vec<&ScheduleEntry> {
        let mut entries: Vec<&ScheduleEntry> = self.editor.store().visible().map(|t| &t.current).collect();
        entries.sort_by_key(|e| encode_type(e.kind));
        entries
    }

    pub fn dirty_count(&self) -> usize {
        self.editor.dirty_count()
    }

    pub fn is_editing(&self) -> bool {
        self.editor.is_open()
    }

    pub fn begin_create(&mut self) -> &mut ScheduleEntry {
        self.editor.begin_create(ScheduleEntry::blank)
    }

    pub fn begin_edit(&mut self, origin: &RecordId<u32>) -> Result<&mut ScheduleEntry, SessionError> {
        self.editor.begin_edit(origin)
    }

    pub fn draft_mut(&mut self) -> Option<&mut ScheduleEntry> {
        self.editor.draft_mut()
    }

    /// Validate the open entry and merge it into the schedule. On failure the dialog stays open.
    pub fn commit(&mut self) -> Result<RecordId<u32>, SessionError> {
        let draft = self
            .editor
            .draft()
            .ok_or_else(|| SessionError::UnknownRecord("no schedule item is being edited".into()))?;
        let origin = self.editor.draft_origin().cloned();
        let original_name = self.editor.draft_baseline().map(|b| b.name.as_str());
        let others: Vec<&ScheduleEntry> = self
            .editor
            .store()
            .visible()
            .filter(|t| Some(t.origin()) != origin.as_ref())
            .map(|t| &t.current)
            .collect();
        validate_entry(draft, original_name, &others)?;

        self.editor
            .commit()
            .ok_or_else(|| SessionError::UnknownRecord("no schedule item is being edited".into()))
    }

    pub fn commit_and_activate(&mut self) -> Result<RecordId<u32>, SessionError> {
        if let Some(draft) = self.editor.draft_mut() {
            draft.active = true;
        }
        self.commit()
    }

    pub fn close_editor(&mut self) {
        self.editor.close();
    }

    /// Soft-delete; the entry disappears from listings and from the next save.
    pub fn remove(&mut self, origin: &RecordId<u32>) -> Result<(), SessionError> {
        self.editor.update(origin, |e| ScheduleEntry {
            deleted: true,
            ..e.clone()
        })
    }

    /// Wire form of the live schedule. Pending entries get ids above every saved one.
    pub fn wire_items(&self) -> Vec<ScheduleItem> {
        let live = self.editor.store().live_records();
        let mut next_id = live.iter().filter_map(|e| e.id.saved().copied()).max().unwrap_or(0);
        live.iter()
            .map(|e| match e.id {
                RecordId::Saved(id) => e.to_wire(id),
                RecordId::Pending(_) => {
                    next_id += 1;
                    e.to_wire(next_id)
                }
            })
            .collect()
    }

    pub fn save(&mut self, gateway: &dyn Gateway) -> Result<SaveOutcome, SessionError> {
        let dirty = self.dirty_count();
        if dirty == 0 {
            return Ok(SaveOutcome::NothingToSave);
        }

        // entries the gateway already holds unchanged are not re-checked
        let visible: Vec<_> = self.editor.store().visible().collect();
        let mut errors = Vec::new();
        for t in visible.iter().filter(|t| t.is_dirty()) {
            let others: Vec<&ScheduleEntry> = visible
                .iter()
                .filter(|o| o.origin() != t.origin())
                .map(|o| &o.current)
                .collect();
            let original_name = t.baseline().map(|b| b.name.as_str());
            if let Err(mut e) = validate_entry(&t.current, original_name, &others) {
                errors.append(&mut e);
            }
        }
        if !errors.is_empty() {
            warn!("Schedule save refused: {} validation error(s)", errors.len());
            return Err(SessionError::Validation(errors));
        }

        let items = self.wire_items();
        debug!("Posting {} schedule item(s), {} changed", items.len(), dirty);
        let restart = match gateway.save_schedule(&items) {
            Ok(()) => false,
            Err(GatewayError::RebootRequired) => true,
            Err(e) => {
                warn!("Schedule save failed, keeping {} local change(s): {}", dirty, e);
                return Err(e.into());
            }
        };

        if let Err(e) = self.reload(gateway) {
            warn!("Schedule saved but reload failed ({}); keeping local copy as baseline", e);
            self.editor.rebase();
        }
        info!("Schedule saved ({} change(s))", dirty);
        Ok(if restart {
            SaveOutcome::RestartRequired { records: dirty }
        } else {
            SaveOutcome::Saved { records: dirty }
        })
    }

    /// Throw away local edits and reload from the gateway.
    pub fn reload(&mut self, gateway: &dyn Gateway) -> Result<(), SessionError> {
        let items = gateway.schedule()?;
        self.editor.replace(items.into_iter().map(ScheduleEntry::from_wire).collect());
        Ok(())
    }
}

impl PolledView for ScheduleSession {
    fn name(&self) -> &str {
        "schedule"
    }

    fn is_suspended(&self) -> bool {
        self.dirty_count() > 0 || self.is_editing()
    }

    fn refresh(&mut self, gateway: &dyn Gateway) -> Result<(), SessionError> {
        self.reload(gateway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::schedule_flags::DayMask;
    use crate::services::testing::FakeGateway;

    fn session(gw: &FakeGateway) -> ScheduleSession {
        ScheduleSession::load(gw).expect("load schedule")
    }

    #[test]
    fn listing_sorts_days_before_types() {
        let gw = FakeGateway::with_fixtures();
        let s = session(&gw);
        let flags: Vec<u8> = s.entries().iter().map(|e| encode_type(e.kind)).collect();
        assert_eq!(flags, vec![1, 6, 31, 128, 130]);
        assert_eq!(s.dirty_count(), 0);
    }

    #[test]
    fn create_validate_and_save() {
        let gw = FakeGateway::with_fixtures();
        let mut s = session(&gw);

        let draft = s.begin_create();
        draft.name = "Day_Mode".into();
        draft.cmd = "hc1/mode".into();
        draft.time = "08:00".into();
        draft.kind = ScheduleKind::Day(DayMask::from_bits(64));
        assert!(s.is_editing());

        let err = s.commit().unwrap_err();
        assert!(matches!(err, SessionError::Validation(ref v) if v[0].field == "name"));
        assert!(s.is_editing());

        s.draft_mut().expect("still open").name = "weekend".into();
        let origin = s.commit_and_activate().expect("valid entry");
        assert!(origin.is_pending());
        assert_eq!(s.dirty_count(), 1);

        let wire = s.wire_items();
        let created = wire.iter().find(|i| i.name == "weekend").expect("created entry");
        assert_eq!(created.id, 6);
        assert!(created.active);

        let outcome = s.save(&gw).expect("save");
        assert_eq!(outcome, SaveOutcome::Saved { records: 1 });
        assert_eq!(gw.saved_schedule().map(|v| v.len()), Some(6));
        assert_eq!(s.dirty_count(), 0);
    }

    #[test]
    fn editing_keeps_own_name_and_type_switch_clears_time() {
        let gw = FakeGateway::with_fixtures();
        let mut s = session(&gw);
        let entry = s.begin_edit(&RecordId::Saved(1)).expect("entry 1");
        entry.name = "DAY_MODE".into();
        entry.set_type(ScheduleType::Immediate);
        assert_eq!(entry.time, "");
        s.commit().expect("own name may change case");
        assert_eq!(s.dirty_count(), 1);
    }

    #[test]
    fn remove_hides_entry_and_counts_as_change() {
        let gw = FakeGateway::with_fixtures();
        let mut s = session(&gw);
        s.remove(&RecordId::Saved(3)).expect("entry 3");
        assert_eq!(s.entries().len(), 4);
        assert_eq!(s.dirty_count(), 1);
        assert!(s.wire_items().iter().all(|i| i.id != 3));
    }

    #[test]
    fn unchanged_entries_do_not_block_a_save() {
        let gw = FakeGateway::with_fixtures();
        let mut items = gw.schedule().expect("fixture schedule");
        // the gateway list already holds two names differing only in case
        items[1].name = "DAY_MODE".into();
        gw.save_schedule(&items).expect("seed schedule");

        let mut s = session(&gw);
        s.remove(&RecordId::Saved(3)).expect("entry 3");
        assert_eq!(s.save(&gw).expect("save"), SaveOutcome::Saved { records: 1 });

        // an edited entry is still checked against the others
        let entry = s.begin_edit(&RecordId::Saved(5)).expect("entry 5");
        entry.name = "Day_Mode".into();
        assert!(s.commit().is_err());
    }

    #[test]
    fn failed_save_keeps_local_changes() {
        let gw = FakeGateway::with_fixtures();
        let mut s = session(&gw);
        s.remove(&RecordId::Saved(3)).expect("entry 3");
        gw.fail_next_save(GatewayError::Transport("connection reset".into()));
        assert!(matches!(s.save(&gw), Err(SessionError::Gateway(GatewayError::Transport(_)))));
        assert_eq!(s.dirty_count(), 1);
    }

    #[test]
    fn polling_is_suspended_while_dirty_or_editing() {
        let gw = FakeGateway::with_fixtures();
        let mut s = session(&gw);
        assert!(!s.is_suspended());
        s.begin_edit(&RecordId::Saved(2)).expect("entry 2");
        assert!(s.is_suspended());
        s.close_editor();
        assert!(!s.is_suspended());
        s.remove(&RecordId::Saved(2)).expect("entry 2");
        assert!(s.is_suspended());
    }
}
