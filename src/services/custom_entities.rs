//! Custom entities screen: user-defined values read from EMS telegrams or kept in RAM.

use crate::client::{Gateway, GatewayError};
use crate::engine::tracker::{FieldChanges, Record, RecordId};
use crate::models::ems::{EntityItem, NumberOrText};
use crate::services::poll::PolledView;
use crate::services::session::{Editor, SaveOutcome, SessionError};
use crate::validate::{self, ValidationError};
use log::{debug, info, warn};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct CustomEntity {
    pub id: RecordId<u32>,
    /// 0 = read from an EMS telegram, 1 = RAM-only variable.
    pub ram: u8,
    pub name: String,
    pub device_id: NumberOrText,
    pub type_id: NumberOrText,
    pub offset: i32,
    pub factor: NumberOrText,
    pub uom: u8,
    pub value_type: u8,
    pub writeable: bool,
    pub hide: bool,
    pub value: Option<Value>,
    pub deleted: bool,
}

impl CustomEntity {
    pub fn from_wire(item: EntityItem) -> Self {
        CustomEntity {
            id: RecordId::Saved(item.id),
            ram: item.ram,
            name: item.name,
            device_id: item.device_id,
            type_id: item.type_id,
            offset: item.offset,
            factor: item.factor,
            uom: item.uom,
            value_type: item.value_type,
            writeable: item.writeable,
            hide: item.hide,
            value: item.value,
            deleted: false,
        }
    }

    /// Telegram ids are entered as hex text but sent as numbers.
    pub fn to_wire(&self, id: u32) -> EntityItem {
        EntityItem {
            id,
            ram: self.ram,
            name: self.name.clone(),
            device_id: self.device_id.to_numeric(),
            type_id: self.type_id.to_numeric(),
            offset: self.offset,
            factor: self.factor.clone(),
            uom: self.uom,
            value_type: self.value_type,
            writeable: self.writeable,
            hide: self.hide,
            value: self.value.clone(),
        }
    }

    fn blank(id: RecordId<u32>) -> Self {
        CustomEntity {
            id,
            ram: 0,
            name: String::new(),
            device_id: NumberOrText::Text("0".into()),
            type_id: NumberOrText::Text("0".into()),
            offset: 0,
            factor: NumberOrText::Number(1.0),
            uom: 0,
            value_type: 0,
            writeable: false,
            hide: false,
            value: None,
            deleted: false,
        }
    }

    /// Copy under a new identity, named `<name>_`.
    pub fn duplicate(&self, id: RecordId<u32>) -> Self {
        CustomEntity {
            id,
            name: format!("{}_", self.name),
            deleted: false,
            ..self.clone()
        }
    }
}

fn value_text(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

impl Record for CustomEntity {
    type Key = u32;

    fn id(&self) -> RecordId<u32> {
        self.id.clone()
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn changes_from(&self, baseline: &Self) -> FieldChanges {
        let CustomEntity {
            id,
            ram,
            name,
            device_id,
            type_id,
            offset,
            factor,
            uom,
            value_type,
            writeable,
            hide,
            value,
            deleted,
        } = self;
        let value = value_text(value.as_ref());
        let baseline_value = value_text(baseline.value.as_ref());
        FieldChanges::new()
            .field("id", id, &baseline.id)
            .field("ram", ram, &baseline.ram)
            .text("name", Some(name.as_str()), Some(baseline.name.as_str()))
            .field("device_id", device_id, &baseline.device_id)
            .field("type_id", type_id, &baseline.type_id)
            .field("offset", offset, &baseline.offset)
            .field("uom", uom, &baseline.uom)
            .field("factor", factor, &baseline.factor)
            .field("value_type", value_type, &baseline.value_type)
            .field("writeable", writeable, &baseline.writeable)
            .field("hide", hide, &baseline.hide)
            .field("deleted", deleted, &baseline.deleted)
            .text("value", Some(value.as_str()), Some(baseline_value.as_str()))
    }
}

pub fn validate_entity(
    entity: &CustomEntity,
    original_name: Option<&str>,
    others: &[&CustomEntity],
) -> Result<(), Vec<ValidationError>> {
    validate::collect([
        validate::custom_entity_name(&entity.name),
        validate::unique_name("name", &entity.name, original_name, others.iter().map(|o| o.name.as_str())),
        validate::hex_field("device_id", &entity.device_id),
        validate::hex_field("type_id", &entity.type_id),
        validate::offset(entity.offset),
    ])
}

#[derive(Debug)]
pub struct CustomEntitySession {
    editor: Editor<CustomEntity>,
}

impl CustomEntitySession {
    pub fn load(gateway: &dyn Gateway) -> Result<Self, SessionError> {
        let items = gateway.custom_entities()?;
        info!("Loaded {} custom entities", items.len());
        Ok(CustomEntitySession {
            editor: Editor::new(items.into_iter().map(CustomEntity::from_wire).collect()),
        })
    }

    pub fn entities(&self) -> Vec<&CustomEntity> {
        self.editor.store().visible().map(|t| &t.current).collect()
    }

    pub fn dirty_count(&self) -> usize {
        self.editor.dirty_count()
    }

    pub fn is_editing(&self) -> bool {
        self.editor.is_open()
    }

    pub fn begin_create(&mut self) -> &mut CustomEntity {
        self.editor.begin_create(CustomEntity::blank)
    }

    /// Open the dialog on a copy of an existing entity, as a new record.
    pub fn begin_duplicate(&mut self, origin: &RecordId<u32>) -> Result<&mut CustomEntity, SessionError> {
        let source = self
            .editor
            .store()
            .find_origin(origin)
            .map(|t| t.current.clone())
            .ok_or_else(|| SessionError::UnknownRecord(origin.to_string()))?;
        Ok(self.editor.begin_create(|id| source.duplicate(id)))
    }

    pub fn begin_edit(&mut self, origin: &RecordId<u32>) -> Result<&mut CustomEntity, SessionError> {
        self.editor.begin_edit(origin)
    }

    pub fn draft_mut(&mut self) -> Option<&mut CustomEntity> {
        self.editor.draft_mut()
    }

    pub fn commit(&mut self) -> Result<RecordId<u32>, SessionError> {
        let draft = self
            .editor
            .draft()
            .ok_or_else(|| SessionError::UnknownRecord("no custom entity is being edited".into()))?;
        let origin = self.editor.draft_origin().cloned();
        let original_name = self.editor.draft_baseline().map(|b| b.name.as_str());
        let others: Vec<&CustomEntity> = self
            .editor
            .store()
            .visible()
            .filter(|t| Some(t.origin()) != origin.as_ref())
            .map(|t| &t.current)
            .collect();
        validate_entity(draft, original_name, &others)?;

        self.editor
            .commit()
            .ok_or_else(|| SessionError::UnknownRecord("no custom entity is being edited".into()))
    }

    pub fn close_editor(&mut self) {
        self.editor.close();
    }

    pub fn remove(&mut self, origin: &RecordId<u32>) -> Result<(), SessionError> {
        self.editor.update(origin, |e| CustomEntity {
            deleted: true,
            ..e.clone()
        })
    }

    /// Wire form of the live entities. Pending entities get ids above every saved one.
    pub fn wire_items(&self) -> Vec<EntityItem> {
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

        let items = self.wire_items();
        debug!("Posting {} custom entities, {} changed", items.len(), dirty);
        let restart = match gateway.save_custom_entities(&items) {
            Ok(()) => false,
            Err(GatewayError::RebootRequired) => true,
            Err(e) => {
                warn!("Custom entity save failed, keeping {} local change(s): {}", dirty, e);
                return Err(e.into());
            }
        };

        if let Err(e) = self.reload(gateway) {
            warn!("Custom entities saved but reload failed ({}); keeping local copy as baseline", e);
            self.editor.rebase();
        }
        info!("Custom entities saved ({} change(s))", dirty);
        Ok(if restart {
            SaveOutcome::RestartRequired { records: dirty }
        } else {
            SaveOutcome::Saved { records: dirty }
        })
    }

    pub fn reload(&mut self, gateway: &dyn Gateway) -> Result<(), SessionError> {
        let items = gateway.custom_entities()?;
        self.editor.replace(items.into_iter().map(CustomEntity::from_wire).collect());
        Ok(())
    }
}

impl PolledView for CustomEntitySession {
    fn name(&self) -> &str {
        "custom entities"
    }

    fn is_suspended(&self) -> bool {
        self.dirty_count() > 0 || self.is_editing()
    }

    fn refresh(&mut self, gateway: &dyn Gateway) -> Result<(), SessionError> {
        self.reload(gateway)
    }
}
