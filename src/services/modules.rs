//! Modules screen: enable or license add-on modules installed on the gateway.

use crate::client::{Gateway, GatewayError};
use crate::engine::store::RecordStore;
use crate::engine::tracker::{FieldChanges, Record, RecordId};
use crate::models::ems::{ModuleItem, ModuleUpdate};
use crate::services::poll::PolledView;
use crate::services::session::{SaveOutcome, SessionError};
use log::{info, warn};

/// Only `enabled` and `license` are editable; the rest is reported by the module.
impl Record for ModuleItem {
    type Key = String;

    fn id(&self) -> RecordId<String> {
        RecordId::Saved(self.key.clone())
    }

    fn is_deleted(&self) -> bool {
        false
    }

    fn changes_from(&self, baseline: &Self) -> FieldChanges {
        FieldChanges::new()
            .field("enabled", &self.enabled, &baseline.enabled)
            .field("license", &self.license, &baseline.license)
    }
}

#[derive(Debug)]
pub struct ModuleSession {
    store: RecordStore<ModuleItem>,
}

impl ModuleSession {
    pub fn load(gateway: &dyn Gateway) -> Result<Self, SessionError> {
        let modules = gateway.modules()?;
        info!("Loaded {} module(s)", modules.len());
        Ok(ModuleSession {
            store: RecordStore::from_loaded(modules),
        })
    }

    pub fn modules(&self) -> Vec<&ModuleItem> {
        self.store.iter().map(|t| &t.current).collect()
    }

    pub fn dirty_count(&self) -> usize {
        self.store.dirty_count()
    }

    fn edit<F: FnMut(&ModuleItem) -> ModuleItem>(&mut self, key: &str, edit: F) -> Result<(), SessionError> {
        let (store, touched) = self.store.update_where(|m| m.key == key, edit);
        if touched == 0 {
            return Err(SessionError::UnknownRecord(key.to_string()));
        }
        self.store = store;
        Ok(())
    }

    pub fn set_enabled(&mut self, key: &str, enabled: bool) -> Result<(), SessionError> {
        self.edit(key, |m| ModuleItem {
            enabled,
            ..m.clone()
        })
    }

    pub fn set_license(&mut self, key: &str, license: &str) -> Result<(), SessionError> {
        self.edit(key, |m| ModuleItem {
            license: license.trim().to_string(),
            ..m.clone()
        })
    }

    /// Post every module, then reload to pick up the new status.
    pub fn save(&mut self, gateway: &dyn Gateway) -> Result<SaveOutcome, SessionError> {
        let dirty = self.dirty_count();
        if dirty == 0 {
            return Ok(SaveOutcome::NothingToSave);
        }

        let mut restart = false;
        for m in self.store.iter().map(|t| &t.current) {
            let update = ModuleUpdate {
                key: m.key.clone(),
                enabled: m.enabled,
                license: m.license.clone(),
            };
            match gateway.save_module(&update) {
                Ok(()) => {}
                Err(GatewayError::RebootRequired) => restart = true,
                Err(e) => {
                    warn!("Saving module {} failed, keeping local changes: {}", m.key, e);
                    return Err(e.into());
                }
            }
        }

        if let Err(e) = self.reload(gateway) {
            warn!("Modules saved but reload failed ({}); keeping local copy as baseline", e);
            self.store = self.store.rebased();
        }
        info!("Modules saved ({} change(s))", dirty);
        Ok(if restart {
            SaveOutcome::RestartRequired { records: dirty }
        } else {
            SaveOutcome::Saved { records: dirty }
        })
    }

    pub fn reload(&mut self, gateway: &dyn Gateway) -> Result<(), SessionError> {
        self.store = RecordStore::from_loaded(gateway.modules()?);
        Ok(())
    }
}

impl PolledView for ModuleSession {
    fn name(&self) -> &str {
        "modules"
    }

    fn is_suspended(&self) -> bool {
        self.dirty_count() > 0
    }

    fn refresh(&mut self, gateway: &dyn Gateway) -> Result<(), SessionError> {
        self.reload(gateway)
    }
}
