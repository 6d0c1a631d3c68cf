//! In-memory gateway for session tests.

use crate::client::{Gateway, GatewayError};
use crate::models::ems::*;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

#[derive(Default)]
pub struct FakeGateway {
    core: CoreData,
    entities: HashMap<u32, Vec<DeviceEntity>>,
    schedule: RefCell<Vec<ScheduleItem>>,
    custom: RefCell<Vec<EntityItem>>,
    modules: RefCell<Vec<ModuleItem>>,
    customizations: RefCell<Vec<CustomizationRequest>>,
    module_updates: RefCell<Vec<ModuleUpdate>>,
    saved_schedule: RefCell<Option<Vec<ScheduleItem>>>,
    saved_entities: RefCell<Option<Vec<EntityItem>>>,
    next_save_error: RefCell<Option<GatewayError>>,
    resets: Cell<usize>,
}

fn fixture<T: serde::de::DeserializeOwned>(path: &str) -> T {
    let json = std::fs::read_to_string(path).expect("fixture present");
    serde_json::from_str(&json).expect("fixture parses")
}

fn module(id: u32, key: &str, enabled: bool) -> ModuleItem {
    ModuleItem {
        id,
        key: key.into(),
        name: key.into(),
        author: "emsesp".into(),
        version: "1.0.0".into(),
        status: 1,
        message: String::new(),
        enabled,
        license: String::new(),
    }
}

impl FakeGateway {
    /// Boiler (device 1) with the entity fixture, the schedule fixture, two custom
    /// entities and two modules.
    pub fn with_fixtures() -> Self {
        let schedule: Schedule = fixture("tests/data/schedule.json");
        let custom: Entities = serde_json::from_str(
            r#"{"entities":[
                {"id":0,"ram":0,"name":"boiler_flowtemp","device_id":8,"type_id":"318","offset":0,"factor":1,"uom":1,"value_type":1,"writeable":false,"hide":false,"value":30},
                {"id":1,"ram":1,"name":"room_setpoint","device_id":"0","type_id":"0","offset":0,"factor":1,"uom":1,"value_type":8,"writeable":true,"hide":false,"value":20}
            ]}"#,
        )
        .expect("custom entities parse");
        let core: CoreData = serde_json::from_str(
            r#"{"connected":true,"devices":[
                {"id":1,"tn":"Boiler","t":4,"b":"Buderus","n":"GBx72","d":8,"p":123,"v":"06.01","e":73,"url":"boiler"},
                {"id":99,"tn":"Custom","t":0,"n":"Custom Entities","d":0,"p":0,"e":2}
            ]}"#,
        )
        .expect("core data parse");

        let mut entities: HashMap<u32, Vec<DeviceEntity>> = HashMap::new();
        entities.insert(1, fixture("tests/data/device-entities.json"));

        FakeGateway {
            core,
            entities,
            schedule: RefCell::new(schedule.schedule),
            custom: RefCell::new(custom.entities),
            modules: RefCell::new(vec![module(1, "ModuleTest1", false), module(2, "ModuleTest2", true)]),
            ..Default::default()
        }
    }

    /// The next save call of any kind answers with `error`.
    pub fn fail_next_save(&self, error: GatewayError) {
        *self.next_save_error.borrow_mut() = Some(error);
    }

    pub fn customizations(&self) -> Vec<CustomizationRequest> {
        self.customizations.borrow().clone()
    }

    pub fn module_updates(&self) -> Vec<ModuleUpdate> {
        self.module_updates.borrow().clone()
    }

    pub fn saved_schedule(&self) -> Option<Vec<ScheduleItem>> {
        self.saved_schedule.borrow().clone()
    }

    pub fn saved_entities(&self) -> Option<Vec<EntityItem>> {
        self.saved_entities.borrow().clone()
    }

    pub fn resets(&self) -> usize {
        self.resets.get()
    }

    /// Consume a queued failure. `RebootRequired` still lets the save through.
    fn save_result(&self) -> Result<bool, GatewayError> {
        match self.next_save_error.borrow_mut().take() {
            None => Ok(false),
            Some(GatewayError::RebootRequired) => Ok(true),
            Some(e) => Err(e),
        }
    }

    fn finish(reboot: bool) -> Result<(), GatewayError> {
        if reboot { Err(GatewayError::RebootRequired) } else { Ok(()) }
    }
}

impl Gateway for FakeGateway {
    fn core_data(&self) -> Result<CoreData, GatewayError> {
        Ok(self.core.clone())
    }

    fn device_entities(&self, device: DeviceId) -> Result<Vec<DeviceEntity>, GatewayError> {
        Ok(self.entities.get(&device.0).cloned().unwrap_or_default())
    }

    fn save_customization(&self, request: &CustomizationRequest) -> Result<(), GatewayError> {
        let reboot = self.save_result()?;
        self.customizations.borrow_mut().push(request.clone());
        Self::finish(reboot)
    }

    fn reset_customizations(&self) -> Result<(), GatewayError> {
        self.resets.set(self.resets.get() + 1);
        Err(GatewayError::RebootRequired)
    }

    fn schedule(&self) -> Result<Vec<ScheduleItem>, GatewayError> {
        Ok(self.schedule.borrow().clone())
    }

    fn save_schedule(&self, items: &[ScheduleItem]) -> Result<(), GatewayError> {
        let reboot = self.save_result()?;
        *self.schedule.borrow_mut() = items.to_vec();
        *self.saved_schedule.borrow_mut() = Some(items.to_vec());
        Self::finish(reboot)
    }

    fn custom_entities(&self) -> Result<Vec<EntityItem>, GatewayError> {
        Ok(self.custom.borrow().clone())
    }

    fn save_custom_entities(&self, items: &[EntityItem]) -> Result<(), GatewayError> {
        let reboot = self.save_result()?;
        *self.custom.borrow_mut() = items.to_vec();
        *self.saved_entities.borrow_mut() = Some(items.to_vec());
        Self::finish(reboot)
    }

    fn modules(&self) -> Result<Vec<ModuleItem>, GatewayError> {
        Ok(self.modules.borrow().clone())
    }

    fn save_module(&self, update: &ModuleUpdate) -> Result<(), GatewayError> {
        let reboot = self.save_result()?;
        for m in self.modules.borrow_mut().iter_mut().filter(|m| m.key == update.key) {
            m.enabled = update.enabled;
            m.license = update.license.clone();
        }
        self.module_updates.borrow_mut().push(update.clone());
        Self::finish(reboot)
    }
}
