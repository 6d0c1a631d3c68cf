//! Entity customization screen for one EMS device.
//!
//! Only changed entities are sent, as compact tokens (see [`crate::engine::codec`]).

use crate::client::{Gateway, GatewayError};
use crate::engine::codec::{EncodedBatch, encode_batch};
use crate::engine::mask::{MaskToggles, apply_mask_edit, visibility_edit};
use crate::engine::store::RecordStore;
use crate::engine::tracker::{RecordId, Tracked};
use crate::models::ems::{CustomizationRequest, DeviceEntity, DeviceId, EntityMask};
use crate::services::poll::PolledView;
use crate::services::session::{SaveOutcome, SessionError};
use crate::utils::{entity_display_name, mask_flags};
use crate::validate::{self, ValidationError};
use log::{debug, info, warn};

const MASK_TOGGLE_BITS: [EntityMask; 5] = [
    EntityMask::FAVORITE,
    EntityMask::READONLY,
    EntityMask::API_MQTT_EXCLUDE,
    EntityMask::WEB_EXCLUDE,
    EntityMask::DELETED,
];

/// Which entities a bulk edit applies to.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    /// Entities with any of these bits set; empty matches every mask.
    pub mask: EntityMask,
    /// Substring of the display name (including the short id).
    pub search: String,
}

impl EntityFilter {
    pub fn search(text: impl Into<String>) -> Self {
        EntityFilter {
            mask: EntityMask::DEFAULT,
            search: text.into(),
        }
    }

    pub fn matches(&self, de: &DeviceEntity) -> bool {
        let mask_ok = self.mask.is_empty() || de.mask.intersects(self.mask);
        let needle = self.search.to_lowercase();
        mask_ok && entity_display_name(de, true).to_lowercase().contains(&needle)
    }
}

#[derive(Debug)]
pub struct CustomizationSession {
    device: DeviceId,
    store: RecordStore<DeviceEntity>,
    restart_needed: bool,
}

impl CustomizationSession {
    pub fn open(gateway: &dyn Gateway, device: DeviceId) -> Result<Self, SessionError> {
        let entities = gateway.device_entities(device)?;
        info!("Loaded {} entities for device {}", entities.len(), device.0);
        Ok(CustomizationSession {
            device,
            store: RecordStore::from_loaded(entities),
            restart_needed: false,
        })
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Every entity, deleted ones included; deletion is just another mask bit here.
    pub fn entities(&self) -> impl Iterator<Item = &Tracked<DeviceEntity>> {
        self.store.iter()
    }

    pub fn entity(&self, id: &str) -> Option<&Tracked<DeviceEntity>> {
        self.store.find(&RecordId::Saved(id.to_string()))
    }

    pub fn toggles(&self, id: &str) -> Option<MaskToggles> {
        self.entity(id).map(|t| MaskToggles::for_entity(&t.current))
    }

    pub fn dirty_count(&self) -> usize {
        self.store.dirty_count()
    }

    /// Set when the gateway has to restart before saved customizations take effect.
    pub fn restart_needed(&self) -> bool {
        self.restart_needed
    }

    fn lookup(&self, id: &str) -> Result<&Tracked<DeviceEntity>, SessionError> {
        self.entity(id).ok_or_else(|| SessionError::UnknownRecord(id.to_string()))
    }

    /// Request a new mask for one entity. Returns the mask actually stored.
    ///
    /// Flipping a bit whose toggle is disabled for this entity is refused.
    pub fn edit_mask(&mut self, id: &str, requested: EntityMask) -> Result<EntityMask, SessionError> {
        let mut target = self.lookup(id)?.clone();
        let toggles = MaskToggles::for_entity(&target.current);
        let flipped = EntityMask(target.current.mask.bits() ^ requested.bits()) & EntityMask::USER_BITS;
        let refused: Vec<ValidationError> = MASK_TOGGLE_BITS
            .iter()
            .filter(|bit| flipped.contains(**bit) && !toggles.allows(**bit))
            .map(|bit| ValidationError::new(id, format!("{} cannot be changed for this entity", mask_flags(*bit))))
            .collect();
        if !refused.is_empty() {
            warn!("Mask edit of {} refused: {} disabled toggle(s)", id, refused.len());
            return Err(SessionError::Validation(refused));
        }

        let mask = apply_mask_edit(&target.current, requested);
        target.current.mask = mask;
        self.store = self.store.merge_saved(target, false);
        Ok(mask)
    }

    /// Dialog edit of the user overrides. Refused when min exceeds max or the name holds a
    /// bound separator.
    pub fn update_entity(
        &mut self,
        id: &str,
        custom_name: Option<String>,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<(), SessionError> {
        let mut target = self.lookup(id)?.clone();
        if !target.current.is_editable() {
            return Err(ValidationError::new(id, "entity cannot be edited").into());
        }
        target.current.custom_name = custom_name;
        if target.current.accepts_bounds() {
            target.current.min = min;
            target.current.max = max;
        }
        validate::collect([
            validate::entity_custom_name(&target.current),
            validate::entity_bounds(&target.current),
        ])?;
        self.store = self.store.merge_saved(target, false);
        Ok(())
    }

    /// Hide or show every entity matching `filter`, on the web UI and the API/MQTT alike.
    pub fn set_visibility(&mut self, filter: &EntityFilter, hidden: bool) -> usize {
        let (store, touched) = self.store.update_where(
            |de| filter.matches(de),
            |de| DeviceEntity {
                mask: visibility_edit(de, hidden),
                ..de.clone()
            },
        );
        self.store = store;
        touched
    }

    /// Tokens the next save would send.
    pub fn pending_batch(&self) -> EncodedBatch {
        encode_batch(self.store.iter())
    }

    pub fn save(&mut self, gateway: &dyn Gateway) -> Result<SaveOutcome, SessionError> {
        let errors: Vec<ValidationError> = self
            .store
            .iter()
            .filter(|t| t.is_dirty())
            .flat_map(|t| [validate::entity_custom_name(&t.current), validate::entity_bounds(&t.current)])
            .filter_map(Result::err)
            .collect();
        if !errors.is_empty() {
            return Err(SessionError::Validation(errors));
        }

        let batch = self.pending_batch();
        if batch.is_empty() {
            return Ok(SaveOutcome::NothingToSave);
        }
        debug!(
            "Customization batch for device {}: {} token(s), {} bytes",
            self.device.0,
            batch.tokens.len(),
            batch.byte_size
        );
        let entity_ids = batch.into_payload().inspect_err(|e| warn!("{}", e))?;
        let records = entity_ids.len();

        let request = CustomizationRequest {
            id: self.device,
            entity_ids,
        };
        let outcome = match gateway.save_customization(&request) {
            Ok(()) => SaveOutcome::Saved { records },
            Err(GatewayError::RebootRequired) => {
                self.restart_needed = true;
                SaveOutcome::RestartRequired { records }
            }
            Err(e) => {
                warn!("Customization save failed, keeping local changes: {}", e);
                return Err(e.into());
            }
        };
        self.store = self.store.rebased();
        info!("Saved {} customization(s) for device {}", records, self.device.0);
        Ok(outcome)
    }

    pub fn reload(&mut self, gateway: &dyn Gateway) -> Result<(), SessionError> {
        let entities = gateway.device_entities(self.device)?;
        self.store = RecordStore::from_loaded(entities);
        Ok(())
    }

    /// Drop every customization of every device. The gateway restarts afterwards.
    pub fn reset_all(&mut self, gateway: &dyn Gateway) -> Result<(), SessionError> {
        reset_customizations(gateway)?;
        self.restart_needed = true;
        Ok(())
    }
}

pub fn reset_customizations(gateway: &dyn Gateway) -> Result<(), SessionError> {
    match gateway.reset_customizations() {
        Ok(()) | Err(GatewayError::RebootRequired) => {
            info!("Customizations reset; the gateway is restarting");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

impl PolledView for CustomizationSession {
    fn name(&self) -> &str {
        "customizations"
    }

    fn is_suspended(&self) -> bool {
        self.dirty_count() > 0
    }

    fn refresh(&mut self, gateway: &dyn Gateway) -> Result<(), SessionError> {
        self.reload(gateway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::codec::CodecError;
    use crate::services::testing::FakeGateway;

    const BOILER: DeviceId = DeviceId(1);

    fn open(gw: &FakeGateway) -> CustomizationSession {
        CustomizationSession::open(gw, BOILER).expect("open boiler")
    }

    #[test]
    fn mask_edit_goes_through_constraints() {
        let gw = FakeGateway::with_fixtures();
        let mut s = open(&gw);
        // errorcode is a favorite; hiding it must drop the favorite bit
        let mask = s.edit_mask("errorcode", EntityMask::FAVORITE | EntityMask::WEB_EXCLUDE).expect("known");
        assert_eq!(mask, EntityMask::WEB_EXCLUDE);
        assert_eq!(s.dirty_count(), 1);

        let mask = s.edit_mask("heatingpumpmod", EntityMask::READONLY).expect("known");
        assert_eq!(mask, EntityMask::READONLY | EntityMask::WEB_EXCLUDE);
        assert!(s.edit_mask("nope", EntityMask::DEFAULT).is_err());
    }

    #[test]
    fn disabled_toggles_cannot_be_flipped() {
        let gw = FakeGateway::with_fixtures();
        let mut s = open(&gw);
        // datetime is not writeable
        let err = s.edit_mask("datetime", EntityMask::READONLY).unwrap_err();
        assert!(matches!(err, SessionError::Validation(ref v) if v[0].field == "datetime"));
        // maintenancetype has no name
        assert!(s.edit_mask("maintenancetype", EntityMask::FAVORITE).is_err());
        assert!(s.edit_mask("heatingpumpmod", EntityMask::API_MQTT_EXCLUDE).is_err());
        assert_eq!(s.dirty_count(), 0);
        assert!(s.pending_batch().is_empty());

        // untouched disabled bits do not block other toggles
        assert_eq!(
            s.edit_mask("reset", EntityMask::FAVORITE | EntityMask::API_MQTT_EXCLUDE).expect("allowed"),
            EntityMask::FAVORITE | EntityMask::API_MQTT_EXCLUDE
        );
    }

    #[test]
    fn save_sends_tokens_and_reseeds_baseline() {
        let gw = FakeGateway::with_fixtures();
        let mut s = open(&gw);
        s.edit_mask("selflowtemp", EntityMask::DEFAULT).expect("known");
        s.update_entity("hc1/seltemp", Some("living".into()), Some(10.0), Some(30.0))
            .expect("valid bounds");

        let outcome = s.save(&gw).expect("save");
        assert_eq!(outcome, SaveOutcome::Saved { records: 2 });
        let sent = gw.customizations();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, BOILER);
        assert_eq!(sent[0].entity_ids, vec!["00hc1/seltemp|living>10<30".to_string(), "00selflowtemp".to_string()]);
        assert_eq!(s.dirty_count(), 0);
        assert_eq!(s.save(&gw).expect("second save"), SaveOutcome::NothingToSave);
    }

    #[test]
    fn inverted_bounds_are_refused_locally() {
        let gw = FakeGateway::with_fixtures();
        let mut s = open(&gw);
        let err = s.update_entity("hc1/seltemp", None, Some(40.0), Some(30.0)).unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
        assert_eq!(s.dirty_count(), 0);
        assert!(s.update_entity("reset", Some("x".into()), None, None).is_err());
    }

    #[test]
    fn names_that_would_split_into_bounds_are_refused() {
        let gw = FakeGateway::with_fixtures();
        let mut s = open(&gw);
        let err = s.update_entity("hc1/seltemp", Some("a<b".into()), None, None).unwrap_err();
        assert!(matches!(err, SessionError::Validation(ref v) if v[0].field == "hc1/seltemp name"));
        assert!(s.update_entity("errorcode", Some("on|off".into()), None, None).is_err());
        assert_eq!(s.dirty_count(), 0);
    }

    #[test]
    fn reboot_required_counts_as_saved() {
        let gw = FakeGateway::with_fixtures();
        let mut s = open(&gw);
        s.edit_mask("datetime", EntityMask::API_MQTT_EXCLUDE).expect("known");
        gw.fail_next_save(GatewayError::RebootRequired);
        assert_eq!(s.save(&gw).expect("accepted"), SaveOutcome::RestartRequired { records: 1 });
        assert!(s.restart_needed());
        assert_eq!(s.dirty_count(), 0);
    }

    #[test]
    fn rejected_save_keeps_changes() {
        let gw = FakeGateway::with_fixtures();
        let mut s = open(&gw);
        s.edit_mask("datetime", EntityMask::API_MQTT_EXCLUDE).expect("known");
        gw.fail_next_save(GatewayError::Http {
            status: 401,
            message: "Unauthorized".into(),
        });
        assert!(s.save(&gw).is_err());
        assert_eq!(s.dirty_count(), 1);
    }

    #[test]
    fn oversized_batch_never_reaches_the_gateway() {
        let gw = FakeGateway::with_fixtures();
        let mut s = open(&gw);
        let long = "x".repeat(400);
        for id in ["errorcode", "datetime", "hc1/curtemp", "hc1/mode", "selflowtemp", "selburnpow"] {
            s.update_entity(id, Some(long.clone()), None, None).expect("editable");
        }
        let err = s.save(&gw).unwrap_err();
        assert!(matches!(err, SessionError::Codec(CodecError::PayloadTooLarge { .. })));
        assert!(gw.customizations().is_empty());
        assert_eq!(s.dirty_count(), 6);
    }

    #[test]
    fn bulk_visibility_respects_filter() {
        let gw = FakeGateway::with_fixtures();
        let mut s = open(&gw);
        let touched = s.set_visibility(&EntityFilter::search("hc1"), true);
        assert_eq!(touched, 3);
        let both = EntityMask::WEB_EXCLUDE | EntityMask::API_MQTT_EXCLUDE;
        assert!(s.entity("hc1/mode").is_some_and(|t| t.current.mask.contains(both)));
        assert!(s.entity("datetime").is_some_and(|t| !t.is_dirty()));

        let favorites = EntityFilter {
            mask: EntityMask::FAVORITE,
            search: String::new(),
        };
        assert_eq!(s.set_visibility(&favorites, true), 3);
        assert!(s.entity("errorcode").is_some_and(|t| !t.current.mask.contains(EntityMask::FAVORITE)));
    }

    #[test]
    fn reset_marks_restart() {
        let gw = FakeGateway::with_fixtures();
        let mut s = open(&gw);
        s.reset_all(&gw).expect("reset");
        assert!(s.restart_needed());
        assert_eq!(gw.resets(), 1);
    }
}
