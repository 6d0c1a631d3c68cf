//! Constraint rules between the bits of a device entity mask.
//!
//! Invalid combinations are corrected, never rejected: the last toggle wins and the
//! dependent bits follow.

use crate::models::ems::{DeviceEntity, EntityMask};

/// Resolve a user's requested mask for `entity` into the mask that is actually stored.
///
/// - While DELETED is set and still requested, no other bit moves.
/// - An unnamed entity made read-only is also hidden from the web UI.
/// - FAVORITE and WEB_EXCLUDE never coexist; whichever was toggled on last wins, and a
///   forced WEB_EXCLUDE always wins.
/// - Reserved bits are kept from the current mask.
pub fn apply_mask_edit(entity: &DeviceEntity, requested: EntityMask) -> EntityMask {
    let current = entity.mask;
    if current.contains(EntityMask::DELETED) && requested.contains(EntityMask::DELETED) {
        return current;
    }

    let reserved = current.without(EntityMask::USER_BITS);
    let mut mask = (requested & EntityMask::USER_BITS) | reserved;

    let favorite_added = mask.contains(EntityMask::FAVORITE) && !current.contains(EntityMask::FAVORITE);
    let hidden_added = mask.contains(EntityMask::WEB_EXCLUDE) && !current.contains(EntityMask::WEB_EXCLUDE);
    if favorite_added && !hidden_added {
        mask = mask.without(EntityMask::WEB_EXCLUDE);
    }

    if entity.is_unnamed() && mask.contains(EntityMask::READONLY) {
        mask = mask | EntityMask::WEB_EXCLUDE;
    }

    if mask.contains(EntityMask::WEB_EXCLUDE) {
        mask = mask.without(EntityMask::FAVORITE);
    }

    mask
}

/// Set or clear both visibility bits (web and API/MQTT) in one go.
pub fn visibility_edit(entity: &DeviceEntity, hidden: bool) -> EntityMask {
    let both = EntityMask::WEB_EXCLUDE | EntityMask::API_MQTT_EXCLUDE;
    let requested = if hidden {
        entity.mask | both
    } else {
        entity.mask.without(both)
    };
    apply_mask_edit(entity, requested)
}

/// Which mask toggles the user may flip for an entity. `true` means enabled.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MaskToggles {
    pub favorite: bool,
    pub readonly: bool,
    pub api_mqtt_exclude: bool,
    pub web_exclude: bool,
    pub deleted: bool,
}

impl MaskToggles {
    pub fn for_entity(entity: &DeviceEntity) -> Self {
        let mask = entity.mask;
        let deleted = mask.contains(EntityMask::DELETED);
        MaskToggles {
            favorite: !mask.intersects(EntityMask::WEB_EXCLUDE | EntityMask::DELETED) && entity.name.is_some(),
            readonly: entity.writeable && !mask.intersects(EntityMask::WEB_EXCLUDE | EntityMask::FAVORITE),
            api_mqtt_exclude: !entity.is_unnamed() && !deleted,
            web_exclude: !entity.is_unnamed() && !deleted,
            deleted: true,
        }
    }

    pub fn allows(&self, bit: EntityMask) -> bool {
        match bit {
            EntityMask::FAVORITE => self.favorite,
            EntityMask::READONLY => self.readonly,
            EntityMask::API_MQTT_EXCLUDE => self.api_mqtt_exclude,
            EntityMask::WEB_EXCLUDE => self.web_exclude,
            EntityMask::DELETED => self.deleted,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: Option<&str>, mask: u8, writeable: bool) -> DeviceEntity {
        DeviceEntity {
            id: "selflowtemp".into(),
            value: None,
            name: name.map(str::to_string),
            custom_name: None,
            tag: None,
            mask: EntityMask(mask),
            writeable,
            min: None,
            max: None,
        }
    }

    const ALL_USER_MASKS: [u8; 32] = {
        let bits = [1u8, 2, 4, 8, 128];
        let mut out = [0u8; 32];
        let mut i = 0;
        while i < 32 {
            let mut m = 0u8;
            let mut b = 0;
            while b < 5 {
                if i & (1 << b) != 0 {
                    m |= bits[b];
                }
                b += 1;
            }
            out[i] = m;
            i += 1;
        }
        out
    };

    #[test]
    fn unnamed_readonly_is_always_web_excluded() {
        for name in [None, Some("")] {
            for current in ALL_USER_MASKS {
                let de = entity(name, current, true);
                if current & 128 != 0 {
                    continue;
                }
                for requested in ALL_USER_MASKS {
                    if requested & 4 == 0 || requested & 128 != 0 {
                        continue;
                    }
                    let m = apply_mask_edit(&de, EntityMask(requested));
                    assert!(
                        m.contains(EntityMask::WEB_EXCLUDE),
                        "current={current} requested={requested} -> {}",
                        m.bits()
                    );
                }
            }
        }
    }

    #[test]
    fn favorite_and_web_exclude_never_coexist() {
        for name in [None, Some(""), Some("flow temperature")] {
            for current in ALL_USER_MASKS {
                let de = entity(name, current, true);
                for requested in ALL_USER_MASKS {
                    let frozen = current & 128 != 0 && requested & 128 != 0;
                    let m = apply_mask_edit(&de, EntityMask(requested));
                    if !frozen && m.contains(EntityMask::WEB_EXCLUDE) {
                        assert!(!m.contains(EntityMask::FAVORITE), "current={current} requested={requested}");
                    }
                }
            }
        }
    }

    #[test]
    fn hiding_clears_favorite() {
        let de = entity(Some("flow temperature"), 8, true);
        let m = apply_mask_edit(&de, EntityMask(8 | 1));
        assert_eq!(m, EntityMask::WEB_EXCLUDE);
    }

    #[test]
    fn favoriting_a_hidden_entity_shows_it_again() {
        let de = entity(Some("flow temperature"), 1, true);
        let m = apply_mask_edit(&de, EntityMask(1 | 8));
        assert_eq!(m, EntityMask::FAVORITE);
    }

    #[test]
    fn named_readonly_stays_visible() {
        let de = entity(Some("flow temperature"), 0, true);
        assert_eq!(apply_mask_edit(&de, EntityMask::READONLY), EntityMask::READONLY);
    }

    #[test]
    fn deleted_entity_is_frozen_until_restored() {
        let de = entity(Some("flow temperature"), 128 | 2, true);
        assert_eq!(apply_mask_edit(&de, EntityMask(128 | 8 | 4)), EntityMask(128 | 2));

        let restored = apply_mask_edit(&de, EntityMask(2));
        assert_eq!(restored, EntityMask::API_MQTT_EXCLUDE);
    }

    #[test]
    fn reserved_bits_survive_edits() {
        let de = entity(Some("flow temperature"), 16 | 8, true);
        assert_eq!(apply_mask_edit(&de, EntityMask(4)), EntityMask(16 | 4));
    }

    #[test]
    fn visibility_edit_sets_and_clears_both_bits() {
        let de = entity(Some("flow temperature"), 8, true);
        let hidden = visibility_edit(&de, true);
        assert_eq!(hidden, EntityMask::WEB_EXCLUDE | EntityMask::API_MQTT_EXCLUDE);

        let de = entity(Some("flow temperature"), hidden.bits() | 4, true);
        assert_eq!(visibility_edit(&de, false), EntityMask::READONLY);
    }

    #[test]
    fn toggle_availability() {
        let t = MaskToggles::for_entity(&entity(Some("flow temperature"), 0, true));
        assert!(t.favorite && t.readonly && t.api_mqtt_exclude && t.web_exclude && t.deleted);

        let t = MaskToggles::for_entity(&entity(Some("flow temperature"), 1, true));
        assert!(!t.favorite);
        assert!(!t.readonly);

        let t = MaskToggles::for_entity(&entity(Some("flow temperature"), 0, false));
        assert!(!t.readonly);

        let t = MaskToggles::for_entity(&entity(None, 0, true));
        assert!(!t.favorite);
        assert!(!t.web_exclude);
        assert!(!t.allows(EntityMask::API_MQTT_EXCLUDE));

        let t = MaskToggles::for_entity(&entity(Some(""), 0, true));
        assert!(t.favorite);
        assert!(!t.api_mqtt_exclude);

        let t = MaskToggles::for_entity(&entity(Some("flow temperature"), 128, true));
        assert!(!t.favorite && !t.api_mqtt_exclude && !t.web_exclude);
        assert!(t.allows(EntityMask::DELETED));
    }
}
