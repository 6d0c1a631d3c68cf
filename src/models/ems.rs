//! Wire types exchanged with the EMS-ESP gateway REST endpoints.
//!
//! Scope: types only, no transport code.
//!
//! Notes
//! - Device entities use the gateway's compact single/double letter keys (`m`, `cn`, `mi`, ...);
//!   the Rust field names are spelled out and mapped with `#[serde(rename)]`.
//! - Collections are wrapped in an object on the wire (`{"schedule": [...]}`), mirrored by the
//!   `Schedule`, `Entities` and `Modules` envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::ops::{BitAnd, BitOr};

// =====================
// Scalar ID newtype wrappers
// =====================

/// Unique index the gateway assigns to each discovered EMS device.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

/// Device indexes at or above this value are virtual (custom entities, scheduler, ...)
/// and have no customizable entity list.
pub const FIRST_VIRTUAL_DEVICE_ID: u32 = 90;

// =====================
// Entity mask
// =====================

/// Bit field of independent configuration attributes of a device entity.
///
/// Bits 16, 32 and 64 are reserved by the firmware and carried through untouched.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityMask(pub u8);

impl EntityMask {
    pub const DEFAULT: EntityMask = EntityMask(0);
    pub const WEB_EXCLUDE: EntityMask = EntityMask(1);
    pub const API_MQTT_EXCLUDE: EntityMask = EntityMask(2);
    pub const READONLY: EntityMask = EntityMask(4);
    pub const FAVORITE: EntityMask = EntityMask(8);
    pub const DELETED: EntityMask = EntityMask(128);

    /// Every bit a user may toggle.
    pub const USER_BITS: EntityMask = EntityMask(1 | 2 | 4 | 8 | 128);

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True when every bit of `other` is set.
    pub const fn contains(self, other: EntityMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: EntityMask) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn with(self, other: EntityMask) -> EntityMask {
        EntityMask(self.0 | other.0)
    }

    pub const fn without(self, other: EntityMask) -> EntityMask {
        EntityMask(self.0 & !other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for EntityMask {
    type Output = EntityMask;

    fn bitor(self, rhs: EntityMask) -> EntityMask {
        self.with(rhs)
    }
}

impl BitAnd for EntityMask {
    type Output = EntityMask;

    fn bitand(self, rhs: EntityMask) -> EntityMask {
        EntityMask(self.0 & rhs.0)
    }
}

impl fmt::LowerHex for EntityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

// =====================
// Devices
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    /// Translated device type name, e.g. "Boiler".
    #[serde(rename = "tn")]
    pub type_name: String,
    #[serde(rename = "t")]
    pub device_type: u8,
    #[serde(rename = "b", default)]
    pub brand: String,
    #[serde(rename = "n")]
    pub name: String,
    /// EMS bus address.
    #[serde(rename = "d")]
    pub bus_id: u8,
    #[serde(rename = "p")]
    pub product_id: u8,
    #[serde(rename = "v", default)]
    pub version: String,
    #[serde(rename = "e", default)]
    pub entity_count: u32,
    /// Lowercase type name used in API URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Device {
    pub fn is_customizable(&self) -> bool {
        self.id.0 < FIRST_VIRTUAL_DEVICE_ID
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CoreData {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub devices: Vec<Device>,
}

// =====================
// Device entity customization
// =====================

/// One monitored or controlled value of a device, as listed on the customization screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntity {
    /// Stable short name, unchanged across edits.
    pub id: String,
    /// Current value in whatever shape the device reports.
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Default full name. Missing for unnamed entities, `!`-prefixed for commands.
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "cn", default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    /// Circuit tag, e.g. "hc1".
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(rename = "m", default)]
    pub mask: EntityMask,
    #[serde(rename = "w", default)]
    pub writeable: bool,
    #[serde(rename = "mi", default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(rename = "ma", default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl DeviceEntity {
    /// Command entities carry a `!` prefix on their default name.
    pub fn is_command(&self) -> bool {
        self.name.as_deref().is_some_and(|n| n.starts_with('!'))
    }

    pub fn is_unnamed(&self) -> bool {
        self.name.as_deref().is_none_or(str::is_empty)
    }

    /// Whether the entity can be opened in the edit dialog at all.
    pub fn is_editable(&self) -> bool {
        self.name.is_some() && !self.is_command()
    }

    /// Writeable numeric values that are not masked read-only accept min/max overrides.
    pub fn accepts_bounds(&self) -> bool {
        self.writeable
            && !self.mask.contains(EntityMask::READONLY)
            && matches!(self.value, Some(Value::Number(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomizationRequest {
    pub id: DeviceId,
    pub entity_ids: Vec<String>,
}

// =====================
// Scheduler
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleItem {
    pub id: u32,
    #[serde(default)]
    pub active: bool,
    /// Day-of-week bits (0..=127) or a schedule type tag (>= 128).
    pub flags: u8,
    /// Time of day, timer duration, or condition expression depending on `flags`.
    #[serde(default)]
    pub time: String,
    pub cmd: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Schedule {
    pub schedule: Vec<ScheduleItem>,
}

// =====================
// Custom entities
// =====================

/// Field the gateway accepts either as a JSON number or as a (hex) string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberOrText {
    Number(f64),
    Text(String),
}

impl NumberOrText {
    /// Numeric value. Text is read as hexadecimal, the way the telegram id fields are
    /// entered; numbers are taken as they are.
    pub fn as_hex(&self) -> Option<u32> {
        match self {
            NumberOrText::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n <= u32::MAX as f64 => Some(*n as u32),
            NumberOrText::Number(_) => None,
            NumberOrText::Text(s) => {
                let s = s.trim();
                let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
                u32::from_str_radix(s, 16).ok()
            }
        }
    }

    /// Hex text converted to the number the gateway expects; anything else unchanged.
    pub fn to_numeric(&self) -> NumberOrText {
        match (self, self.as_hex()) {
            (NumberOrText::Text(_), Some(n)) => NumberOrText::Number(f64::from(n)),
            _ => self.clone(),
        }
    }
}

impl Default for NumberOrText {
    fn default() -> Self {
        NumberOrText::Number(0.0)
    }
}

impl fmt::Display for NumberOrText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumberOrText::Number(n) => write!(f, "{}", n),
            NumberOrText::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityItem {
    pub id: u32,
    /// 0 = read from an EMS telegram, 1 = RAM-only variable.
    #[serde(default)]
    pub ram: u8,
    pub name: String,
    #[serde(default)]
    pub device_id: NumberOrText,
    #[serde(default)]
    pub type_id: NumberOrText,
    #[serde(default)]
    pub offset: i32,
    #[serde(default)]
    pub factor: NumberOrText,
    #[serde(default)]
    pub uom: u8,
    #[serde(default)]
    pub value_type: u8,
    #[serde(default)]
    pub writeable: bool,
    #[serde(default)]
    pub hide: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Entities {
    pub entities: Vec<EntityItem>,
}

// =====================
// Modules
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleItem {
    pub id: u32,
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub version: String,
    /// 1 = pending activation, 2 = activated.
    #[serde(default)]
    pub status: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub license: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Modules {
    pub modules: Vec<ModuleItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleUpdate {
    pub key: String,
    pub enabled: bool,
    pub license: String,
}
