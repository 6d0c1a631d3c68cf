//! Compact token encoding of changed device entity customizations.
//!
//! One token per changed entity: two lowercase hex digits of mask, the entity id, and an
//! optional `|name>min<max` suffix. The JSON array of tokens must fit the gateway's
//! receive buffer; a batch that does not fit is refused as a whole.

use crate::engine::tracker::{FieldChanges, Record, RecordId, Tracked};
use crate::models::ems::{DeviceEntity, EntityMask};
use std::fmt;
use std::fmt::Write as _;

/// The gateway reads the request into a 2048 byte buffer; the rest is framing.
pub const CUSTOMIZATION_BUDGET_BYTES: usize = 2000;

impl Record for DeviceEntity {
    type Key = String;

    fn id(&self) -> RecordId<String> {
        RecordId::Saved(self.id.clone())
    }

    fn is_deleted(&self) -> bool {
        self.mask.contains(EntityMask::DELETED)
    }

    fn changes_from(&self, baseline: &Self) -> FieldChanges {
        // value, name, tag and writeable belong to the device, not the user
        let DeviceEntity {
            id: _,
            value: _,
            name: _,
            custom_name,
            tag: _,
            mask,
            writeable: _,
            min,
            max,
        } = self;
        FieldChanges::new()
            .field("mask", mask, &baseline.mask)
            .text("custom_name", custom_name.as_deref(), baseline.custom_name.as_deref())
            .field("min", min, &baseline.min)
            .field("max", max, &baseline.max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    PayloadTooLarge { size: usize, limit: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::PayloadTooLarge { size, limit } => write!(
                f,
                "customization payload is {} bytes, the gateway accepts at most {}; save fewer changes at a time",
                size, limit
            ),
        }
    }
}

impl std::error::Error for CodecError {}

pub fn encode_changed_entity(entity: &DeviceEntity) -> String {
    let mut token = format!("{:02x}{}", entity.mask, entity.id);
    let custom_name = entity.custom_name.as_deref().filter(|s| !s.is_empty());
    if custom_name.is_none() && entity.min.is_none() && entity.max.is_none() {
        return token;
    }

    token.push('|');
    if let Some(name) = custom_name {
        token.push_str(name);
    }
    // writing into a String cannot fail
    if let Some(min) = entity.min {
        let _ = write!(token, ">{}", min);
    }
    if let Some(max) = entity.max {
        let _ = write!(token, "<{}", max);
    }
    token
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBatch {
    pub tokens: Vec<String>,
    /// UTF-8 length of `tokens` serialized as a JSON array.
    pub byte_size: usize,
}

impl EncodedBatch {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn can_send(&self) -> bool {
        can_send(self.byte_size)
    }

    /// Hand the tokens over for transmission, or refuse the whole batch.
    pub fn into_payload(self) -> Result<Vec<String>, CodecError> {
        if self.can_send() {
            Ok(self.tokens)
        } else {
            Err(CodecError::PayloadTooLarge {
                size: self.byte_size,
                limit: CUSTOMIZATION_BUDGET_BYTES,
            })
        }
    }
}

/// Encode every dirty entity, in collection order.
pub fn encode_batch<'a, I>(entities: I) -> EncodedBatch
where
    I: IntoIterator<Item = &'a Tracked<DeviceEntity>>,
{
    let tokens: Vec<String> = entities
        .into_iter()
        .filter(|e| e.is_dirty())
        .map(|e| encode_changed_entity(&e.current))
        .collect();
    // a Vec<String> always serializes; an impossible failure still must not pass the budget
    let byte_size = serde_json::to_vec(&tokens).map(|v| v.len()).unwrap_or(usize::MAX);
    EncodedBatch { tokens, byte_size }
}

pub fn can_send(byte_size: usize) -> bool {
    byte_size <= CUSTOMIZATION_BUDGET_BYTES
}
