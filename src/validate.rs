//! Field validation run locally before anything is sent to the gateway.

use crate::engine::schedule_flags::ScheduleKind;
use crate::models::ems::{DeviceEntity, NumberOrText};
use chrono::NaiveTime;
use std::fmt;

pub const NAME_MAX_LEN: usize = 19;
pub const COMMAND_MAX_LEN: usize = 300;
pub const OFFSET_MAX: i32 = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Collect the failures of several checks; `Ok` only when every check passed.
pub fn collect<I>(checks: I) -> Result<(), Vec<ValidationError>>
where
    I: IntoIterator<Item = Result<(), ValidationError>>,
{
    let errors: Vec<ValidationError> = checks.into_iter().filter_map(Result::err).collect();
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// A minimum above the maximum is refused for any entity that carries both.
pub fn entity_bounds(entity: &DeviceEntity) -> Result<(), ValidationError> {
    match (entity.min, entity.max) {
        (Some(min), Some(max)) if min > max => Err(ValidationError::new(
            format!("{} min", entity.id),
            format!("minimum {} is above maximum {}", min, max),
        )),
        _ => Ok(()),
    }
}

/// Characters that separate the name from the bounds in a stored customization.
const CUSTOM_NAME_RESERVED: [char; 3] = ['>', '<', '|'];

pub fn entity_custom_name(entity: &DeviceEntity) -> Result<(), ValidationError> {
    match entity.custom_name.as_deref() {
        Some(name) if name.contains(CUSTOM_NAME_RESERVED) => Err(ValidationError::new(
            format!("{} name", entity.id),
            "must not contain '>', '<' or '|'",
        )),
        _ => Ok(()),
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn name_pattern(field: &str, name: &str, required: bool) -> Result<(), ValidationError> {
    let len = name.chars().count();
    if required && len == 0 {
        return Err(ValidationError::new(field, "name is required"));
    }
    if len > NAME_MAX_LEN || !name.chars().all(is_name_char) {
        return Err(ValidationError::new(
            field,
            format!("must be <{} characters: alphanumeric or '_'", NAME_MAX_LEN + 1),
        ));
    }
    Ok(())
}

/// Case-insensitive uniqueness. Keeping the name the record was loaded with is always allowed.
pub fn unique_name<'a, I>(field: &str, name: &str, original: Option<&str>, others: I) -> Result<(), ValidationError>
where
    I: IntoIterator<Item = &'a str>,
{
    if name.is_empty() {
        return Ok(());
    }
    if original.is_some_and(|o| o.eq_ignore_ascii_case(name)) {
        return Ok(());
    }
    if others.into_iter().any(|n| n.eq_ignore_ascii_case(name)) {
        return Err(ValidationError::new(field, "name already in use"));
    }
    Ok(())
}

/// Schedule names are optional.
pub fn schedule_name(name: &str) -> Result<(), ValidationError> {
    name_pattern("name", name, false)
}

pub fn custom_entity_name(name: &str) -> Result<(), ValidationError> {
    name_pattern("name", name, true)
}

pub fn schedule_command(cmd: &str) -> Result<(), ValidationError> {
    let len = cmd.chars().count();
    if len == 0 {
        return Err(ValidationError::new("cmd", "command is required"));
    }
    if len > COMMAND_MAX_LEN {
        return Err(ValidationError::new(
            "cmd",
            format!("command must be 1-{} characters", COMMAND_MAX_LEN),
        ));
    }
    Ok(())
}

/// Day schedules need a time of day and timers an `HH:MM` duration; the other kinds carry a
/// free-form expression or nothing.
pub fn schedule_time(kind: ScheduleKind, time: &str) -> Result<(), ValidationError> {
    if !kind.needs_time() {
        return Ok(());
    }
    NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .map(|_| ())
        .map_err(|_| ValidationError::new("time", format!("'{}' is not a valid HH:MM time", time)))
}

pub fn hex_field(field: &str, value: &NumberOrText) -> Result<(), ValidationError> {
    match value.as_hex() {
        Some(_) => Ok(()),
        None => Err(ValidationError::new(field, "is required and must be in hex format")),
    }
}

pub fn offset(value: i32) -> Result<(), ValidationError> {
    if (0..=OFFSET_MAX).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new("offset", format!("must be between 0 and {}", OFFSET_MAX)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::schedule_flags::DayMask;
    use crate::models::ems::EntityMask;

    fn bounded(min: Option<f64>, max: Option<f64>) -> DeviceEntity {
        DeviceEntity {
            id: "hc1/seltemp".into(),
            value: Some(serde_json::json!(20)),
            name: Some("selected room temperature".into()),
            custom_name: None,
            tag: Some("hc1".into()),
            mask: EntityMask::DEFAULT,
            writeable: true,
            min,
            max,
        }
    }

    #[test]
    fn min_above_max_is_refused() {
        assert!(entity_bounds(&bounded(Some(5.0), Some(52.0))).is_ok());
        assert!(entity_bounds(&bounded(Some(5.0), Some(5.0))).is_ok());
        assert!(entity_bounds(&bounded(None, Some(1.0))).is_ok());
        let err = entity_bounds(&bounded(Some(60.0), Some(52.0))).unwrap_err();
        assert_eq!(err.field, "hc1/seltemp min");
    }

    #[test]
    fn custom_names_reject_separator_characters() {
        let mut de = bounded(None, None);
        de.custom_name = Some("living room".into());
        assert!(entity_custom_name(&de).is_ok());
        for bad in ["a<b", "a>b", "a|b"] {
            de.custom_name = Some(bad.into());
            let err = entity_custom_name(&de).unwrap_err();
            assert_eq!(err.field, "hc1/seltemp name");
        }
    }

    #[test]
    fn schedule_names() {
        assert!(schedule_name("").is_ok());
        assert!(schedule_name("morning_1").is_ok());
        assert!(schedule_name(&"a".repeat(19)).is_ok());
        assert!(schedule_name(&"a".repeat(20)).is_err());
        assert!(schedule_name("with space").is_err());
        assert!(custom_entity_name("").is_err());
    }

    #[test]
    fn uniqueness_ignores_case_and_own_name() {
        let others = ["Morning", "evening"];
        assert!(unique_name("name", "morning", None, others).is_err());
        assert!(unique_name("name", "MORNING", Some("morning"), others).is_ok());
        assert!(unique_name("name", "night", None, others).is_ok());
        assert!(unique_name("name", "", None, ["", ""]).is_ok());
    }

    #[test]
    fn command_length() {
        assert!(schedule_command("").is_err());
        assert!(schedule_command("boiler/wwonetime").is_ok());
        assert!(schedule_command(&"c".repeat(300)).is_ok());
        assert!(schedule_command(&"c".repeat(301)).is_err());
    }

    #[test]
    fn time_only_checked_for_day_and_timer() {
        let day = ScheduleKind::Day(DayMask::from_bits(2));
        assert!(schedule_time(day, "06:30").is_ok());
        assert!(schedule_time(day, "25:00").is_err());
        assert!(schedule_time(ScheduleKind::Timer, "01:00").is_ok());
        assert!(schedule_time(ScheduleKind::Timer, "").is_err());
        assert!(schedule_time(ScheduleKind::Condition, "boiler/outdoortemp < 0").is_ok());
        assert!(schedule_time(ScheduleKind::Immediate, "").is_ok());
    }

    #[test]
    fn hex_and_offset_fields() {
        assert!(hex_field("device_id", &NumberOrText::Text("08".into())).is_ok());
        assert!(hex_field("type_id", &NumberOrText::Text("".into())).is_err());
        assert!(offset(0).is_ok());
        assert!(offset(255).is_ok());
        assert!(offset(256).is_err());
        assert!(offset(-1).is_err());
    }

    #[test]
    fn collect_keeps_every_failure() {
        let result = collect([schedule_command(""), schedule_name("ok"), offset(300)]);
        let errors = result.unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].to_string(), "cmd: command is required");
    }
}
