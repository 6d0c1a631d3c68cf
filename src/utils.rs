use crate::engine::schedule_flags::{DayMask, ScheduleKind};
use crate::models::ems::{DeviceEntity, EntityMask};

/// Name shown for an entity in listings and matched by searches.
///
/// Commands render as `Command: <tag> <name>`, a custom name replaces the default one, and
/// the circuit tag prefixes either.
pub fn entity_display_name(de: &DeviceEntity, with_short_id: bool) -> String {
    let tagged = |name: &str| match de.tag.as_deref().filter(|t| !t.is_empty()) {
        Some(tag) => format!("{} {}", tag, name),
        None => name.to_string(),
    };

    let mut out = match (de.name.as_deref(), de.custom_name.as_deref()) {
        (Some(n), _) if n.starts_with('!') => format!("Command: {}", tagged(&n[1..])),
        (_, Some(cn)) if !cn.is_empty() => tagged(cn),
        (Some(n), _) => tagged(n),
        (None, _) => tagged(""),
    };
    if with_short_id {
        out.push(' ');
        out.push_str(&de.id);
    }
    out
}

const MASK_FLAG_NAMES: [(EntityMask, &str); 5] = [
    (EntityMask::FAVORITE, "favorite"),
    (EntityMask::READONLY, "readonly"),
    (EntityMask::API_MQTT_EXCLUDE, "api_mqtt_exclude"),
    (EntityMask::WEB_EXCLUDE, "web_exclude"),
    (EntityMask::DELETED, "deleted"),
];

/// Comma-separated names of the user bits set in `mask`, or `-`.
pub fn mask_flags(mask: EntityMask) -> String {
    let names: Vec<&str> = MASK_FLAG_NAMES
        .iter()
        .filter(|(bit, _)| mask.contains(*bit))
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() { "-".to_string() } else { names.join(",") }
}

/// Inverse of [`mask_flags`]. Accepts a few short aliases; `none` or `-` is the empty mask.
pub fn parse_mask_flags(s: &str) -> Result<EntityMask, String> {
    let mut mask = EntityMask::DEFAULT;
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let bit = match part.to_ascii_lowercase().as_str() {
            "none" | "-" => EntityMask::DEFAULT,
            "favorite" | "fav" => EntityMask::FAVORITE,
            "readonly" | "ro" => EntityMask::READONLY,
            "api_mqtt_exclude" | "api" => EntityMask::API_MQTT_EXCLUDE,
            "web_exclude" | "web" | "hidden" => EntityMask::WEB_EXCLUDE,
            "deleted" | "delete" => EntityMask::DELETED,
            other => return Err(format!("unknown mask flag: {}", other)),
        };
        mask = mask | bit;
    }
    Ok(mask)
}

pub fn format_days(days: DayMask) -> String {
    if days == DayMask::EVERY_DAY {
        return "every day".to_string();
    }
    let names: Vec<String> = days.days().map(|d| d.to_string()).collect();
    if names.is_empty() { "-".to_string() } else { names.join(" ") }
}

/// One-line description of when a schedule entry fires.
pub fn schedule_when(kind: ScheduleKind, time: &str) -> String {
    match kind {
        ScheduleKind::Day(days) => format!("{} at {}", format_days(days), time),
        ScheduleKind::Timer => format!("every {} after start", time),
        ScheduleKind::OnChange => format!("on change of {}", time),
        ScheduleKind::Condition => format!("when {}", time),
        ScheduleKind::Immediate => "immediately".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_entities() -> Vec<DeviceEntity> {
        let json = std::fs::read_to_string("tests/data/device-entities.json").expect("fixture present");
        serde_json::from_str(&json).expect("parse device entities")
    }

    #[test]
    fn display_names_follow_command_custom_and_tag_rules() {
        let entities = load_entities();
        let by_id = |id: &str| entities.iter().find(|e| e.id == id).expect("entity in fixture");

        assert_eq!(entity_display_name(by_id("reset"), false), "Command: reset");
        assert_eq!(entity_display_name(by_id("errorcode"), false), "my custom error code");
        assert_eq!(entity_display_name(by_id("hc1/seltemp"), true), "hc1 Chosen Room Temperature hc1/seltemp");
    }

    #[test]
    fn mask_flags_round_trip_through_names() {
        let m = EntityMask::FAVORITE | EntityMask::READONLY;
        assert_eq!(mask_flags(m), "favorite,readonly");
        assert_eq!(parse_mask_flags(&mask_flags(m)), Ok(m));
        assert_eq!(mask_flags(EntityMask::DEFAULT), "-");
        assert_eq!(parse_mask_flags("none"), Ok(EntityMask::DEFAULT));
        assert_eq!(parse_mask_flags("web, api"), Ok(EntityMask(3)));
        assert!(parse_mask_flags("bogus").is_err());
    }

    #[test]
    fn schedule_descriptions() {
        assert_eq!(schedule_when(ScheduleKind::Day(DayMask::from_bits(6)), "06:30"), "Mon Tue at 06:30");
        assert_eq!(schedule_when(ScheduleKind::Day(DayMask::EVERY_DAY), "07:00"), "every day at 07:00");
        assert_eq!(schedule_when(ScheduleKind::Immediate, ""), "immediately");
    }
}
