//! The schedule `flags` byte: day-of-week bits or a schedule type tag.
//!
//! On the wire, 0..=127 is a Sunday-first day bitset and 128/129/130/132 name a schedule
//! type. Inside the console the byte only exists at the transport boundary; everything else
//! works on [`ScheduleKind`].

use chrono::Weekday;
use log::warn;
use std::fmt;

pub const SCHEDULE_TIMER: u8 = 128;
pub const SCHEDULE_ONCHANGE: u8 = 129;
pub const SCHEDULE_CONDITION: u8 = 130;
pub const SCHEDULE_IMMEDIATE: u8 = 132;

const DAY_BITS: u8 = 0x7f;
const TYPE_THRESHOLD: u8 = 0x80;

/// Days of the week a day schedule fires on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct DayMask(u8);

impl DayMask {
    pub const EMPTY: DayMask = DayMask(0);
    pub const EVERY_DAY: DayMask = DayMask(DAY_BITS);

    /// Bits above Saturday are dropped.
    pub const fn from_bits(bits: u8) -> Self {
        DayMask(bits & DAY_BITS)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & day_bit(day) != 0
    }

    pub fn with(self, day: Weekday) -> Self {
        DayMask(self.0 | day_bit(day))
    }

    pub fn without(self, day: Weekday) -> Self {
        DayMask(self.0 & !day_bit(day))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Selected days, Monday first.
    pub fn days(self) -> impl Iterator<Item = Weekday> {
        WEEK.into_iter().filter(move |d| self.contains(*d))
    }
}

impl FromIterator<Weekday> for DayMask {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        iter.into_iter().fold(DayMask::EMPTY, DayMask::with)
    }
}

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Bit for `day` in the Sunday-first layout (Sunday = 1, Monday = 2, ... Saturday = 64).
pub fn day_bit(day: Weekday) -> u8 {
    1 << day.num_days_from_sunday()
}

/// Schedule type without its payload, as chosen in the editor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ScheduleType {
    Day,
    Timer,
    OnChange,
    Condition,
    Immediate,
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScheduleType::Day => "Day",
            ScheduleType::Timer => "Timer",
            ScheduleType::OnChange => "On Change",
            ScheduleType::Condition => "Condition",
            ScheduleType::Immediate => "Immediate",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ScheduleKind {
    Day(DayMask),
    Timer,
    OnChange,
    Condition,
    Immediate,
}

impl Default for ScheduleKind {
    fn default() -> Self {
        ScheduleKind::Day(DayMask::EMPTY)
    }
}

impl ScheduleKind {
    /// A kind of type `t` with no days selected.
    pub fn fresh(t: ScheduleType) -> Self {
        match t {
            ScheduleType::Day => ScheduleKind::Day(DayMask::EMPTY),
            ScheduleType::Timer => ScheduleKind::Timer,
            ScheduleType::OnChange => ScheduleKind::OnChange,
            ScheduleType::Condition => ScheduleKind::Condition,
            ScheduleType::Immediate => ScheduleKind::Immediate,
        }
    }

    pub fn schedule_type(self) -> ScheduleType {
        match self {
            ScheduleKind::Day(_) => ScheduleType::Day,
            ScheduleKind::Timer => ScheduleType::Timer,
            ScheduleKind::OnChange => ScheduleType::OnChange,
            ScheduleKind::Condition => ScheduleType::Condition,
            ScheduleKind::Immediate => ScheduleType::Immediate,
        }
    }

    pub fn day_mask(self) -> Option<DayMask> {
        match self {
            ScheduleKind::Day(days) => Some(days),
            _ => None,
        }
    }

    /// Day and timer schedules carry a `HH:MM` time; the others an expression or nothing.
    pub fn needs_time(self) -> bool {
        matches!(self, ScheduleKind::Day(_) | ScheduleKind::Timer)
    }

    /// Editor type switch. Old day bits never leak into the new kind.
    pub fn switch_to(self, t: ScheduleType) -> Self {
        if self.schedule_type() == t {
            self
        } else {
            ScheduleKind::fresh(t)
        }
    }
}

pub fn decode_type(flags: u8) -> ScheduleKind {
    match flags {
        f if f < TYPE_THRESHOLD => ScheduleKind::Day(DayMask::from_bits(f)),
        SCHEDULE_TIMER => ScheduleKind::Timer,
        SCHEDULE_ONCHANGE => ScheduleKind::OnChange,
        SCHEDULE_CONDITION => ScheduleKind::Condition,
        SCHEDULE_IMMEDIATE => ScheduleKind::Immediate,
        other => {
            warn!(
                "Unknown schedule flags {} (0x{:02x}); treating as day schedule {:#09b}",
                other,
                other,
                other & DAY_BITS
            );
            ScheduleKind::Day(DayMask::from_bits(other))
        }
    }
}

pub fn encode_type(kind: ScheduleKind) -> u8 {
    match kind {
        ScheduleKind::Day(days) => days.bits() & DAY_BITS,
        ScheduleKind::Timer => SCHEDULE_TIMER,
        ScheduleKind::OnChange => SCHEDULE_ONCHANGE,
        ScheduleKind::Condition => SCHEDULE_CONDITION,
        ScheduleKind::Immediate => SCHEDULE_IMMEDIATE,
    }
}

/// Whether the raw `flags` byte is a day schedule that includes `day_bit`.
pub fn has_day(flags: u8, day_bit: u8) -> bool {
    match decode_type(flags) {
        ScheduleKind::Day(days) => day_bit != 0 && days.bits() & day_bit == day_bit,
        _ => false,
    }
}
