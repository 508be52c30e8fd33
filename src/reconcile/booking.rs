//! Booking rules over captured call data.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::campaign::model::{CaptureField, CapturedValue};

/// Captured keys whose non-negative value means a viewing or test drive was booked.
const BOOKING_KEYS: &[&str] = &[
    "meeting_booked",
    "appointment_date",
    "meeting_date",
    "viewing_booked",
    "test_drive_booked",
];

/// Key set by the transcript fallback when the agent's capture missed a booking.
pub const INFERRED_BOOKING_KEY: &str = "meeting_booked";

/// Keys checked first for the reason a booking did not happen.
const WHY_NOT_KEYS: &[&str] = &[
    "reason_not_scheduled",
    "reason_for_not_scheduling",
    "reason_for_not_scheduling_test_drive",
    "why_not_booked",
    "test_drive_reason",
    "why_testdrive_not_booked",
];

static REASON_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)reason|why|not.booked|not.scheduled").unwrap());
static REASON_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)reason|why|not.booked|not.scheduled|test.drive").unwrap());

/// Captured value as display text, `None` when empty.
pub fn value_text(value: &CapturedValue) -> Option<String> {
    match value {
        CapturedValue::Null => None,
        CapturedValue::Text(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        CapturedValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
            Some(format!("{}", *n as i64))
        }
        CapturedValue::Number(n) => Some(n.to_string()),
    }
}

fn is_affirmative(value: &CapturedValue) -> bool {
    match value {
        CapturedValue::Number(n) => *n != 0.0,
        other => value_text(other).is_some_and(|t| {
            let t = t.to_ascii_lowercase();
            t != "false" && t != "no"
        }),
    }
}

/// Whether the captured data records a booked viewing or test drive.
pub fn is_call_booking(data: &BTreeMap<String, CapturedValue>) -> bool {
    BOOKING_KEYS
        .iter()
        .filter_map(|key| data.get(*key))
        .any(is_affirmative)
}

/// The customer's reason for not booking, if one was captured.
///
/// Well-known keys win, then declared fields whose key or label reads like a
/// reason, then any captured key that does.
pub fn why_not_booked(
    data: &BTreeMap<String, CapturedValue>,
    fields: &[CaptureField],
) -> Option<String> {
    let text_of = |key: &str| data.get(key).and_then(value_text);

    WHY_NOT_KEYS
        .iter()
        .find_map(|key| text_of(key))
        .or_else(|| {
            fields
                .iter()
                .filter(|f| REASON_LABEL.is_match(&f.label) || REASON_KEY.is_match(&f.key))
                .find_map(|f| text_of(&f.key))
        })
        .or_else(|| {
            data.iter()
                .filter(|(key, _)| REASON_KEY.is_match(key))
                .find_map(|(_, value)| value_text(value))
        })
}
