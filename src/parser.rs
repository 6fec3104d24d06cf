//! Internal module for parsing message headers.

use crate::mailbox::HeaderFields;
use chrono::{DateTime, Utc};
use mailparse::{parse_headers, MailHeaderMap};
use tracing::warn;

/// Extracts the `Date` and `Subject` fields from a raw header block.
///
/// A block that cannot be parsed yields empty fields, which later drops the
/// message from the candidate set instead of failing the run.
pub(crate) fn parse_header_block(uid: u32, raw: &[u8]) -> HeaderFields {
    match parse_headers(raw) {
        Ok((headers, _)) => HeaderFields {
            date: headers.get_first_value("Date"),
            subject: headers.get_first_value("Subject").unwrap_or_default(),
        },
        Err(e) => {
            warn!(uid, error = %e, "Failed to parse message headers, skipping message");
            HeaderFields::default()
        }
    }
}

/// Parses a `Date` header value into a UTC timestamp.
///
/// RFC 2822 is tried first, then RFC 3339. `mailparse`'s lenient parser is the
/// last resort for the forms mail servers emit outside both; it maps text it
/// cannot read to the epoch and rolls over out-of-range fields, so its result
/// is kept only when positive and when the time of day is in range.
pub(crate) fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(date) = DateTime::parse_from_rfc2822(raw) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }

    if !time_of_day_in_range(raw) {
        return None;
    }
    match mailparse::dateparse(raw) {
        Ok(timestamp) if timestamp > 0 => DateTime::from_timestamp(timestamp, 0),
        _ => None,
    }
}

/// Checks the `hh:mm[:ss]` token, if any, against 23:59:60.
fn time_of_day_in_range(raw: &str) -> bool {
    let Some(token) = raw.split_whitespace().find(|part| part.contains(':')) else {
        return true;
    };

    let limits = [23u32, 59, 60];
    let mut fields = 0;
    for (field, limit) in token.split(':').zip(limits) {
        match field.parse::<u32>() {
            Ok(value) if value <= limit => fields += 1,
            _ => return false,
        }
    }
    fields >= 2 && token.split(':').count() <= limits.len()
}
