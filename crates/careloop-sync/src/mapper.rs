//! # Event Mapper
//!
//! Pure translation between local records and provider events, plus
//! the content hashing that makes pushes idempotent.
//!
//! ## Mapping Directions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Event Mapper                                    │
//! │                                                                         │
//! │  OUTBOUND (push)                                                        │
//! │    Appointment ──► timed EventResource (summary/description/location,   │
//! │                    start/end in the item's zone, private metadata)      │
//! │    Bill ─────────► all-day EventResource on the due date                │
//! │                                                                         │
//! │  INBOUND (pull)                                                         │
//! │    EventResource ──► RemoteItemPatch (instants recovered, zone taken    │
//! │                      verbatim when explicit, otherwise inferred from    │
//! │                      the numeric UTC offset)                            │
//! │                                                                         │
//! │  HASHING                                                                │
//! │    stable SHA-256 over every field that affects the rendered event;    │
//! │    equal state ⇒ equal hash ⇒ push suppressed                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything here is deterministic and side-effect free; the runner
//! owns all I/O.

use chrono::{DateTime, Duration, FixedOffset, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use sha2::{Digest, Sha256};

use careloop_core::{Appointment, Bill, ItemId, ItemKind};

use crate::error::{SyncError, SyncResult};
use crate::provider::{EventDateTime, EventExtendedProperties, EventResource};
use crate::store::RemoteItemPatch;

// =============================================================================
// Private Metadata Keys
// =============================================================================

/// Private extended-property key carrying the local item id.
pub const ITEM_ID_PROP: &str = "careloopItemId";

/// Private extended-property key carrying the local item kind.
pub const ITEM_KIND_PROP: &str = "careloopItemKind";

/// Zones tried, in order, when an inbound time carries only a numeric
/// UTC offset. The configured default zone is always tried first.
const OFFSET_FALLBACK_ZONES: &[Tz] = &[
    chrono_tz::America::New_York,
    chrono_tz::America::Chicago,
    chrono_tz::America::Denver,
    chrono_tz::America::Phoenix,
    chrono_tz::America::Los_Angeles,
    chrono_tz::America::Anchorage,
    chrono_tz::Pacific::Honolulu,
    chrono_tz::UTC,
];

/// Field separator inside hash input. Unit-separator keeps adjacent
/// fields from colliding ("ab"+"c" vs "a"+"bc").
const HASH_SEP: char = '\u{1f}';

// =============================================================================
// Outbound Mapping
// =============================================================================

/// Builds the provider event body for an appointment.
///
/// Times are expressed in the appointment's own zone when it names a
/// valid one, otherwise in `default_zone`, so the event renders at the
/// wall-clock time the user entered.
pub fn build_appointment_event(appointment: &Appointment, default_zone: Tz) -> EventResource {
    let zone = appointment
        .time_zone
        .as_deref()
        .and_then(|name| name.parse::<Tz>().ok())
        .unwrap_or(default_zone);

    EventResource {
        summary: Some(appointment.title.clone()),
        description: appointment_description(appointment),
        location: appointment.location.clone(),
        start: Some(timed(appointment.starts_at, zone)),
        end: Some(timed(appointment.ends_at, zone)),
        extended_properties: Some(item_metadata(ItemKind::Appointment, appointment.id)),
        ..Default::default()
    }
}

/// Builds the provider event body for a bill: an all-day event on the
/// due date.
pub fn build_bill_event(bill: &Bill) -> EventResource {
    let mut description = format!("Amount due: {}", format_cents(bill.amount_cents));
    if let Some(notes) = bill.notes.as_deref() {
        description.push_str("\n\n");
        description.push_str(notes);
    }

    EventResource {
        summary: Some(format!("Bill due: {}", bill.payee)),
        description: Some(description),
        start: Some(all_day(bill.due_date)),
        // Provider all-day ends are exclusive.
        end: Some(all_day(bill.due_date + Duration::days(1))),
        extended_properties: Some(item_metadata(ItemKind::Bill, bill.id)),
        ..Default::default()
    }
}

fn appointment_description(appointment: &Appointment) -> Option<String> {
    match (appointment.notes.as_deref(), appointment.assigned_to.as_deref()) {
        (Some(notes), Some(who)) => Some(format!("{notes}\n\nAssigned to: {who}")),
        (Some(notes), None) => Some(notes.to_string()),
        (None, Some(who)) => Some(format!("Assigned to: {who}")),
        (None, None) => None,
    }
}

fn timed(instant: DateTime<Utc>, zone: Tz) -> EventDateTime {
    let localized = instant.with_timezone(&zone);
    EventDateTime {
        date_time: Some(localized.to_rfc3339()),
        date: None,
        time_zone: Some(zone.name().to_string()),
    }
}

fn all_day(date: chrono::NaiveDate) -> EventDateTime {
    EventDateTime {
        date_time: None,
        date: Some(date),
        time_zone: None,
    }
}

fn item_metadata(kind: ItemKind, item_id: ItemId) -> EventExtendedProperties {
    let mut props = EventExtendedProperties::default();
    props.private.insert(ITEM_ID_PROP.into(), item_id.to_string());
    props.private.insert(ITEM_KIND_PROP.into(), kind.as_str().into());
    props
}

/// Formats cents as a dollar amount without floating point.
fn format_cents(amount_cents: i64) -> String {
    let sign = if amount_cents < 0 { "-" } else { "" };
    let cents = amount_cents.unsigned_abs();
    format!("{sign}${}.{:02}", cents / 100, cents % 100)
}

// =============================================================================
// Content Hashing
// =============================================================================

/// Stable hash over every appointment field that affects the rendered
/// event. Equal states hash identically; any material change changes
/// the hash.
pub fn appointment_content_hash(appointment: &Appointment) -> String {
    hash_fields(&[
        "appointment",
        &appointment.title,
        appointment.notes.as_deref().unwrap_or(""),
        appointment.location.as_deref().unwrap_or(""),
        appointment.assigned_to.as_deref().unwrap_or(""),
        &appointment.starts_at.to_rfc3339(),
        &appointment.ends_at.to_rfc3339(),
        appointment.time_zone.as_deref().unwrap_or(""),
    ])
}

/// Stable hash over every bill field that affects the rendered event.
pub fn bill_content_hash(bill: &Bill) -> String {
    hash_fields(&[
        "bill",
        &bill.payee,
        &bill.amount_cents.to_string(),
        &bill.due_date.to_string(),
        bill.notes.as_deref().unwrap_or(""),
    ])
}

fn hash_fields(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field.as_bytes());
        hasher.update(HASH_SEP.to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}

// =============================================================================
// Inbound Mapping
// =============================================================================

/// Reads the local item reference embedded in an event's private
/// metadata, when present and well-formed.
pub fn embedded_item_ref(event: &EventResource) -> Option<(ItemKind, ItemId)> {
    let kind = event.private_prop(ITEM_KIND_PROP)?.parse::<ItemKind>().ok()?;
    let item_id = event.private_prop(ITEM_ID_PROP)?.parse::<ItemId>().ok()?;
    Some((kind, item_id))
}

/// Recovers local fields from a provider event.
///
/// Timed events must carry parseable start and end instants; all-day
/// events must carry a start date. Anything else is a per-item
/// validation failure, never a run-level error.
pub fn map_remote_event(event: &EventResource, default_zone: Tz) -> SyncResult<RemoteItemPatch> {
    let title = event
        .summary
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "(untitled)".to_string());

    let start = event
        .start
        .as_ref()
        .ok_or_else(|| SyncError::InvalidEvent("event has no start".into()))?;

    // All-day shape: a bare date, no instant.
    if let Some(date) = start.date {
        return Ok(RemoteItemPatch {
            title,
            notes: event.description.clone(),
            location: event.location.clone(),
            starts_at: None,
            ends_at: None,
            time_zone: None,
            due_date: Some(date),
        });
    }

    let starts_at = parse_instant(start, "start")?;
    let end = event
        .end
        .as_ref()
        .ok_or_else(|| SyncError::InvalidEvent("timed event has no end".into()))?;
    let ends_at = parse_instant(end, "end")?;

    let time_zone = explicit_zone(start)
        .or_else(|| explicit_zone(end))
        .unwrap_or_else(|| infer_zone(starts_at, default_zone));

    Ok(RemoteItemPatch {
        title,
        notes: event.description.clone(),
        location: event.location.clone(),
        starts_at: Some(starts_at.with_timezone(&Utc)),
        ends_at: Some(ends_at.with_timezone(&Utc)),
        time_zone: Some(time_zone),
        due_date: None,
    })
}

fn parse_instant(edt: &EventDateTime, which: &str) -> SyncResult<DateTime<FixedOffset>> {
    let raw = edt
        .date_time
        .as_deref()
        .ok_or_else(|| SyncError::InvalidEvent(format!("timed event has no {which} instant")))?;
    DateTime::parse_from_rfc3339(raw)
        .map_err(|e| SyncError::InvalidEvent(format!("unparseable {which} instant {raw:?}: {e}")))
}

/// The provider's explicit zone name, when it names a zone we know.
fn explicit_zone(edt: &EventDateTime) -> Option<String> {
    let name = edt.time_zone.as_deref()?;
    name.parse::<Tz>().ok().map(|tz| tz.name().to_string())
}

/// Infers a zone name from the instant's numeric UTC offset: the first
/// candidate zone whose offset at that instant matches wins, and the
/// configured default is always the first candidate. Falls back to the
/// default zone when nothing matches.
fn infer_zone(instant: DateTime<FixedOffset>, default_zone: Tz) -> String {
    let offset = instant.offset().fix();
    let utc = instant.with_timezone(&Utc);

    for candidate in std::iter::once(default_zone).chain(OFFSET_FALLBACK_ZONES.iter().copied()) {
        if candidate.offset_from_utc_datetime(&utc.naive_utc()).fix() == offset {
            return candidate.name().to_string();
        }
    }
    default_zone.name().to_string()
}
