//! # Provider Wire Types
//!
//! Explicit serde shapes for every calendar-provider call: event
//! resources, incremental list responses, watch-channel registration,
//! OAuth token refresh, error bodies, and inbound webhook headers.
//!
//! Having tagged shapes (instead of poking at loose JSON) means a
//! malformed payload fails fast as a typed deserialization error
//! instead of propagating missing fields into the mapper.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Event Resource
// =============================================================================

/// Start or end of a provider event.
///
/// Timed events carry `date_time` (RFC 3339, offset included) and
/// sometimes `time_zone`; all-day events carry `date` only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    /// RFC 3339 instant with UTC offset. Kept as a string so the
    /// mapper can inspect the raw offset for zone inference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,

    /// Calendar date for all-day events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,

    /// IANA zone name, when the provider supplies one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

/// Extended properties attached to an event.
///
/// The `private` map is only visible to this application; it carries
/// the local item id and kind so inbound events can be matched back to
/// a local record even without a sync link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventExtendedProperties {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub private: HashMap<String, String>,
}

/// A calendar event as sent to and received from the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResource {
    /// Provider-assigned event id. Absent on create requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Lifecycle status: "confirmed", "tentative", or "cancelled".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Opaque version tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<EventDateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<EventDateTime>,

    /// Provider-side last-modification instant. Authoritative clock
    /// for last-writer-wins conflict resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_properties: Option<EventExtendedProperties>,
}

impl EventResource {
    /// True when the provider reports the event as cancelled/deleted.
    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("cancelled")
    }

    /// Reads one private extended property, if present.
    pub fn private_prop(&self, key: &str) -> Option<&str> {
        self.extended_properties
            .as_ref()
            .and_then(|props| props.private.get(key))
            .map(String::as_str)
    }
}

/// Response of the incremental events list endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListResponse {
    #[serde(default)]
    pub items: Vec<EventResource>,

    /// Present while more pages remain.
    pub next_page_token: Option<String>,

    /// Present on the final page; cursor for the next incremental pull.
    pub next_sync_token: Option<String>,
}

// =============================================================================
// Watch Channels
// =============================================================================

/// Body of a watch (subscribe) request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRequest {
    /// Channel id minted by this system.
    pub id: String,

    /// Delivery mechanism; always "web_hook".
    #[serde(rename = "type")]
    pub channel_type: String,

    /// HTTPS address notifications are delivered to.
    pub address: String,

    /// Opaque verification token echoed back in notifications.
    pub token: String,

    /// Requested lifetime in seconds (provider may shorten it).
    pub params: WatchParams,
}

/// Channel parameters.
#[derive(Debug, Clone, Serialize)]
pub struct WatchParams {
    /// Time-to-live in seconds, as a decimal string.
    pub ttl: String,
}

/// Response of a watch registration (a provider Channel resource).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchResponse {
    pub id: String,

    /// Opaque id of the watched resource; required to stop the channel.
    pub resource_id: String,

    #[serde(default)]
    pub resource_uri: String,

    /// Expiration as milliseconds since the epoch, in a string.
    pub expiration: Option<String>,
}

impl WatchResponse {
    /// Parses the millisecond-epoch expiration, when present and sane.
    pub fn expiration_time(&self) -> Option<DateTime<Utc>> {
        let millis = self.expiration.as_deref()?.parse::<i64>().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}

/// Body of a channel stop (unsubscribe) request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopChannelRequest {
    pub id: String,
    pub resource_id: String,
}

// =============================================================================
// OAuth Token Refresh
// =============================================================================

/// Successful response of the OAuth token endpoint (refresh grant).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,

    /// Lifetime of the new token in seconds.
    pub expires_in: i64,

    #[serde(default)]
    pub scope: Option<String>,
}

// =============================================================================
// Provider Error Bodies
// =============================================================================

/// Error body of the calendar REST API:
/// `{"error": {"code": 403, "message": "...", "status": "PERMISSION_DENIED"}}`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Error body of the OAuth token endpoint:
/// `{"error": "invalid_grant", "error_description": "..."}`
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

// =============================================================================
// Webhook Notification Headers
// =============================================================================

/// Typed view of the push-notification headers the provider sends to
/// our webhook endpoint. The HTTP controller extracts these and hands
/// them to the scheduler; absence of the channel or resource id makes
/// the notification a logged no-op.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchNotificationHeaders {
    pub channel_id: Option<String>,
    pub resource_id: Option<String>,
    pub resource_state: Option<String>,
    pub message_type: Option<String>,
    pub channel_token: Option<String>,
    pub channel_expiration: Option<String>,
}

impl WatchNotificationHeaders {
    /// Builds the typed view from raw (name, value) header pairs,
    /// matching names case-insensitively.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut headers = WatchNotificationHeaders::default();
        for (name, value) in pairs {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match name.to_ascii_lowercase().as_str() {
                "x-goog-channel-id" => headers.channel_id = Some(value.to_string()),
                "x-goog-resource-id" => headers.resource_id = Some(value.to_string()),
                "x-goog-resource-state" => headers.resource_state = Some(value.to_string()),
                "x-goog-message-type" => headers.message_type = Some(value.to_string()),
                "x-goog-channel-token" => headers.channel_token = Some(value.to_string()),
                "x-goog-channel-expiration" => {
                    headers.channel_expiration = Some(value.to_string())
                }
                _ => {}
            }
        }
        headers
    }

    /// The message type, falling back to the resource state for
    /// providers that only set the latter.
    pub fn effective_message_type(&self) -> Option<&str> {
        self.message_type
            .as_deref()
            .or(self.resource_state.as_deref())
    }

    /// True for a channel STOP notification.
    pub fn is_stop(&self) -> bool {
        self.effective_message_type()
            .is_some_and(|t| t.eq_ignore_ascii_case("stop"))
    }
}
