//! # Provider HTTP Gateway
//!
//! Authenticated JSON access to the calendar provider's REST API and
//! OAuth token endpoint.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Gateway Request Flow                               │
//! │                                                                         │
//! │  caller ──► CalendarApi trait method                                    │
//! │                  │                                                      │
//! │                  ▼                                                      │
//! │  build reqwest request (bearer token, JSON body, timeout)               │
//! │                  │                                                      │
//! │                  ▼                                                      │
//! │  log at debug with SCRUBBED url (access_token/token/syncToken           │
//! │  query values replaced before they can reach the logs)                  │
//! │                  │                                                      │
//! │         ┌────────┴────────┐                                             │
//! │         ▼                 ▼                                             │
//! │      2xx: parse       non-2xx: parse error body, surface               │
//! │      typed shape      SyncError::Provider{status, code, context}        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything above this module speaks [`CalendarApi`]; tests swap in a
//! fake implementation and never touch the network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::provider::{
    ApiErrorBody, EventListResponse, EventResource, OAuthErrorBody, StopChannelRequest,
    TokenResponse, WatchRequest, WatchResponse,
};

// =============================================================================
// Constants
// =============================================================================

/// Query parameters whose values never appear in logs.
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "access_token",
    "token",
    "syncToken",
    "sync_token",
    "refresh_token",
    "key",
];

/// Page size for event listing.
const LIST_PAGE_SIZE: u32 = 250;

/// Hard ceiling on pages followed in one list call. A provider bug
/// that loops page tokens must not wedge a sync run forever.
const MAX_LIST_PAGES: u32 = 40;

// =============================================================================
// Calendar API Trait
// =============================================================================

/// The outward seam to the calendar provider. One method per REST
/// call, all payloads typed.
#[async_trait]
pub trait CalendarApi: Send + Sync {
    /// Incremental (or, without a sync token, full) event list.
    /// Follows pagination; the returned response is the merged final
    /// page with every item.
    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        sync_token: Option<&str>,
    ) -> SyncResult<EventListResponse>;

    /// Creates an event; returns the stored resource (id, etag,
    /// updated populated by the provider).
    async fn insert_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &EventResource,
    ) -> SyncResult<EventResource>;

    /// Patches an existing event.
    async fn patch_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        event: &EventResource,
    ) -> SyncResult<EventResource>;

    /// Registers a webhook subscription on a calendar.
    async fn watch_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        request: &WatchRequest,
    ) -> SyncResult<WatchResponse>;

    /// Stops a webhook subscription.
    async fn stop_channel(
        &self,
        access_token: &str,
        request: &StopChannelRequest,
    ) -> SyncResult<()>;

    /// Exchanges a refresh token for a new access token.
    async fn refresh_access_token(&self, refresh_token: &str) -> SyncResult<TokenResponse>;
}

// =============================================================================
// Google Calendar Gateway
// =============================================================================

/// Production [`CalendarApi`] implementation backed by reqwest.
pub struct GoogleCalendarGateway {
    http: reqwest::Client,
    api_base: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    timeout_secs: u64,
}

impl GoogleCalendarGateway {
    /// Creates a gateway with the production Google endpoints.
    pub fn new(config: &SyncConfig, client_id: String, client_secret: String) -> SyncResult<Self> {
        Self::with_endpoints(
            config,
            client_id,
            client_secret,
            "https://www.googleapis.com/calendar/v3".to_string(),
            "https://oauth2.googleapis.com/token".to_string(),
        )
    }

    /// Creates a gateway against custom endpoints (staging, local
    /// provider emulators).
    pub fn with_endpoints(
        config: &SyncConfig,
        client_id: String,
        client_secret: String,
        api_base: String,
        token_url: String,
    ) -> SyncResult<Self> {
        let timeout = config.request_timeout();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(GoogleCalendarGateway {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token_url,
            client_id,
            client_secret,
            timeout_secs: timeout.as_secs(),
        })
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!("{}/calendars/{}/events", self.api_base, urlencode(calendar_id))
    }

    /// Sends a JSON request and parses a typed response, converting
    /// timeouts and non-2xx statuses to `SyncError`.
    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        access_token: &str,
        body: Option<&(impl serde::Serialize + Sync)>,
        context: &str,
    ) -> SyncResult<T> {
        let response = self.dispatch(method, url, access_token, body, context).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::Serialization(format!("{context}: {e}")))
    }

    /// Like `send_json` but for endpoints returning an empty body.
    async fn send_no_content(
        &self,
        method: Method,
        url: &str,
        access_token: &str,
        body: Option<&(impl serde::Serialize + Sync)>,
        context: &str,
    ) -> SyncResult<()> {
        self.dispatch(method, url, access_token, body, context)
            .await
            .map(|_| ())
    }

    async fn dispatch(
        &self,
        method: Method,
        url: &str,
        access_token: &str,
        body: Option<&(impl serde::Serialize + Sync)>,
        context: &str,
    ) -> SyncResult<reqwest::Response> {
        debug!(method = %method, url = %scrub_url(url), context, "Provider request");

        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(access_token)
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SyncError::Timeout(self.timeout_secs)
            } else {
                SyncError::Transport(format!("{context}: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        Err(self.provider_error(status, response, url, context).await)
    }

    /// Turns a non-2xx response into a typed provider error, pulling
    /// the machine-readable code out of whichever error body shape the
    /// endpoint uses.
    async fn provider_error(
        &self,
        status: StatusCode,
        response: reqwest::Response,
        url: &str,
        context: &str,
    ) -> SyncError {
        let text = response.text().await.unwrap_or_default();
        let code = parse_error_code(&text);

        warn!(
            status = status.as_u16(),
            code = code.as_deref().unwrap_or("-"),
            url = %scrub_url(url),
            context,
            "Provider returned an error"
        );

        SyncError::Provider {
            status: status.as_u16(),
            code,
            context: context.to_string(),
        }
    }
}

#[async_trait]
impl CalendarApi for GoogleCalendarGateway {
    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        sync_token: Option<&str>,
    ) -> SyncResult<EventListResponse> {
        let base = self.events_url(calendar_id);
        let mut merged = EventListResponse::default();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let mut url = Url::parse(&base)
                .map_err(|e| SyncError::Internal(format!("bad events url: {e}")))?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("maxResults", &LIST_PAGE_SIZE.to_string());
                if let Some(token) = sync_token {
                    query.append_pair("syncToken", token);
                }
                if let Some(token) = page_token.as_deref() {
                    query.append_pair("pageToken", token);
                }
            }

            let page: EventListResponse = self
                .send_json(Method::GET, url.as_str(), access_token, NO_BODY, "list events")
                .await?;

            merged.items.extend(page.items);
            merged.next_sync_token = page.next_sync_token;

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(merged),
            }
        }

        Err(SyncError::Internal(format!(
            "event list exceeded {MAX_LIST_PAGES} pages"
        )))
    }

    async fn insert_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &EventResource,
    ) -> SyncResult<EventResource> {
        self.send_json(
            Method::POST,
            &self.events_url(calendar_id),
            access_token,
            Some(event),
            "insert event",
        )
        .await
    }

    async fn patch_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        event: &EventResource,
    ) -> SyncResult<EventResource> {
        let url = format!("{}/{}", self.events_url(calendar_id), urlencode(event_id));
        self.send_json(Method::PATCH, &url, access_token, Some(event), "patch event")
            .await
    }

    async fn watch_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        request: &WatchRequest,
    ) -> SyncResult<WatchResponse> {
        let url = format!("{}/watch", self.events_url(calendar_id));
        self.send_json(Method::POST, &url, access_token, Some(request), "watch events")
            .await
    }

    async fn stop_channel(
        &self,
        access_token: &str,
        request: &StopChannelRequest,
    ) -> SyncResult<()> {
        let url = format!("{}/channels/stop", self.api_base);
        self.send_no_content(Method::POST, &url, access_token, Some(request), "stop channel")
            .await
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> SyncResult<TokenResponse> {
        debug!(url = %scrub_url(&self.token_url), "Refreshing access token");

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::Timeout(self.timeout_secs)
                } else {
                    SyncError::Transport(format!("token refresh: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(self
                .provider_error(status, response, &self.token_url, "token refresh")
                .await);
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| SyncError::Serialization(format!("token refresh: {e}")))
    }
}

/// Typed `None` for requests without a body (helps inference through
/// the generic body parameter).
const NO_BODY: Option<&serde_json::Value> = None;

// =============================================================================
// Helpers
// =============================================================================

/// Replaces the values of sensitive query parameters so the URL is
/// safe to log. Unparseable URLs are fully redacted.
pub fn scrub_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return "<unparseable url redacted>".to_string();
    };

    let scrubbed: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| {
            if SENSITIVE_QUERY_PARAMS.iter().any(|p| p.eq_ignore_ascii_case(&name)) {
                (name.into_owned(), "REDACTED".to_string())
            } else {
                (name.into_owned(), value.into_owned())
            }
        })
        .collect();

    if scrubbed.is_empty() {
        url.set_query(None);
    } else {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (name, value) in &scrubbed {
            query.append_pair(name, value);
        }
    }
    url.to_string()
}

/// Pulls the machine-readable error code out of either provider error
/// body shape.
fn parse_error_code(body: &str) -> Option<String> {
    if let Ok(oauth) = serde_json::from_str::<OAuthErrorBody>(body) {
        return Some(oauth.error);
    }
    if let Ok(api) = serde_json::from_str::<ApiErrorBody>(body) {
        return api.error.status.or_else(|| api.error.message);
    }
    None
}

fn urlencode(segment: &str) -> String {
    // Calendar and event ids are URL path segments; escape everything
    // outside the unreserved set.
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'@' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
