//! In-memory fakes shared by the module tests: a [`CareStore`]
//! implementation, a scriptable [`CalendarApi`], and a controllable
//! lock provider. No network, no database.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use tokio::sync::Notify;

use careloop_core::{
    Appointment, Bill, Credential, ItemId, ItemKind, LinkStatus, SyncLink, UserId, WatchChannel,
};

use crate::error::{SyncError, SyncResult};
use crate::gateway::CalendarApi;
use crate::lock::{LockGuard, LockProvider};
use crate::provider::{
    EventListResponse, EventResource, StopChannelRequest, TokenResponse, WatchRequest,
    WatchResponse,
};
use crate::store::{CareStore, RemoteItemPatch, SyncItem};

// =============================================================================
// Fixtures
// =============================================================================

pub fn credential_fixture(user_id: UserId) -> Credential {
    Credential {
        user_id,
        access_token: format!("access-{user_id}"),
        refresh_token: format!("refresh-{user_id}"),
        expires_at: Utc::now() + Duration::hours(1),
        scopes: vec!["https://www.googleapis.com/auth/calendar".into()],
        calendar_id: Some("primary".into()),
        sync_token: None,
        last_pulled_at: None,
        needs_reauthorization: false,
    }
}

pub fn appointment_fixture(user_id: UserId, item_id: ItemId) -> Appointment {
    Appointment {
        id: item_id,
        user_id,
        title: format!("Appointment {item_id}"),
        notes: Some("Bring insurance card".into()),
        location: Some("Clinic".into()),
        assigned_to: None,
        starts_at: Utc.with_ymd_and_hms(2025, 11, 1, 17, 0, 0).unwrap(),
        ends_at: Utc.with_ymd_and_hms(2025, 11, 1, 18, 0, 0).unwrap(),
        time_zone: Some("America/Chicago".into()),
        updated_at: Utc::now(),
        sync_link: None,
    }
}

pub fn bill_fixture(user_id: UserId, item_id: ItemId) -> Bill {
    Bill {
        id: item_id,
        user_id,
        payee: "Walgreens Pharmacy".into(),
        amount_cents: 4250,
        due_date: NaiveDate::from_ymd_opt(2025, 11, 15).unwrap(),
        notes: None,
        updated_at: Utc::now(),
        sync_link: None,
    }
}

// =============================================================================
// In-Memory Store
// =============================================================================

#[derive(Default)]
struct StoreState {
    credentials: HashMap<UserId, Credential>,
    appointments: HashMap<ItemId, Appointment>,
    bills: HashMap<ItemId, Bill>,
    links: HashMap<(ItemKind, ItemId), SyncLink>,
    channels: HashMap<String, WatchChannel>,
    /// Which items the CRUD layer currently considers pending.
    pending: HashMap<(ItemKind, ItemId), bool>,
    /// When set, every item is reported pending on every call.
    keep_all_pending: bool,
}

pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn seed_credential(&self, credential: Credential) {
        self.state
            .lock()
            .unwrap()
            .credentials
            .insert(credential.user_id, credential);
    }

    /// Seeds an appointment; unlinked items start out pending (a fresh
    /// local record awaiting its first push).
    pub fn seed_appointment(&self, appointment: Appointment) {
        let mut state = self.state.lock().unwrap();
        state
            .pending
            .insert((ItemKind::Appointment, appointment.id), true);
        state.appointments.insert(appointment.id, appointment);
    }

    pub fn seed_bill(&self, bill: Bill) {
        let mut state = self.state.lock().unwrap();
        state.pending.insert((ItemKind::Bill, bill.id), true);
        state.bills.insert(bill.id, bill);
    }

    pub fn seed_watch_channel(&self, channel: WatchChannel) {
        self.state
            .lock()
            .unwrap()
            .channels
            .insert(channel.id.clone(), channel);
    }

    pub fn keep_items_pending(&self, keep: bool) {
        self.state.lock().unwrap().keep_all_pending = keep;
    }

    pub fn mark_pending(&self, kind: ItemKind, item_id: ItemId) {
        let mut state = self.state.lock().unwrap();
        state.pending.insert((kind, item_id), true);
        if let Some(link) = state.links.get_mut(&(kind, item_id)) {
            link.status = LinkStatus::Pending;
        }
    }

    pub fn mutate_appointment(&self, item_id: ItemId, f: impl FnOnce(&mut Appointment)) {
        let mut state = self.state.lock().unwrap();
        f(state.appointments.get_mut(&item_id).expect("appointment"));
    }

    pub fn appointment(&self, item_id: ItemId) -> Appointment {
        self.state.lock().unwrap().appointments[&item_id].clone()
    }

    pub fn bill(&self, item_id: ItemId) -> Bill {
        self.state.lock().unwrap().bills[&item_id].clone()
    }

    pub fn link(&self, kind: ItemKind, item_id: ItemId) -> Option<SyncLink> {
        self.state.lock().unwrap().links.get(&(kind, item_id)).cloned()
    }

    pub fn credential_snapshot(&self, user_id: UserId) -> Credential {
        self.state.lock().unwrap().credentials[&user_id].clone()
    }

    pub fn watch_channel(&self, channel_id: &str) -> Option<WatchChannel> {
        self.state.lock().unwrap().channels.get(channel_id).cloned()
    }

    fn materialize(state: &StoreState, kind: ItemKind, item_id: ItemId) -> Option<SyncItem> {
        let link = state.links.get(&(kind, item_id)).cloned();
        match kind {
            ItemKind::Appointment => state.appointments.get(&item_id).map(|a| {
                let mut a = a.clone();
                a.sync_link = link;
                SyncItem::Appointment(a)
            }),
            ItemKind::Bill => state.bills.get(&item_id).map(|b| {
                let mut b = b.clone();
                b.sync_link = link;
                SyncItem::Bill(b)
            }),
        }
    }
}

#[async_trait]
impl CareStore for InMemoryStore {
    async fn credential(&self, user_id: UserId) -> SyncResult<Option<Credential>> {
        Ok(self.state.lock().unwrap().credentials.get(&user_id).cloned())
    }

    async fn update_credential_tokens(
        &self,
        user_id: UserId,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(credential) = state.credentials.get_mut(&user_id) {
            credential.access_token = access_token.to_string();
            credential.expires_at = expires_at;
        }
        Ok(())
    }

    async fn set_needs_reauthorization(&self, user_id: UserId) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(credential) = state.credentials.get_mut(&user_id) {
            credential.needs_reauthorization = true;
        }
        Ok(())
    }

    async fn update_sync_token(
        &self,
        user_id: UserId,
        sync_token: Option<&str>,
    ) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(credential) = state.credentials.get_mut(&user_id) {
            credential.sync_token = sync_token.map(str::to_string);
        }
        Ok(())
    }

    async fn mark_pulled(&self, user_id: UserId, at: DateTime<Utc>) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(credential) = state.credentials.get_mut(&user_id) {
            credential.last_pulled_at = Some(at);
        }
        Ok(())
    }

    async fn connected_user_ids(&self) -> SyncResult<Vec<UserId>> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<UserId> = state
            .credentials
            .values()
            .filter(|c| c.calendar_id.is_some() && !c.needs_reauthorization)
            .map(|c| c.user_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn pending_items(&self, user_id: UserId) -> SyncResult<Vec<SyncItem>> {
        let state = self.state.lock().unwrap();
        let mut keys: Vec<(ItemKind, ItemId)> = Vec::new();
        for a in state.appointments.values().filter(|a| a.user_id == user_id) {
            keys.push((ItemKind::Appointment, a.id));
        }
        for b in state.bills.values().filter(|b| b.user_id == user_id) {
            keys.push((ItemKind::Bill, b.id));
        }
        keys.sort_unstable_by_key(|(_, id)| *id);

        let mut items = Vec::new();
        for key in keys {
            let pending = state.keep_all_pending
                || state.pending.get(&key).copied().unwrap_or(false)
                || state
                    .links
                    .get(&key)
                    .is_some_and(|l| l.status == LinkStatus::Pending);
            if pending {
                if let Some(item) = Self::materialize(&state, key.0, key.1) {
                    items.push(item);
                }
            }
        }
        Ok(items)
    }

    async fn item(&self, kind: ItemKind, item_id: ItemId) -> SyncResult<Option<SyncItem>> {
        let state = self.state.lock().unwrap();
        Ok(Self::materialize(&state, kind, item_id))
    }

    async fn item_by_event_id(
        &self,
        user_id: UserId,
        event_id: &str,
    ) -> SyncResult<Option<SyncItem>> {
        let state = self.state.lock().unwrap();
        let key = state
            .links
            .values()
            .find(|l| l.event_id == event_id)
            .map(|l| (l.item_kind, l.item_id));
        Ok(key
            .and_then(|(kind, id)| Self::materialize(&state, kind, id))
            .filter(|item| item.user_id() == user_id))
    }

    async fn apply_remote_fields(
        &self,
        kind: ItemKind,
        item_id: ItemId,
        patch: &RemoteItemPatch,
    ) -> SyncResult<SyncItem> {
        let mut state = self.state.lock().unwrap();
        match kind {
            ItemKind::Appointment => {
                let a = state
                    .appointments
                    .get_mut(&item_id)
                    .ok_or_else(|| SyncError::Store(format!("no appointment {item_id}")))?;
                a.title = patch.title.clone();
                a.notes = patch.notes.clone();
                a.location = patch.location.clone();
                if let Some(starts_at) = patch.starts_at {
                    a.starts_at = starts_at;
                }
                if let Some(ends_at) = patch.ends_at {
                    a.ends_at = ends_at;
                }
                if patch.time_zone.is_some() {
                    a.time_zone = patch.time_zone.clone();
                }
            }
            ItemKind::Bill => {
                let b = state
                    .bills
                    .get_mut(&item_id)
                    .ok_or_else(|| SyncError::Store(format!("no bill {item_id}")))?;
                b.notes = patch.notes.clone();
                if let Some(due_date) = patch.due_date {
                    b.due_date = due_date;
                }
            }
        }
        // Sync-originated write: the pending flag is left untouched by
        // the CRUD layer's re-queue machinery.
        state.pending.insert((kind, item_id), false);
        Self::materialize(&state, kind, item_id)
            .ok_or_else(|| SyncError::Store("item vanished".into()))
    }

    async fn upsert_sync_link(&self, link: &SyncLink) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        state.pending.insert((link.item_kind, link.item_id), false);
        state
            .links
            .insert((link.item_kind, link.item_id), link.clone());
        Ok(())
    }

    async fn delete_sync_link(&self, kind: ItemKind, item_id: ItemId) -> SyncResult<()> {
        self.state.lock().unwrap().links.remove(&(kind, item_id));
        Ok(())
    }

    async fn record_link_error(
        &self,
        kind: ItemKind,
        item_id: ItemId,
        message: &str,
    ) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(link) = state.links.get_mut(&(kind, item_id)) {
            link.status = LinkStatus::Error;
            link.last_error = Some(message.to_string());
        }
        Ok(())
    }

    async fn watch_channel_for_calendar(
        &self,
        user_id: UserId,
        calendar_id: &str,
    ) -> SyncResult<Option<WatchChannel>> {
        let state = self.state.lock().unwrap();
        let mut matching: Vec<&WatchChannel> = state
            .channels
            .values()
            .filter(|c| c.user_id == user_id && c.calendar_id == calendar_id)
            .collect();
        matching.sort_by_key(|c| c.id.clone());
        Ok(matching.first().map(|c| (*c).clone()))
    }

    async fn watch_channel_by_token(&self, token: &str) -> SyncResult<Option<WatchChannel>> {
        let state = self.state.lock().unwrap();
        Ok(state.channels.values().find(|c| c.token == token).cloned())
    }

    async fn watch_channel_by_id(&self, channel_id: &str) -> SyncResult<Option<WatchChannel>> {
        Ok(self.state.lock().unwrap().channels.get(channel_id).cloned())
    }

    async fn watch_channel_by_resource_id(
        &self,
        resource_id: &str,
    ) -> SyncResult<Option<WatchChannel>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .channels
            .values()
            .find(|c| c.resource_id == resource_id)
            .cloned())
    }

    async fn insert_watch_channel(&self, channel: &WatchChannel) -> SyncResult<()> {
        self.state
            .lock()
            .unwrap()
            .channels
            .insert(channel.id.clone(), channel.clone());
        Ok(())
    }

    async fn delete_watch_channel(&self, channel_id: &str) -> SyncResult<()> {
        self.state.lock().unwrap().channels.remove(channel_id);
        Ok(())
    }

    async fn watch_channels_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> SyncResult<Vec<WatchChannel>> {
        let state = self.state.lock().unwrap();
        let mut expiring: Vec<WatchChannel> = state
            .channels
            .values()
            .filter(|c| c.expires_at < cutoff)
            .cloned()
            .collect();
        expiring.sort_by_key(|c| c.id.clone());
        Ok(expiring)
    }
}

// =============================================================================
// Fake Calendar API
// =============================================================================

#[derive(Default)]
struct FakeApiState {
    events: HashMap<String, EventResource>,
    /// Scripted list outcomes, served in push order; empty list falls
    /// back to an empty page with a fresh sync token.
    list_script: VecDeque<Result<EventListResponse, u16>>,
    last_list_sync_token: Option<String>,
    fail_refresh: Option<(u16, Option<String>)>,
    fail_next_insert: Option<u16>,
    fail_next_patch: Option<u16>,
    fail_next_stop: Option<u16>,
    last_watch_address: Option<String>,
    hold_lists: Option<Arc<Notify>>,
}

pub struct FakeCalendarApi {
    state: Mutex<FakeApiState>,
    list_calls: AtomicU32,
    insert_calls: AtomicU32,
    patch_calls: AtomicU32,
    refresh_calls: AtomicU32,
    watch_calls: AtomicU32,
    stop_calls: AtomicU32,
    seq: AtomicU32,
}

impl FakeCalendarApi {
    pub fn new() -> Self {
        FakeCalendarApi {
            state: Mutex::new(FakeApiState::default()),
            list_calls: AtomicU32::new(0),
            insert_calls: AtomicU32::new(0),
            patch_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            watch_calls: AtomicU32::new(0),
            stop_calls: AtomicU32::new(0),
            seq: AtomicU32::new(0),
        }
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }
    pub fn insert_calls(&self) -> u32 {
        self.insert_calls.load(Ordering::SeqCst)
    }
    pub fn patch_calls(&self) -> u32 {
        self.patch_calls.load(Ordering::SeqCst)
    }
    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }
    pub fn watch_calls(&self) -> u32 {
        self.watch_calls.load(Ordering::SeqCst)
    }
    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn fail_refresh(&self, status: u16, code: Option<&str>) {
        self.state.lock().unwrap().fail_refresh = Some((status, code.map(str::to_string)));
    }

    pub fn fail_next_insert(&self, status: u16) {
        self.state.lock().unwrap().fail_next_insert = Some(status);
    }

    pub fn fail_next_patch(&self, status: u16) {
        self.state.lock().unwrap().fail_next_patch = Some(status);
    }

    pub fn fail_next_stop(&self, status: u16) {
        self.state.lock().unwrap().fail_next_stop = Some(status);
    }

    pub fn fail_next_list(&self, status: u16) {
        self.state.lock().unwrap().list_script.push_back(Err(status));
    }

    pub fn push_list_response(&self, response: EventListResponse) {
        self.state.lock().unwrap().list_script.push_back(Ok(response));
    }

    pub fn last_list_sync_token(&self) -> Option<String> {
        self.state.lock().unwrap().last_list_sync_token.clone()
    }

    pub fn last_watch_address(&self) -> Option<String> {
        self.state.lock().unwrap().last_watch_address.clone()
    }

    pub fn remove_event(&self, event_id: &str) {
        self.state.lock().unwrap().events.remove(event_id);
    }

    /// The event body as the provider last stored it.
    pub fn event(&self, event_id: &str) -> Option<EventResource> {
        self.state.lock().unwrap().events.get(event_id).cloned()
    }

    /// Parks every subsequent list call until [`release_lists`].
    pub fn hold_lists(&self) {
        self.state.lock().unwrap().hold_lists = Some(Arc::new(Notify::new()));
    }

    pub fn release_lists(&self) {
        if let Some(gate) = self.state.lock().unwrap().hold_lists.take() {
            gate.notify_waiters();
        }
    }

    fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn provider_err(status: u16, code: Option<&str>, context: &str) -> SyncError {
        SyncError::Provider {
            status,
            code: code.map(str::to_string),
            context: context.to_string(),
        }
    }
}

#[async_trait]
impl CalendarApi for FakeCalendarApi {
    async fn list_events(
        &self,
        _access_token: &str,
        _calendar_id: &str,
        sync_token: Option<&str>,
    ) -> SyncResult<EventListResponse> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let gate = {
            let mut state = self.state.lock().unwrap();
            state.last_list_sync_token = sync_token.map(str::to_string);
            state.hold_lists.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let scripted = self.state.lock().unwrap().list_script.pop_front();
        match scripted {
            Some(Ok(response)) => Ok(response),
            Some(Err(status)) => Err(Self::provider_err(status, None, "list events")),
            None => Ok(EventListResponse {
                items: vec![],
                next_page_token: None,
                next_sync_token: Some(format!("synctok-{}", self.next_seq())),
            }),
        }
    }

    async fn insert_event(
        &self,
        _access_token: &str,
        _calendar_id: &str,
        event: &EventResource,
    ) -> SyncResult<EventResource> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.fail_next_insert.take() {
            return Err(Self::provider_err(status, None, "insert event"));
        }
        let n = self.next_seq();
        let mut stored = event.clone();
        stored.id = Some(format!("ev-{n}"));
        stored.etag = Some(format!("etag-{n}"));
        stored.updated = Some(Utc::now());
        state
            .events
            .insert(stored.id.clone().unwrap(), stored.clone());
        Ok(stored)
    }

    async fn patch_event(
        &self,
        _access_token: &str,
        _calendar_id: &str,
        event_id: &str,
        event: &EventResource,
    ) -> SyncResult<EventResource> {
        self.patch_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.fail_next_patch.take() {
            return Err(Self::provider_err(status, None, "patch event"));
        }
        if !state.events.contains_key(event_id) {
            return Err(Self::provider_err(404, None, "patch event"));
        }
        let n = self.next_seq();
        let mut stored = event.clone();
        stored.id = Some(event_id.to_string());
        stored.etag = Some(format!("etag-{n}"));
        stored.updated = Some(Utc::now());
        state.events.insert(event_id.to_string(), stored.clone());
        Ok(stored)
    }

    async fn watch_events(
        &self,
        _access_token: &str,
        _calendar_id: &str,
        request: &WatchRequest,
    ) -> SyncResult<WatchResponse> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.last_watch_address = Some(request.address.clone());
        let ttl_secs: i64 = request.params.ttl.parse().unwrap_or(0);
        let expiration = (Utc::now() + Duration::seconds(ttl_secs)).timestamp_millis();
        Ok(WatchResponse {
            id: request.id.clone(),
            resource_id: format!("fres-{}", self.next_seq()),
            resource_uri: "https://provider.example/resource".into(),
            expiration: Some(expiration.to_string()),
        })
    }

    async fn stop_channel(
        &self,
        _access_token: &str,
        _request: &StopChannelRequest,
    ) -> SyncResult<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.fail_next_stop.take() {
            return Err(Self::provider_err(status, None, "stop channel"));
        }
        Ok(())
    }

    async fn refresh_access_token(&self, _refresh_token: &str) -> SyncResult<TokenResponse> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let fail = self.state.lock().unwrap().fail_refresh.clone();
        if let Some((status, code)) = fail {
            return Err(Self::provider_err(status, code.as_deref(), "token refresh"));
        }
        Ok(TokenResponse {
            access_token: format!("fresh-token-{n}"),
            expires_in: 3600,
            scope: None,
        })
    }
}

// =============================================================================
// Fake Lock Provider
// =============================================================================

pub struct FakeLockProvider {
    denied: Mutex<std::collections::HashSet<UserId>>,
    acquires: AtomicU32,
}

struct FakeLockGuard;

#[async_trait]
impl LockGuard for FakeLockGuard {
    async fn release(self: Box<Self>) -> SyncResult<()> {
        Ok(())
    }
}

impl FakeLockProvider {
    pub fn new() -> Self {
        FakeLockProvider {
            denied: Mutex::new(std::collections::HashSet::new()),
            acquires: AtomicU32::new(0),
        }
    }

    /// Simulates the lock being held by another process.
    pub fn deny(&self, user_id: UserId) {
        self.denied.lock().unwrap().insert(user_id);
    }

    pub fn allow(&self, user_id: UserId) {
        self.denied.lock().unwrap().remove(&user_id);
    }

    pub fn acquire_count(&self) -> u32 {
        self.acquires.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockProvider for FakeLockProvider {
    async fn try_acquire(&self, user_id: UserId) -> SyncResult<Option<Box<dyn LockGuard>>> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        if self.denied.lock().unwrap().contains(&user_id) {
            Ok(None)
        } else {
            Ok(Some(Box::new(FakeLockGuard)))
        }
    }
}
