use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::{
    domain::{
        Event, EventId, EventPatch, Group, GroupId, GroupPatch, NewEvent, NewGroup, ScheduleSlot,
    },
    protocol::GroupPayload,
};
use storage::{EventStore, GroupStore, Storage};

use crate::{ApiContext, EventValidator, GroupValidator, ValidationError};

/// Store operations a [`FlakyStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fail {
    Nothing,
    ListGroups,
    FindGroup,
    CreateGroup,
    DeleteGroup,
    CreateEvent,
    DeleteFutureEvents,
    RetitleEvents,
}

/// Real in-memory storage with one operation forced to fail with
/// "Database error", plus call counters for write paths.
pub struct FlakyStore {
    inner: Storage,
    fail: Fail,
    pub group_creates: AtomicUsize,
    pub cascade_calls: AtomicUsize,
}

impl FlakyStore {
    pub async fn new(fail: Fail) -> Arc<Self> {
        let inner = Storage::new("sqlite::memory:").await.expect("db");
        Arc::new(Self {
            inner,
            fail,
            group_creates: AtomicUsize::new(0),
            cascade_calls: AtomicUsize::new(0),
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.inner
    }

    fn check(&self, op: Fail) -> Result<()> {
        if self.fail == op {
            Err(anyhow!("Database error"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GroupStore for FlakyStore {
    async fn create_group(&self, group: &NewGroup) -> Result<Group> {
        self.group_creates.fetch_add(1, Ordering::SeqCst);
        self.check(Fail::CreateGroup)?;
        self.inner.create_group(group).await
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        self.check(Fail::ListGroups)?;
        self.inner.list_groups().await
    }

    async fn find_group(&self, id: &GroupId) -> Result<Option<Group>> {
        self.check(Fail::FindGroup)?;
        self.inner.find_group(id).await
    }

    async fn find_group_by_title(&self, title: &str) -> Result<Option<Group>> {
        self.inner.find_group_by_title(title).await
    }

    async fn update_group(&self, id: &GroupId, patch: &GroupPatch) -> Result<Option<Group>> {
        self.inner.update_group(id, patch).await
    }

    async fn delete_group(&self, id: &GroupId) -> Result<Option<Group>> {
        self.check(Fail::DeleteGroup)?;
        self.inner.delete_group(id).await
    }
}

#[async_trait]
impl EventStore for FlakyStore {
    async fn create_event(&self, event: &NewEvent) -> Result<Event> {
        self.check(Fail::CreateEvent)?;
        self.inner.create_event(event).await
    }

    async fn list_events(&self, group_id: Option<&GroupId>) -> Result<Vec<Event>> {
        self.inner.list_events(group_id).await
    }

    async fn find_event(&self, id: &EventId) -> Result<Option<Event>> {
        self.inner.find_event(id).await
    }

    async fn update_event(&self, id: &EventId, patch: &EventPatch) -> Result<Option<Event>> {
        self.inner.update_event(id, patch).await
    }

    async fn delete_event(&self, id: &EventId) -> Result<Option<Event>> {
        self.inner.delete_event(id).await
    }

    async fn delete_future_events_for_group(
        &self,
        group_id: &GroupId,
        after: DateTime<Utc>,
    ) -> Result<u64> {
        self.cascade_calls.fetch_add(1, Ordering::SeqCst);
        self.check(Fail::DeleteFutureEvents)?;
        self.inner
            .delete_future_events_for_group(group_id, after)
            .await
    }

    async fn retitle_group_events(&self, group_id: &GroupId, title: &str) -> Result<u64> {
        self.check(Fail::RetitleEvents)?;
        self.inner.retitle_group_events(group_id, title).await
    }

    async fn delete_orphaned_future_events(&self, after: DateTime<Utc>) -> Result<u64> {
        self.inner.delete_orphaned_future_events(after).await
    }
}

/// Group validator with canned answers.
pub struct StubGroupValidator {
    pub valid: bool,
    pub exists: bool,
    pub conflict: Option<String>,
}

impl Default for StubGroupValidator {
    fn default() -> Self {
        Self {
            valid: true,
            exists: false,
            conflict: None,
        }
    }
}

#[async_trait]
impl GroupValidator for StubGroupValidator {
    fn is_valid_group_data(&self, _group: &GroupPayload) -> bool {
        self.valid
    }

    fn is_valid_group_patch(&self, _patch: &GroupPatch) -> bool {
        self.valid
    }

    async fn is_group_already_exist(
        &self,
        _title: &str,
        _exclude: Option<&GroupId>,
    ) -> Result<bool> {
        Ok(self.exists)
    }

    async fn is_group_schedule_suitable(
        &self,
        _schedule: &[ScheduleSlot],
        _exclude: Option<&GroupId>,
    ) -> Result<Option<String>> {
        Ok(self.conflict.clone())
    }
}

/// Event validator that always rejects with the given error.
pub struct RejectingEventValidator(pub ValidationError);

impl EventValidator for RejectingEventValidator {
    fn validate_event(&self, _payload: &Value) -> Result<NewEvent, ValidationError> {
        Err(self.0.clone())
    }

    fn validate_event_patch(&self, _payload: &Value) -> Result<EventPatch, ValidationError> {
        Err(self.0.clone())
    }
}

/// Context over a flaky store with the production validators.
pub async fn flaky_context(fail: Fail) -> (ApiContext, Arc<FlakyStore>) {
    let store = FlakyStore::new(fail).await;
    let mut ctx = ApiContext::from_storage(store.storage().clone());
    ctx.groups = store.clone();
    ctx.events = store.clone();
    ctx.group_validator = Arc::new(crate::StoreGroupValidator::new(store.clone()));
    (ctx, store)
}

pub async fn context() -> ApiContext {
    flaky_context(Fail::Nothing).await.0
}

pub fn group_payload(title: &str, schedule: &[(&str, &str)]) -> GroupPayload {
    GroupPayload {
        title: Some(title.to_string()),
        coach_id: Some("coach1".to_string()),
        payment: vec![shared::domain::PaymentPlan {
            daily_payment: Some(10.0),
            monthly_payment: Some(100.0),
        }],
        schedule: schedule
            .iter()
            .map(|(day, time)| ScheduleSlot::new(*day, *time))
            .collect(),
        participants: vec![],
    }
}

pub async fn seed_group(ctx: &ApiContext, title: &str, schedule: &[(&str, &str)]) -> Group {
    crate::create_group(ctx, group_payload(title, schedule))
        .await
        .expect("seed group")
}

pub fn event_body(id: &str, group: &Group, date: &str) -> Value {
    serde_json::json!({
        "_id": id,
        "date": date,
        "groupTitle": group.title,
        "groupId": group.id,
        "isCancelled": false,
        "participants": [],
    })
}
