//! Input checks the controllers run before touching a store.
//!
//! Controllers only see the [`GroupValidator`] and [`EventValidator`] traits;
//! [`StoreGroupValidator`] and [`SchemaEventValidator`] are the production
//! implementations.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use serde_json::{Map, Value};
use shared::{
    domain::{
        parse_iso_date, EventId, EventPatch, Group, GroupId, GroupPatch, NewEvent, Participant,
        PaymentPlan, ScheduleSlot,
    },
    protocol::GroupPayload,
};
use storage::GroupStore;
use thiserror::Error;

#[async_trait]
pub trait GroupValidator: Send + Sync {
    fn is_valid_group_data(&self, group: &GroupPayload) -> bool;

    fn is_valid_group_patch(&self, patch: &GroupPatch) -> bool;

    /// True when a group other than `exclude` already uses `title`.
    async fn is_group_already_exist(
        &self,
        title: &str,
        exclude: Option<&GroupId>,
    ) -> anyhow::Result<bool>;

    /// `Some(description)` when `schedule` collides with another group's slot.
    async fn is_group_schedule_suitable(
        &self,
        schedule: &[ScheduleSlot],
        exclude: Option<&GroupId>,
    ) -> anyhow::Result<Option<String>>;
}

pub trait EventValidator: Send + Sync {
    fn validate_event(&self, payload: &Value) -> Result<NewEvent, ValidationError>;

    fn validate_event_patch(&self, payload: &Value) -> Result<EventPatch, ValidationError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Validation error: \"{path}\" {reason}")]
pub struct ValidationError {
    pub path: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub struct StoreGroupValidator {
    groups: Arc<dyn GroupStore>,
}

impl StoreGroupValidator {
    pub fn new(groups: Arc<dyn GroupStore>) -> Self {
        Self { groups }
    }
}

#[async_trait]
impl GroupValidator for StoreGroupValidator {
    fn is_valid_group_data(&self, group: &GroupPayload) -> bool {
        is_valid_group_data(group)
    }

    fn is_valid_group_patch(&self, patch: &GroupPatch) -> bool {
        is_valid_group_patch(patch)
    }

    async fn is_group_already_exist(
        &self,
        title: &str,
        exclude: Option<&GroupId>,
    ) -> anyhow::Result<bool> {
        let existing = self.groups.find_group_by_title(title.trim()).await?;
        Ok(existing.is_some_and(|group| Some(&group.id) != exclude))
    }

    async fn is_group_schedule_suitable(
        &self,
        schedule: &[ScheduleSlot],
        exclude: Option<&GroupId>,
    ) -> anyhow::Result<Option<String>> {
        if schedule.is_empty() {
            return Ok(None);
        }
        let groups = self.groups.list_groups().await?;
        Ok(find_schedule_conflict(schedule, &groups, exclude))
    }
}

pub fn is_valid_group_data(group: &GroupPayload) -> bool {
    group.title.as_deref().is_some_and(is_present)
        && group.coach_id.as_deref().is_some_and(is_present)
        && is_valid_payment(&group.payment)
        && is_valid_schedule(&group.schedule)
        && is_valid_participants(&group.participants)
}

pub fn is_valid_group_patch(patch: &GroupPatch) -> bool {
    patch.title.as_deref().map_or(true, is_present)
        && patch.coach_id.as_deref().map_or(true, is_present)
        && patch.payment.as_deref().map_or(true, is_valid_payment)
        && patch.schedule.as_deref().map_or(true, is_valid_schedule)
        && patch
            .participants
            .as_deref()
            .map_or(true, is_valid_participants)
}

/// Describes the first slot of `schedule` already taken by another group.
pub fn find_schedule_conflict(
    schedule: &[ScheduleSlot],
    groups: &[Group],
    exclude: Option<&GroupId>,
) -> Option<String> {
    groups
        .iter()
        .filter(|group| Some(&group.id) != exclude)
        .find_map(|group| {
            group.schedule.iter().find_map(|taken| {
                schedule
                    .iter()
                    .any(|slot| slot.coincides_with(taken))
                    .then(|| {
                        format!(
                            "Schedule conflicts with group \"{}\" on {} at {}",
                            group.title, taken.day, taken.time
                        )
                    })
            })
        })
}

fn is_present(value: &str) -> bool {
    !value.trim().is_empty()
}

fn is_valid_payment(payment: &[PaymentPlan]) -> bool {
    payment.iter().all(|plan| {
        [plan.daily_payment, plan.monthly_payment]
            .into_iter()
            .flatten()
            .all(|amount| amount.is_finite() && amount >= 0.0)
    })
}

fn is_valid_schedule(schedule: &[ScheduleSlot]) -> bool {
    schedule
        .iter()
        .all(|slot| slot.weekday().is_some() && slot.time_of_day().is_some())
}

fn is_valid_participants(participants: &[Participant]) -> bool {
    let mut seen = HashSet::new();
    participants
        .iter()
        .all(|p| is_present(&p.id) && is_present(&p.name) && seen.insert(p.id.as_str()))
}

/// Checks event bodies the way the event document schema declares them.
/// Unknown keys are ignored.
pub struct SchemaEventValidator;

impl EventValidator for SchemaEventValidator {
    fn validate_event(&self, payload: &Value) -> Result<NewEvent, ValidationError> {
        let object = as_object(payload)?;
        let id = required_string(object, "_id")?;
        let date = required_string(object, "date")?;
        ensure_iso_date("date", &date)?;
        let group_title = required_string(object, "groupTitle")?;
        let group_id = required_string(object, "groupId")?;
        let is_cancelled = optional_bool(object, "isCancelled")?.unwrap_or(false);
        let participants = optional_participants(object, "participants")?.unwrap_or_default();

        Ok(NewEvent {
            id: EventId(id),
            date,
            group_title,
            group_id: GroupId(group_id),
            is_cancelled,
            participants,
        })
    }

    fn validate_event_patch(&self, payload: &Value) -> Result<EventPatch, ValidationError> {
        let object = as_object(payload)?;
        let date = optional_string(object, "date")?;
        if let Some(date) = &date {
            ensure_iso_date("date", date)?;
        }
        let patch = EventPatch {
            date,
            group_title: optional_string(object, "groupTitle")?,
            group_id: optional_string(object, "groupId")?.map(GroupId),
            is_cancelled: optional_bool(object, "isCancelled")?,
            participants: optional_participants(object, "participants")?,
        };
        if patch.is_empty() {
            return Err(ValidationError::new("value", "must have at least 1 key"));
        }
        Ok(patch)
    }
}

fn as_object(payload: &Value) -> Result<&Map<String, Value>, ValidationError> {
    payload
        .as_object()
        .ok_or_else(|| ValidationError::new("value", "must be of type object"))
}

fn required_string(object: &Map<String, Value>, key: &str) -> Result<String, ValidationError> {
    optional_string(object, key)?.ok_or_else(|| ValidationError::new(key, "is required"))
}

fn optional_string(
    object: &Map<String, Value>,
    key: &str,
) -> Result<Option<String>, ValidationError> {
    match object.get(key) {
        None => Ok(None),
        Some(Value::String(value)) if value.trim().is_empty() => {
            Err(ValidationError::new(key, "is not allowed to be empty"))
        }
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(ValidationError::new(key, "must be a string")),
    }
}

fn optional_bool(object: &Map<String, Value>, key: &str) -> Result<Option<bool>, ValidationError> {
    match object.get(key) {
        None => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(_) => Err(ValidationError::new(key, "must be a boolean")),
    }
}

fn optional_participants(
    object: &Map<String, Value>,
    key: &str,
) -> Result<Option<Vec<Participant>>, ValidationError> {
    let items = match object.get(key) {
        None => return Ok(None),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(ValidationError::new(key, "must be an array")),
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let path = format!("{key}[{index}]");
            let entry = item
                .as_object()
                .ok_or_else(|| ValidationError::new(&path, "must be of type object"))?;
            let nested = |field: &str| format!("{path}.{field}");
            let name = required_string(entry, "name").map_err(|e| rebase(e, &nested("name")))?;
            let id = required_string(entry, "id").map_err(|e| rebase(e, &nested("id")))?;
            let telegram_id = optional_string(entry, "telegramId")
                .map_err(|e| rebase(e, &nested("telegramId")))?;
            Ok(Participant {
                id,
                name,
                telegram_id,
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn rebase(err: ValidationError, path: &str) -> ValidationError {
    ValidationError::new(path, err.reason)
}

fn ensure_iso_date(key: &str, value: &str) -> Result<(), ValidationError> {
    parse_iso_date(value)
        .map(|_| ())
        .ok_or_else(|| ValidationError::new(key, "must be a valid ISO 8601 date"))
}

#[cfg(test)]
#[path = "tests/validators_tests.rs"]
mod tests;
