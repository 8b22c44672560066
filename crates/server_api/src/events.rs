use serde_json::Value;
use shared::{
    domain::{Event, EventId, GroupId},
    error::ApiError,
    protocol::{DeletedResponse, UpdatedEventResponse},
};
use tracing::{debug, info};

use crate::{ApiContext, ValidationError};

pub const EVENT_NOT_FOUND: &str = "Event not found";
pub const EVENT_DELETED: &str = "Event deleted.";

const INTERNAL: &str = "Internal Server Error";

pub async fn list_events(
    ctx: &ApiContext,
    group_id: Option<&GroupId>,
) -> Result<Vec<Event>, ApiError> {
    ctx.events
        .list_events(group_id)
        .await
        .map_err(|e| ctx.internal("Failed to retrieve events", &e))
}

pub async fn get_event(ctx: &ApiContext, id: &EventId) -> Result<Event, ApiError> {
    ctx.events
        .find_event(id)
        .await
        .map_err(|e| ctx.internal("Error getting event", &e))?
        .ok_or_else(|| ApiError::not_found(EVENT_NOT_FOUND))
}

pub async fn create_event(ctx: &ApiContext, payload: &Value) -> Result<Event, ApiError> {
    let event = ctx
        .event_validator
        .validate_event(payload)
        .map_err(rejected)?;
    ensure_group_reference(ctx, &event.group_id, &event.group_title).await?;

    let created = ctx
        .events
        .create_event(&event)
        .await
        .map_err(|e| ctx.internal(INTERNAL, &e))?;
    info!(event_id = %created.id, group_id = %created.group_id, "event created");
    Ok(created)
}

pub async fn update_event(
    ctx: &ApiContext,
    id: &EventId,
    payload: &Value,
) -> Result<UpdatedEventResponse, ApiError> {
    let patch = ctx
        .event_validator
        .validate_event_patch(payload)
        .map_err(rejected)?;

    let mut merged = ctx
        .events
        .find_event(id)
        .await
        .map_err(|e| ctx.internal(INTERNAL, &e))?
        .ok_or_else(|| ApiError::not_found(EVENT_NOT_FOUND))?;
    if patch.group_id.is_some() || patch.group_title.is_some() {
        patch.apply_to(&mut merged);
        ensure_group_reference(ctx, &merged.group_id, &merged.group_title).await?;
    }

    let updated = ctx
        .events
        .update_event(id, &patch)
        .await
        .map_err(|e| ctx.internal(INTERNAL, &e))?
        .ok_or_else(|| ApiError::not_found(EVENT_NOT_FOUND))?;
    info!(event_id = %id, "event updated");
    Ok(UpdatedEventResponse {
        updated_event: updated,
        id: id.clone(),
    })
}

pub async fn delete_event(ctx: &ApiContext, id: &EventId) -> Result<DeletedResponse, ApiError> {
    ctx.events
        .delete_event(id)
        .await
        .map_err(|e| ctx.internal(INTERNAL, &e))?
        .ok_or_else(|| ApiError::not_found(EVENT_NOT_FOUND))?;
    info!(event_id = %id, "event deleted");
    Ok(DeletedResponse {
        message: EVENT_DELETED.to_string(),
        id: id.to_string(),
    })
}

/// An event's denormalized title must match its group at write time.
async fn ensure_group_reference(
    ctx: &ApiContext,
    group_id: &GroupId,
    group_title: &str,
) -> Result<(), ApiError> {
    let group = ctx
        .groups
        .find_group(group_id)
        .await
        .map_err(|e| ctx.internal(INTERNAL, &e))?
        .ok_or_else(|| {
            rejected(ValidationError::new(
                "groupId",
                "must reference an existing group",
            ))
        })?;
    if group.title != group_title {
        return Err(rejected(ValidationError::new(
            "groupTitle",
            format!("must match the title of group {group_id}"),
        )));
    }
    Ok(())
}

fn rejected(err: ValidationError) -> ApiError {
    debug!(%err, "rejected event payload");
    ApiError::validation(err.to_string())
}

#[cfg(test)]
#[path = "tests/events_tests.rs"]
mod tests;
