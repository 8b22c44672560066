use chrono::Utc;
use shared::{
    domain::{Group, GroupId, GroupPatch, NewGroup},
    error::ApiError,
    protocol::{DeletedResponse, GroupPayload, UpdatedGroupResponse},
};
use storage::DuplicateTitle;
use tracing::{debug, info, warn};

use crate::ApiContext;

pub const GROUP_NOT_FOUND: &str = "Group not found";
pub const INVALID_GROUP_DATA: &str = "Invalid group data";
pub const DUPLICATE_TITLE: &str = "This title already exists";
pub const GROUP_DELETED: &str = "Group deleted.";

pub async fn list_groups(ctx: &ApiContext) -> Result<Vec<Group>, ApiError> {
    ctx.groups
        .list_groups()
        .await
        .map_err(|e| ctx.internal("Failed to retrieve groups", &e))
}

pub async fn get_group(ctx: &ApiContext, id: &GroupId) -> Result<Group, ApiError> {
    ctx.groups
        .find_group(id)
        .await
        .map_err(|e| ctx.internal("Error getting group", &e))?
        .ok_or_else(|| ApiError::not_found(GROUP_NOT_FOUND))
}

pub async fn create_group(ctx: &ApiContext, payload: GroupPayload) -> Result<Group, ApiError> {
    const CONTEXT: &str = "Server error";

    if !ctx.group_validator.is_valid_group_data(&payload) {
        debug!(?payload, "rejected invalid group data");
        return Err(ApiError::validation(INVALID_GROUP_DATA));
    }
    let group = new_group(payload);

    let exists = ctx
        .group_validator
        .is_group_already_exist(&group.title, None)
        .await
        .map_err(|e| ctx.internal(CONTEXT, &e))?;
    if exists {
        return Err(ApiError::validation(DUPLICATE_TITLE));
    }

    let conflict = ctx
        .group_validator
        .is_group_schedule_suitable(&group.schedule, None)
        .await
        .map_err(|e| ctx.internal(CONTEXT, &e))?;
    if let Some(conflict) = conflict {
        return Err(ApiError::validation(conflict));
    }

    let created = ctx
        .groups
        .create_group(&group)
        .await
        .map_err(|e| write_failure(ctx, CONTEXT, &e))?;
    info!(group_id = %created.id, title = %created.title, "group created");
    Ok(created)
}

/// Validates and applies a partial update, then refreshes `groupTitle` on the
/// group's events when the title changed. The refresh runs after the update
/// has committed: when it fails the rename stays and the caller gets a 500.
pub async fn update_group(
    ctx: &ApiContext,
    id: &GroupId,
    mut patch: GroupPatch,
) -> Result<UpdatedGroupResponse, ApiError> {
    const CONTEXT: &str = "Internal Server Error";

    if ctx
        .groups
        .find_group(id)
        .await
        .map_err(|e| ctx.internal(CONTEXT, &e))?
        .is_none()
    {
        return Err(ApiError::not_found(GROUP_NOT_FOUND));
    }

    if !ctx.group_validator.is_valid_group_patch(&patch) {
        debug!(group_id = %id, ?patch, "rejected invalid group update");
        return Err(ApiError::validation(INVALID_GROUP_DATA));
    }
    patch.title = patch.title.map(|title| title.trim().to_string());
    patch.coach_id = patch.coach_id.map(|coach_id| coach_id.trim().to_string());

    if let Some(title) = &patch.title {
        let exists = ctx
            .group_validator
            .is_group_already_exist(title, Some(id))
            .await
            .map_err(|e| ctx.internal(CONTEXT, &e))?;
        if exists {
            return Err(ApiError::validation(DUPLICATE_TITLE));
        }
    }

    if let Some(schedule) = &patch.schedule {
        let conflict = ctx
            .group_validator
            .is_group_schedule_suitable(schedule, Some(id))
            .await
            .map_err(|e| ctx.internal(CONTEXT, &e))?;
        if let Some(conflict) = conflict {
            return Err(ApiError::validation(conflict));
        }
    }

    let updated = ctx
        .groups
        .update_group(id, &patch)
        .await
        .map_err(|e| write_failure(ctx, CONTEXT, &e))?
        .ok_or_else(|| ApiError::not_found(GROUP_NOT_FOUND))?;

    if patch.title.is_some() {
        let retitled = ctx
            .events
            .retitle_group_events(id, &updated.title)
            .await
            .map_err(|e| {
                warn!(group_id = %id, "group renamed but its events keep the old title");
                ctx.internal(CONTEXT, &e)
            })?;
        if retitled > 0 {
            info!(group_id = %id, retitled, "refreshed group title on events");
        }
    }

    info!(group_id = %id, "group updated");
    Ok(UpdatedGroupResponse {
        updated_group: updated,
        id: id.clone(),
    })
}

/// Deletes the group, then its events dated after now. The two steps are not
/// atomic: when the second fails the group stays deleted.
pub async fn delete_group(ctx: &ApiContext, id: &GroupId) -> Result<DeletedResponse, ApiError> {
    let deleted = ctx
        .groups
        .delete_group(id)
        .await
        .map_err(|e| ctx.internal("Error deleting group", &e))?
        .ok_or_else(|| ApiError::not_found(GROUP_NOT_FOUND))?;

    let removed = ctx
        .events
        .delete_future_events_for_group(&deleted.id, Utc::now())
        .await
        .map_err(|e| {
            warn!(group_id = %id, "group deleted but its future events were kept");
            ctx.internal("Error deleting events", &e)
        })?;

    info!(group_id = %id, title = %deleted.title, removed, "group deleted");
    Ok(DeletedResponse {
        message: GROUP_DELETED.to_string(),
        id: id.to_string(),
    })
}

/// A concurrent writer can take the title between the check and the write.
fn write_failure(ctx: &ApiContext, context: &str, err: &anyhow::Error) -> ApiError {
    if err.is::<DuplicateTitle>() {
        debug!(error = %err, "title taken by a concurrent write");
        ApiError::validation(DUPLICATE_TITLE)
    } else {
        ctx.internal(context, err)
    }
}

fn new_group(payload: GroupPayload) -> NewGroup {
    NewGroup {
        title: payload.title.unwrap_or_default().trim().to_string(),
        coach_id: payload.coach_id.unwrap_or_default().trim().to_string(),
        payment: payload.payment,
        schedule: payload.schedule,
        participants: payload.participants,
    }
}

#[cfg(test)]
#[path = "tests/groups_tests.rs"]
mod tests;
