use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;

use shared::domain::{
    parse_iso_date, sortable_timestamp, Event, EventId, EventPatch, Group, GroupId, GroupPatch,
    NewEvent, NewGroup,
};

const GROUP_COLUMNS: &str =
    "id, title, coach_id, payment, schedule, participants, created_at, updated_at";
const EVENT_COLUMNS: &str =
    "id, date, group_id, group_title, is_cancelled, participants, created_at, updated_at";

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// A group write lost the race for a title on the unique `groups.title` index.
#[derive(Debug, Error)]
#[error("group title '{0}' is already taken")]
pub struct DuplicateTitle(pub String);

/// Persistence for the `groups` collection.
#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn create_group(&self, group: &NewGroup) -> Result<Group>;
    async fn list_groups(&self) -> Result<Vec<Group>>;
    async fn find_group(&self, id: &GroupId) -> Result<Option<Group>>;
    async fn find_group_by_title(&self, title: &str) -> Result<Option<Group>>;
    /// Merges `patch` into the stored group; `None` when no such group exists.
    async fn update_group(&self, id: &GroupId, patch: &GroupPatch) -> Result<Option<Group>>;
    /// Removes the group and hands back what was stored.
    async fn delete_group(&self, id: &GroupId) -> Result<Option<Group>>;
}

/// Persistence for the `events` collection.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn create_event(&self, event: &NewEvent) -> Result<Event>;
    async fn list_events(&self, group_id: Option<&GroupId>) -> Result<Vec<Event>>;
    async fn find_event(&self, id: &EventId) -> Result<Option<Event>>;
    async fn update_event(&self, id: &EventId, patch: &EventPatch) -> Result<Option<Event>>;
    async fn delete_event(&self, id: &EventId) -> Result<Option<Event>>;
    /// Deletes events of `group_id` that start strictly after `after`.
    async fn delete_future_events_for_group(
        &self,
        group_id: &GroupId,
        after: DateTime<Utc>,
    ) -> Result<u64>;
    /// Refreshes the denormalized `group_title` of every event of a group.
    async fn retitle_group_events(&self, group_id: &GroupId, title: &str) -> Result<u64>;
    /// Deletes future events whose group no longer exists.
    async fn delete_orphaned_future_events(&self, after: DateTime<Utc>) -> Result<u64>;
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(database_url, DEFAULT_MAX_CONNECTIONS).await
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open database '{database_url}'"))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }
}

#[async_trait]
impl GroupStore for Storage {
    async fn create_group(&self, group: &NewGroup) -> Result<Group> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO groups ({GROUP_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING {GROUP_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(GroupId::generate().0)
            .bind(&group.title)
            .bind(&group.coach_id)
            .bind(encode(&group.payment, "payment")?)
            .bind(encode(&group.schedule, "schedule")?)
            .bind(encode(&group.participants, "participants")?)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| {
                title_write_error(err, &group.title, || {
                    format!("failed to insert group '{}'", group.title)
                })
            })?;
        group_from_row(&row)
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        let sql = format!("SELECT {GROUP_COLUMNS} FROM groups ORDER BY created_at ASC, id ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .context("failed to list groups")?;
        rows.iter().map(group_from_row).collect()
    }

    async fn find_group(&self, id: &GroupId) -> Result<Option<Group>> {
        let sql = format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to load group {id}"))?;
        row.as_ref().map(group_from_row).transpose()
    }

    async fn find_group_by_title(&self, title: &str) -> Result<Option<Group>> {
        let sql = format!("SELECT {GROUP_COLUMNS} FROM groups WHERE title = ?");
        let row = sqlx::query(&sql)
            .bind(title)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to look up group titled '{title}'"))?;
        row.as_ref().map(group_from_row).transpose()
    }

    async fn update_group(&self, id: &GroupId, patch: &GroupPatch) -> Result<Option<Group>> {
        let mut tx = self.pool.begin().await?;
        let select = format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = ?");
        let Some(row) = sqlx::query(&select)
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let mut group = group_from_row(&row)?;
        patch.apply_to(&mut group);
        group.updated_at = Utc::now();

        sqlx::query(
            "UPDATE groups
             SET title = ?, coach_id = ?, payment = ?, schedule = ?, participants = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&group.title)
        .bind(&group.coach_id)
        .bind(encode(&group.payment, "payment")?)
        .bind(encode(&group.schedule, "schedule")?)
        .bind(encode(&group.participants, "participants")?)
        .bind(group.updated_at)
        .bind(id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            title_write_error(err, &group.title, || format!("failed to update group {id}"))
        })?;
        tx.commit().await?;

        Ok(Some(group))
    }

    async fn delete_group(&self, id: &GroupId) -> Result<Option<Group>> {
        let sql = format!("DELETE FROM groups WHERE id = ? RETURNING {GROUP_COLUMNS}");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to delete group {id}"))?;
        row.as_ref().map(group_from_row).transpose()
    }
}

#[async_trait]
impl EventStore for Storage {
    async fn create_event(&self, event: &NewEvent) -> Result<Event> {
        let starts_at = event_starts_at(&event.date)?;
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO events ({EVENT_COLUMNS}, starts_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {EVENT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(event.id.as_str())
            .bind(&event.date)
            .bind(event.group_id.as_str())
            .bind(&event.group_title)
            .bind(event.is_cancelled)
            .bind(encode(&event.participants, "participants")?)
            .bind(now)
            .bind(now)
            .bind(starts_at)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("failed to insert event {}", event.id))?;
        event_from_row(&row)
    }

    async fn list_events(&self, group_id: Option<&GroupId>) -> Result<Vec<Event>> {
        let rows = if let Some(group_id) = group_id {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE group_id = ? ORDER BY starts_at ASC, id ASC"
            );
            sqlx::query(&sql)
                .bind(group_id.as_str())
                .fetch_all(&self.pool)
                .await
        } else {
            let sql = format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY starts_at ASC, id ASC");
            sqlx::query(&sql).fetch_all(&self.pool).await
        }
        .context("failed to list events")?;
        rows.iter().map(event_from_row).collect()
    }

    async fn find_event(&self, id: &EventId) -> Result<Option<Event>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to load event {id}"))?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn update_event(&self, id: &EventId, patch: &EventPatch) -> Result<Option<Event>> {
        let mut tx = self.pool.begin().await?;
        let select = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?");
        let Some(row) = sqlx::query(&select)
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let mut event = event_from_row(&row)?;
        patch.apply_to(&mut event);
        event.updated_at = Utc::now();
        let starts_at = event_starts_at(&event.date)?;

        sqlx::query(
            "UPDATE events
             SET date = ?, starts_at = ?, group_id = ?, group_title = ?, is_cancelled = ?,
                 participants = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&event.date)
        .bind(starts_at)
        .bind(event.group_id.as_str())
        .bind(&event.group_title)
        .bind(event.is_cancelled)
        .bind(encode(&event.participants, "participants")?)
        .bind(event.updated_at)
        .bind(id.as_str())
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to update event {id}"))?;
        tx.commit().await?;

        Ok(Some(event))
    }

    async fn delete_event(&self, id: &EventId) -> Result<Option<Event>> {
        let sql = format!("DELETE FROM events WHERE id = ? RETURNING {EVENT_COLUMNS}");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to delete event {id}"))?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn delete_future_events_for_group(
        &self,
        group_id: &GroupId,
        after: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query("DELETE FROM events WHERE group_id = ? AND starts_at > ?")
            .bind(group_id.as_str())
            .bind(sortable_timestamp(after))
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete future events of group {group_id}"))?;
        Ok(result.rows_affected())
    }

    async fn retitle_group_events(&self, group_id: &GroupId, title: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE events SET group_title = ?, updated_at = ? WHERE group_id = ? AND group_title <> ?",
        )
        .bind(title)
        .bind(Utc::now())
        .bind(group_id.as_str())
        .bind(title)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to retitle events of group {group_id}"))?;
        Ok(result.rows_affected())
    }

    async fn delete_orphaned_future_events(&self, after: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM events
             WHERE starts_at > ?
               AND group_id NOT IN (SELECT id FROM groups)",
        )
        .bind(sortable_timestamp(after))
        .execute(&self.pool)
        .await
        .context("failed to delete orphaned events")?;
        Ok(result.rows_affected())
    }
}

/// Unique violations on `groups` can only come from the title index.
fn title_write_error(
    err: sqlx::Error,
    title: &str,
    context: impl FnOnce() -> String,
) -> anyhow::Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            DuplicateTitle(title.to_string()).into()
        }
        _ => anyhow::Error::new(err).context(context()),
    }
}

fn group_from_row(row: &SqliteRow) -> Result<Group> {
    Ok(Group {
        id: GroupId(row.try_get("id")?),
        title: row.try_get("title")?,
        coach_id: row.try_get("coach_id")?,
        payment: decode(row.try_get("payment")?, "payment")?,
        schedule: decode(row.try_get("schedule")?, "schedule")?,
        participants: decode(row.try_get("participants")?, "participants")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<Event> {
    Ok(Event {
        id: EventId(row.try_get("id")?),
        date: row.try_get("date")?,
        group_id: GroupId(row.try_get("group_id")?),
        group_title: row.try_get("group_title")?,
        is_cancelled: row.try_get("is_cancelled")?,
        participants: decode(row.try_get("participants")?, "participants")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn event_starts_at(date: &str) -> Result<String> {
    parse_iso_date(date)
        .map(sortable_timestamp)
        .ok_or_else(|| anyhow!("event date '{date}' is not an ISO 8601 date"))
}

fn encode<T: Serialize>(value: &T, field: &str) -> Result<String> {
    serde_json::to_string(value).with_context(|| format!("failed to encode {field}"))
}

fn decode<T: DeserializeOwned>(raw: String, field: &str) -> Result<T> {
    serde_json::from_str(&raw).with_context(|| format!("stored {field} is not valid json"))
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
