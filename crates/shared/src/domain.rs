use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc, Weekday};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(GroupId);
id_newtype!(EventId);

impl GroupId {
    /// Fresh server-side identifier for a new group document.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_payment: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_payment: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub day: String,
    pub time: String,
}

impl ScheduleSlot {
    pub fn new(day: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            day: day.into(),
            time: time.into(),
        }
    }

    /// Accepts full or abbreviated English weekday names, case-insensitively.
    pub fn weekday(&self) -> Option<Weekday> {
        self.day.trim().parse::<Weekday>().ok()
    }

    pub fn time_of_day(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(self.time.trim(), "%H:%M").ok()
    }

    /// Two slots coincide when they fall on the same weekday at the same minute.
    pub fn coincides_with(&self, other: &ScheduleSlot) -> bool {
        match (
            self.weekday(),
            self.time_of_day(),
            other.weekday(),
            other.time_of_day(),
        ) {
            (Some(day), Some(time), Some(other_day), Some(other_time)) => {
                day == other_day && time == other_time
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(rename = "_id")]
    pub id: GroupId,
    pub title: String,
    pub coach_id: String,
    pub payment: Vec<PaymentPlan>,
    pub schedule: Vec<ScheduleSlot>,
    pub participants: Vec<Participant>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewGroup {
    pub title: String,
    pub coach_id: String,
    pub payment: Vec<PaymentPlan>,
    pub schedule: Vec<ScheduleSlot>,
    pub participants: Vec<Participant>,
}

/// Partial group update; absent fields keep their stored value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coach_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<Vec<PaymentPlan>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Vec<ScheduleSlot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<Participant>>,
}

impl GroupPatch {
    pub fn apply_to(&self, group: &mut Group) {
        if let Some(title) = &self.title {
            group.title = title.clone();
        }
        if let Some(coach_id) = &self.coach_id {
            group.coach_id = coach_id.clone();
        }
        if let Some(payment) = &self.payment {
            group.payment = payment.clone();
        }
        if let Some(schedule) = &self.schedule {
            group.schedule = schedule.clone();
        }
        if let Some(participants) = &self.participants {
            group.participants = participants.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "_id")]
    pub id: EventId,
    pub date: String,
    pub group_title: String,
    pub group_id: GroupId,
    pub is_cancelled: bool,
    pub participants: Vec<Participant>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub id: EventId,
    pub date: String,
    pub group_title: String,
    pub group_id: GroupId,
    pub is_cancelled: bool,
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventPatch {
    pub date: Option<String>,
    pub group_title: Option<String>,
    pub group_id: Option<GroupId>,
    pub is_cancelled: Option<bool>,
    pub participants: Option<Vec<Participant>>,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply_to(&self, event: &mut Event) {
        if let Some(date) = &self.date {
            event.date = date.clone();
        }
        if let Some(group_title) = &self.group_title {
            event.group_title = group_title.clone();
        }
        if let Some(group_id) = &self.group_id {
            event.group_id = group_id.clone();
        }
        if let Some(is_cancelled) = self.is_cancelled {
            event.is_cancelled = is_cancelled;
        }
        if let Some(participants) = &self.participants {
            event.participants = participants.clone();
        }
    }
}

/// Parses the ISO 8601 shapes events arrive with: a full RFC 3339 timestamp,
/// a local date-time (read as UTC), or a bare calendar date (midnight UTC).
///
/// Only instants whose UTC year has four digits are accepted, so that
/// [`sortable_timestamp`] stays fixed-width.
pub fn parse_iso_date(raw: &str) -> Option<DateTime<Utc>> {
    parse_any_iso_date(raw.trim()).filter(|at| (0..=9999).contains(&at.year()))
}

fn parse_any_iso_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(at.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
}

/// Fixed-width UTC rendering; lexicographic order equals chronological order.
pub fn sortable_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
