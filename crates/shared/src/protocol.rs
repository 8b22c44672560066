use serde::{Deserialize, Serialize};

use crate::domain::{Event, EventId, Group, GroupId, PaymentPlan, Participant, ScheduleSlot};

/// Body of a group creation request. Every field is optional at the wire
/// level so that missing data is reported by the group validator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub coach_id: Option<String>,
    #[serde(default)]
    pub payment: Vec<PaymentPlan>,
    #[serde(default)]
    pub schedule: Vec<ScheduleSlot>,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatedGroupResponse {
    #[serde(rename = "updatedGroup")]
    pub updated_group: Group,
    #[serde(rename = "_id")]
    pub id: GroupId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatedEventResponse {
    #[serde(rename = "updatedEvent")]
    pub updated_event: Event,
    #[serde(rename = "_id")]
    pub id: EventId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub message: String,
    #[serde(rename = "_id")]
    pub id: String,
}

/// Wire shape of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListQuery {
    #[serde(default)]
    pub group_id: Option<String>,
}
