use std::sync::Arc;

use super::*;
use crate::support::{
    context, event_body, flaky_context, seed_group, Fail, RejectingEventValidator,
};
use shared::error::ErrorCode;

#[tokio::test]
async fn creates_event_with_created_payload() {
    let ctx = context().await;
    let group = seed_group(&ctx, "groupTitle1", &[("Monday", "10:00")]).await;

    let created = create_event(&ctx, &event_body("1111", &group, "2023-01-02"))
        .await
        .expect("create");
    assert_eq!(created.id.as_str(), "1111");
    assert_eq!(created.date, "2023-01-02");
    assert_eq!(created.group_title, "groupTitle1");
    assert_eq!(created.group_id, group.id);
    assert!(!created.is_cancelled);
    assert!(created.participants.is_empty());

    let loaded = get_event(&ctx, &created.id).await.expect("get");
    assert_eq!(loaded, created);
}

#[tokio::test]
async fn validator_rejection_is_a_bad_request_with_its_message() {
    let (mut ctx, _store) = flaky_context(Fail::Nothing).await;
    ctx.event_validator = Arc::new(RejectingEventValidator(ValidationError::new(
        "date",
        "must be a valid ISO 8601 date",
    )));

    let err = create_event(
        &ctx,
        &serde_json::json!({ "_id": "111", "group": "1", "date": "invalid", "participants": [] }),
    )
    .await
    .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(
        err.message,
        "Validation error: \"date\" must be a valid ISO 8601 date"
    );
}

#[tokio::test]
async fn schema_validator_rejects_malformed_date() {
    let ctx = context().await;
    let err = create_event(
        &ctx,
        &serde_json::json!({
            "_id": "111",
            "group": "1",
            "isCancelled": false,
            "date": "неверный_формат_даты",
            "participants": [],
        }),
    )
    .await
    .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(
        err.message,
        "Validation error: \"date\" must be a valid ISO 8601 date"
    );
}

#[tokio::test]
async fn dates_past_year_9999_are_rejected_and_9999_is_cascaded() {
    let ctx = context().await;
    let group = seed_group(&ctx, "Yoga", &[("Monday", "10:00")]).await;

    let err = create_event(&ctx, &event_body("e1", &group, "+10000-01-01"))
        .await
        .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(
        err.message,
        "Validation error: \"date\" must be a valid ISO 8601 date"
    );

    create_event(&ctx, &event_body("e2", &group, "9999-12-31"))
        .await
        .expect("last four-digit year");
    crate::delete_group(&ctx, &group.id).await.expect("delete");
    let left = list_events(&ctx, Some(&group.id)).await.expect("list");
    assert!(left.is_empty(), "{left:?}");
}

#[tokio::test]
async fn save_failure_is_an_internal_error_with_cause() {
    let (ctx, _store) = flaky_context(Fail::CreateEvent).await;
    let group = seed_group(&ctx, "groupTitle1", &[]).await;

    let err = create_event(
        &ctx,
        &event_body("111", &group, &chrono::Utc::now().to_rfc3339()),
    )
    .await
    .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Internal);
    assert_eq!(err.message, "Internal Server Error: Database error");
}

#[tokio::test]
async fn event_must_reference_its_group_by_current_title() {
    let ctx = context().await;
    let group = seed_group(&ctx, "Yoga", &[]).await;

    let mut body = event_body("e1", &group, "2030-01-01");
    body["groupTitle"] = "Pilates".into();
    let err = create_event(&ctx, &body).await.expect_err("title mismatch");
    assert_eq!(err.code, ErrorCode::Validation);
    assert!(err.message.contains("\"groupTitle\""));

    let mut body = event_body("e2", &group, "2030-01-01");
    body["groupId"] = "missing".into();
    let err = create_event(&ctx, &body).await.expect_err("unknown group");
    assert!(err.message.contains("\"groupId\""));
}

#[tokio::test]
async fn duplicate_event_id_is_an_internal_error() {
    let ctx = context().await;
    let group = seed_group(&ctx, "Yoga", &[]).await;
    create_event(&ctx, &event_body("e1", &group, "2030-01-01"))
        .await
        .expect("first");
    let err = create_event(&ctx, &event_body("e1", &group, "2030-01-02"))
        .await
        .expect_err("duplicate");
    assert_eq!(err.code, ErrorCode::Internal);
    assert!(err.message.starts_with("Internal Server Error: "));
}

#[tokio::test]
async fn update_event_applies_partial_payload() {
    let ctx = context().await;
    let group = seed_group(&ctx, "Yoga", &[]).await;
    create_event(&ctx, &event_body("e1", &group, "2030-01-01"))
        .await
        .expect("create");

    let response = update_event(
        &ctx,
        &EventId::from("e1"),
        &serde_json::json!({
            "isCancelled": true,
            "participants": [{ "id": "p1", "name": "Anna", "telegramId": "42" }],
        }),
    )
    .await
    .expect("update");
    assert_eq!(response.id.as_str(), "e1");
    assert!(response.updated_event.is_cancelled);
    assert_eq!(response.updated_event.participants[0].name, "Anna");
    assert_eq!(response.updated_event.date, "2030-01-01");
}

#[tokio::test]
async fn update_event_reports_missing_and_invalid_input() {
    let ctx = context().await;
    let err = update_event(
        &ctx,
        &EventId::from("nope"),
        &serde_json::json!({ "isCancelled": true }),
    )
    .await
    .expect_err("missing");
    assert_eq!(err.code, ErrorCode::NotFound);
    assert_eq!(err.message, EVENT_NOT_FOUND);

    let err = update_event(
        &ctx,
        &EventId::from("nope"),
        &serde_json::json!({ "date": "tomorrow" }),
    )
    .await
    .expect_err("invalid");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn delete_event_confirms_and_then_reports_missing() {
    let ctx = context().await;
    let group = seed_group(&ctx, "Yoga", &[]).await;
    create_event(&ctx, &event_body("e1", &group, "2030-01-01"))
        .await
        .expect("create");

    let response = delete_event(&ctx, &EventId::from("e1"))
        .await
        .expect("delete");
    assert_eq!(response.message, "Event deleted.");
    assert_eq!(response.id, "e1");

    let err = delete_event(&ctx, &EventId::from("e1"))
        .await
        .expect_err("gone");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn list_events_filters_by_group_and_orders_by_date() {
    let ctx = context().await;
    let yoga = seed_group(&ctx, "Yoga", &[]).await;
    let boxing = seed_group(&ctx, "Boxing", &[]).await;
    create_event(&ctx, &event_body("late", &yoga, "2030-03-01"))
        .await
        .expect("event");
    create_event(&ctx, &event_body("early", &yoga, "2030-01-01T08:00:00Z"))
        .await
        .expect("event");
    create_event(&ctx, &event_body("other", &boxing, "2030-02-01"))
        .await
        .expect("event");

    let ids: Vec<String> = list_events(&ctx, Some(&yoga.id))
        .await
        .expect("list")
        .into_iter()
        .map(|event| event.id.0)
        .collect();
    assert_eq!(ids, vec!["early", "late"]);
    assert_eq!(list_events(&ctx, None).await.expect("all").len(), 3);
}
