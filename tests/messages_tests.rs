mod common;

use axum::http::StatusCode;

// ============================================================================
// GET /api/conversations/:id/messages
// ============================================================================

#[tokio::test]
async fn test_list_messages_newest_first_with_paging() {
    let state = common::test_state().await;
    let app = common::create_test_app(state.clone());

    let (token_a, alice) = common::register_and_get_token(app.clone(), "alice").await;
    let (_, bob) = common::register_and_get_token(app.clone(), "bob").await;
    let created = common::create_conversation(app.clone(), &token_a, "Trip", &[bob]).await;
    let conversation_id = created["conversation"]["id"].as_i64().unwrap();

    for i in 1..=5 {
        common::persist_message(&state, conversation_id, alice, &format!("m{i}")).await;
    }

    let (status, body) = common::get_authed(
        app.clone(),
        &format!("/api/conversations/{conversation_id}/messages?limit=2"),
        &token_a,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let bodies: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["body"].as_str().unwrap())
        .collect();
    assert_eq!(bodies, vec!["m5", "m4"]);

    let (_, body) = common::get_authed(
        app,
        &format!("/api/conversations/{conversation_id}/messages?limit=2&offset=2"),
        &token_a,
    )
    .await;
    let bodies: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["body"].as_str().unwrap())
        .collect();
    assert_eq!(bodies, vec!["m3", "m2"]);
}

#[tokio::test]
async fn test_list_messages_defaults_limit_to_twenty() {
    let state = common::test_state().await;
    let app = common::create_test_app(state.clone());

    let (token, alice) = common::register_and_get_token(app.clone(), "alice").await;
    let created = common::create_conversation(app.clone(), &token, "Solo", &[]).await;
    let conversation_id = created["conversation"]["id"].as_i64().unwrap();

    for i in 1..=25 {
        common::persist_message(&state, conversation_id, alice, &format!("m{i}")).await;
    }

    // limit=0 and a negative offset fall back to the defaults.
    let (status, body) = common::get_authed(
        app,
        &format!("/api/conversations/{conversation_id}/messages?limit=0&offset=-1"),
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 20);
    assert_eq!(messages[0]["body"], "m25");
}

#[tokio::test]
async fn test_list_messages_advances_the_read_cursor() {
    let state = common::test_state().await;
    let app = common::create_test_app(state.clone());

    let (token_a, alice) = common::register_and_get_token(app.clone(), "alice").await;
    let (token_b, bob) = common::register_and_get_token(app.clone(), "bob").await;
    let created = common::create_conversation(app.clone(), &token_a, "Trip", &[bob]).await;
    let conversation_id = created["conversation"]["id"].as_i64().unwrap();

    common::persist_message(&state, conversation_id, alice, "hi").await;

    // Unread for bob until he lists the messages.
    let (_, listing) = common::get_authed(app.clone(), "/api/conversations", &token_b).await;
    assert_eq!(listing["conversations"][0]["unread_count"], 1);

    let (status, _) = common::get_authed(
        app.clone(),
        &format!("/api/conversations/{conversation_id}/messages"),
        &token_b,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, listing) = common::get_authed(app, "/api/conversations", &token_b).await;
    assert_eq!(listing["conversations"][0]["unread_count"], 0);
}

#[tokio::test]
async fn test_empty_listing_does_not_create_a_cursor() {
    let state = common::test_state().await;
    let app = common::create_test_app(state.clone());

    let (token, _) = common::register_and_get_token(app.clone(), "alice").await;
    let created = common::create_conversation(app.clone(), &token, "Quiet", &[]).await;
    let conversation_id = created["conversation"]["id"].as_i64().unwrap();

    let (status, body) = common::get_authed(
        app,
        &format!("/api/conversations/{conversation_id}/messages"),
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["messages"].as_array().unwrap().is_empty());

    let cursors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM read_cursors")
        .fetch_one(&state.pool)
        .await
        .unwrap();
    assert_eq!(cursors, 0);
}

#[tokio::test]
async fn test_non_member_gets_403() {
    let app = common::test_app().await;

    let (token_a, _) = common::register_and_get_token(app.clone(), "alice").await;
    let (token_m, _) = common::register_and_get_token(app.clone(), "mallory").await;
    let created = common::create_conversation(app.clone(), &token_a, "Private", &[]).await;
    let conversation_id = created["conversation"]["id"].as_i64().unwrap();

    let (status, _) = common::get_authed(
        app,
        &format!("/api/conversations/{conversation_id}/messages"),
        &token_m,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_non_numeric_conversation_id_is_400() {
    let app = common::test_app().await;
    let (token, _) = common::register_and_get_token(app.clone(), "alice").await;

    let (status, _) = common::get_authed(
        app,
        "/api/conversations/not-a-number/messages",
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
