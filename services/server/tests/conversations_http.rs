mod support;

use chat_gateway::config::AckMode;
use chat_protocol::{ChatMsgBody, ChatRequest, ChatType, GetConversationsResponse, Message, PutConversationsRequest, UserConversationPatch};
use support::{insert_user_token, spawn_gateway, TestClient};

#[tokio::test]
async fn get_conversations_reports_unread_delta_after_a_message() {
    let gw = spawn_gateway(AckMode::NoAck).await;
    insert_user_token(&gw.pool, "alice", "tok-alice").await;
    insert_user_token(&gw.pool, "bob", "tok-bob").await;

    let mut alice = TestClient::connect(&gw.ws_url, "tok-alice").await;
    let mut bob = TestClient::connect(&gw.ws_url, "tok-bob").await;

    let req = ChatRequest {
        conversation_id: None,
        chat_type: ChatType::Direct,
        recv_id: "bob".to_owned(),
        msg: ChatMsgBody {
            m_type: 1,
            content: "hey".to_owned(),
        },
        client_msg_id: Some("http-1".to_owned()),
    };
    alice
        .send(&Message::data_frame(
            "conversation.chat",
            "alice",
            serde_json::to_value(req).unwrap(),
        ))
        .await;
    bob.recv().await.expect("bob should receive the push before we query its read state");

    let client = reqwest::Client::new();
    let resp: GetConversationsResponse = client
        .get(format!("http://{}/api/v1/conversations", gw.http_addr))
        .bearer_auth("tok-bob")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let conversation_id = chat_ids::combine_id("alice", "bob");
    let entry = resp
        .conversations
        .get(&conversation_id)
        .expect("bob's conversation list should contain the new direct chat");
    assert_eq!(entry.total, 1);
    assert_eq!(entry.to_read, 1, "bob hasn't acknowledged reading anything yet");
    assert!(
        entry.is_show,
        "bob's hidden first-contact entry must become visible once there's unread traffic"
    );
}

#[tokio::test]
async fn put_conversations_applies_read_delta_and_persists() {
    let gw = spawn_gateway(AckMode::NoAck).await;
    insert_user_token(&gw.pool, "alice", "tok-alice").await;
    insert_user_token(&gw.pool, "bob", "tok-bob").await;

    let mut alice = TestClient::connect(&gw.ws_url, "tok-alice").await;
    let mut bob = TestClient::connect(&gw.ws_url, "tok-bob").await;
    let req = ChatRequest {
        conversation_id: None,
        chat_type: ChatType::Direct,
        recv_id: "bob".to_owned(),
        msg: ChatMsgBody {
            m_type: 1,
            content: "hey".to_owned(),
        },
        client_msg_id: Some("http-2".to_owned()),
    };
    alice
        .send(&Message::data_frame(
            "conversation.chat",
            "alice",
            serde_json::to_value(req).unwrap(),
        ))
        .await;
    bob.recv().await.unwrap();

    let conversation_id = chat_ids::combine_id("alice", "bob");
    let mut patch = std::collections::HashMap::new();
    patch.insert(
        conversation_id.clone(),
        UserConversationPatch {
            conversation_id: conversation_id.clone(),
            chat_type: ChatType::Direct,
            is_show: true,
            read: 1,
            seq: 1,
        },
    );

    let client = reqwest::Client::new();
    let status = client
        .put(format!("http://{}/api/v1/conversations", gw.http_addr))
        .bearer_auth("tok-bob")
        .json(&PutConversationsRequest { conversations: patch })
        .send()
        .await
        .unwrap()
        .status();
    assert!(status.is_success());

    let stored = chat_storage::user_conversations::find_by_user_id(&gw.pool, "bob")
        .await
        .unwrap();
    let entry = stored.get(&conversation_id).unwrap();
    assert_eq!(entry.seq, 1);
    assert!(entry.is_show);
}
