mod support;

use chat_gateway::config::AckMode;
use chat_protocol::{ChatMsgBody, ChatRequest, ChatType, FrameType, Message, PushContentType};
use support::{insert_user_token, spawn_gateway, TestClient};

fn chat_frame(recv_id: &str, content: &str, client_msg_id: &str) -> Message {
    let req = ChatRequest {
        conversation_id: None,
        chat_type: ChatType::Direct,
        recv_id: recv_id.to_owned(),
        msg: ChatMsgBody {
            m_type: 1,
            content: content.to_owned(),
        },
        client_msg_id: Some(client_msg_id.to_owned()),
    };
    Message::data_frame("conversation.chat", "alice", serde_json::to_value(req).unwrap())
}

#[tokio::test]
async fn direct_message_is_persisted_and_pushed_to_recipient() {
    let gw = spawn_gateway(AckMode::NoAck).await;
    insert_user_token(&gw.pool, "alice", "tok-alice").await;
    insert_user_token(&gw.pool, "bob", "tok-bob").await;

    let mut alice = TestClient::connect(&gw.ws_url, "tok-alice").await;
    let mut bob = TestClient::connect(&gw.ws_url, "tok-bob").await;

    alice.send(&chat_frame("bob", "hello bob", "m-1")).await;

    let push = bob.recv().await.expect("bob should receive a push");
    assert_eq!(push.method.as_deref(), Some("push"));
    let body: chat_protocol::Push = serde_json::from_value(push.data).unwrap();
    assert_eq!(body.send_id, "alice");
    assert_eq!(body.content, "hello bob");
    assert!(matches!(body.content_type, PushContentType::ChatMsg));

    let rows: Vec<(String,)> = sqlx::query_as("SELECT sender_id FROM chat_logs WHERE conversation_id = $1")
        .bind(&body.conversation_id)
        .fetch_all(&gw.pool)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, "alice");
}

#[tokio::test]
async fn redelivered_client_msg_id_does_not_duplicate_the_log() {
    let gw = spawn_gateway(AckMode::NoAck).await;
    insert_user_token(&gw.pool, "alice", "tok-alice").await;
    insert_user_token(&gw.pool, "bob", "tok-bob").await;

    let mut alice = TestClient::connect(&gw.ws_url, "tok-alice").await;
    let mut bob = TestClient::connect(&gw.ws_url, "tok-bob").await;

    alice.send(&chat_frame("bob", "hi", "dup-1")).await;
    bob.recv().await.unwrap();
    alice.send(&chat_frame("bob", "hi", "dup-1")).await;
    bob.recv().await.unwrap();

    let conversation_id = chat_ids::combine_id("alice", "bob");
    let count: (i64,) = sqlx::query_as("SELECT count(*) FROM chat_logs WHERE conversation_id = $1")
        .bind(&conversation_id)
        .fetch_one(&gw.pool)
        .await
        .unwrap();
    assert_eq!(count.0, 1, "redelivery of the same client_msg_id must not insert a second row");
}

#[tokio::test]
async fn a_second_connection_for_the_same_user_evicts_the_first() {
    let gw = spawn_gateway(AckMode::NoAck).await;
    insert_user_token(&gw.pool, "alice", "tok-alice").await;

    let mut first = TestClient::connect(&gw.ws_url, "tok-alice").await;
    let _second = TestClient::connect(&gw.ws_url, "tok-alice").await;

    // The registry closes the first connection's socket on eviction; its
    // next read observes a close frame (or the stream simply ends).
    let frame = first.recv().await;
    assert!(frame.is_none(), "evicted connection should observe its socket closed");
}

#[tokio::test]
async fn group_fanout_excludes_the_sender() {
    let gw = spawn_gateway(AckMode::NoAck).await;
    insert_user_token(&gw.pool, "alice", "tok-alice").await;
    insert_user_token(&gw.pool, "bob", "tok-bob").await;
    insert_user_token(&gw.pool, "carol", "tok-carol").await;

    let group_id = "group-1";
    chat_storage::setup::create_group_conversation(&gw.pool, group_id, "alice")
        .await
        .unwrap();
    for (uid, role) in [("alice", 1), ("bob", 0), ("carol", 0)] {
        sqlx::query("INSERT INTO group_members (group_id, user_id, role_level) VALUES ($1, $2, $3)")
            .bind(group_id)
            .bind(uid)
            .bind(role)
            .execute(&gw.pool)
            .await
            .unwrap();
    }

    let mut alice = TestClient::connect(&gw.ws_url, "tok-alice").await;
    let mut bob = TestClient::connect(&gw.ws_url, "tok-bob").await;
    let mut carol = TestClient::connect(&gw.ws_url, "tok-carol").await;

    let req = ChatRequest {
        conversation_id: Some(group_id.to_owned()),
        chat_type: ChatType::Group,
        recv_id: group_id.to_owned(),
        msg: ChatMsgBody {
            m_type: 1,
            content: "hi all".to_owned(),
        },
        client_msg_id: Some("g-1".to_owned()),
    };
    alice
        .send(&Message::data_frame(
            "conversation.chat",
            "alice",
            serde_json::to_value(req).unwrap(),
        ))
        .await;

    let bob_push = bob.recv().await.expect("bob should receive the group push");
    let carol_push = carol.recv().await.expect("carol should receive the group push");
    for push in [bob_push, carol_push] {
        // Dispatcher-injected pushes carry no client-assigned ack id, so
        // they're tagged NoAck to skip the gateway's ack-tracking path.
        assert_eq!(push.frame_type, FrameType::NoAck);
        let body: chat_protocol::Push = serde_json::from_value(push.data).unwrap();
        assert_eq!(body.send_id, "alice");
    }

    // Alice sent the message; she should never receive it echoed back as a
    // push. A ping round-trip (Ping in, Ping out per `ws::writer_loop`)
    // proves her connection is still alive and idle, not just slow.
    alice.send(&Message::ping()).await;
    let reply = alice.recv().await.expect("ping should be echoed back");
    assert_eq!(reply.frame_type, FrameType::Ping);

    // Bob, a group member who hasn't sent anything yet, sends his own
    // message. Unlike a direct chat's hidden recipient entry, a group
    // sender's conversation-list entry is visible from the start (§4.9).
    let bob_req = ChatRequest {
        conversation_id: Some(group_id.to_owned()),
        chat_type: ChatType::Group,
        recv_id: group_id.to_owned(),
        msg: ChatMsgBody {
            m_type: 1,
            content: "hi back".to_owned(),
        },
        client_msg_id: Some("g-2".to_owned()),
    };
    bob.send(&Message::data_frame(
        "conversation.chat",
        "bob",
        serde_json::to_value(bob_req).unwrap(),
    ))
    .await;
    carol.recv().await.expect("carol should receive bob's push too");

    let bob_list = chat_storage::user_conversations::find_by_user_id(&gw.pool, "bob")
        .await
        .unwrap();
    let bob_entry = bob_list
        .get(group_id)
        .expect("bob's own group send must create his conversation-list entry");
    assert!(
        bob_entry.is_show,
        "a group sender's own entry is visible from the start, unlike a direct chat's hidden recipient"
    );
}
