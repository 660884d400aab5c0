//! End-to-end flow over a real database: conversation lifecycle, delivery
//! status, rename requests, live fan-out, and the delete cascade.

use std::sync::Arc;

use parley_core::{
    ConversationType, DeliveryState, DeliveryStatus, Error, Messaging, MessagingConfig,
    MessageContent, RequestStatus, StaticDirectory,
};
use tempfile::tempdir;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn connect(base: &std::path::Path) -> Messaging {
    let directory = Arc::new(
        StaticDirectory::new()
            .with_user("a", "Alice")
            .with_user("b", "Bob"),
    );
    Messaging::connect(MessagingConfig::with_base_dir(base), directory)
        .await
        .unwrap()
}

#[tokio::test]
async fn message_lifecycle_with_live_fanout() {
    init_tracing();
    let dir = tempdir().unwrap();
    let core = connect(dir.path()).await;

    // Alice sends from her phone: her laptop and Bob should see the event,
    // the sending session itself should not.
    let mut alice_phone = core.relay.register("a");
    let mut alice_laptop = core.relay.register("a");
    let mut bob_session = core.relay.register("b");

    core.conversations
        .create(
            "c1",
            vec!["a".into(), "b".into()],
            "Alice, Bob",
            "a",
            ConversationType::Direct,
        )
        .await
        .unwrap();

    let message = core
        .messages
        .create(
            "m1",
            "c1",
            "a",
            vec!["b".into()],
            MessageContent::text("hello bob"),
            vec![DeliveryStatus::sent("b")],
            Some(alice_phone.id),
        )
        .await
        .unwrap();
    assert_eq!(message.status, vec![DeliveryStatus::sent("b")]);

    let raw = bob_session.events.recv().await.unwrap();
    let event: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(event["type"], "message");
    assert_eq!(event["payload"]["message_id"], "m1");
    assert!(alice_laptop.events.recv().await.is_some());
    assert!(alice_phone.events.try_recv().is_err());

    // Bob acknowledges; Alice's sessions get the status event, Bob's not.
    let seen = core
        .messages
        .mark_seen("c1", "b", Some(bob_session.id))
        .await
        .unwrap();
    assert_eq!(seen.updated.len(), 1);
    assert_eq!(seen.updated[0].status[0].state, DeliveryState::Seen);

    let raw = alice_phone.events.recv().await.unwrap();
    let event: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(event["type"], "status");
    assert_eq!(event["payload"]["recipient_id"], "b");
    assert!(bob_session.events.try_recv().is_err());

    // Bob leaves: membership event, creator unchanged, title rewritten.
    let updated = core
        .conversations
        .remove_participant("c1", "b", Some(bob_session.id))
        .await
        .unwrap();
    assert_eq!(updated.participants, vec!["a".to_string()]);
    assert_eq!(updated.created_by, "a");
    assert_eq!(updated.title, "Alice");

    let raw = alice_phone.events.recv().await.unwrap();
    let event: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(event["type"], "membership");
    assert_eq!(event["payload"]["removed"], "b");

    // Alice is now the sole participant and cannot be removed.
    let err = core
        .conversations
        .remove_participant("c1", "a", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test]
async fn rename_request_round_trip() {
    init_tracing();
    let dir = tempdir().unwrap();
    let core = connect(dir.path()).await;

    core.conversations
        .create(
            "c1",
            vec!["a".into(), "b".into()],
            "Alice, Bob",
            "a",
            ConversationType::Group,
        )
        .await
        .unwrap();

    core.requests
        .create("r1", "c1", "b", "Alice, Bob", "The Duo")
        .await
        .unwrap();

    // Visible to the creator, not to the requester-as-admin.
    assert_eq!(core.requests.list_for_admin("a").await.unwrap().len(), 1);
    assert!(core.requests.list_for_admin("b").await.unwrap().is_empty());

    let approved = core
        .requests
        .update_status("r1", RequestStatus::Approved)
        .await
        .unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);

    let renamed = core.conversations.rename("c1", "The Duo").await.unwrap();
    assert_eq!(renamed.title, "The Duo");
}

#[tokio::test]
async fn delete_cascades_to_messages() {
    init_tracing();
    let dir = tempdir().unwrap();
    let core = connect(dir.path()).await;

    core.conversations
        .create(
            "c1",
            vec!["a".into(), "b".into()],
            "Alice, Bob",
            "a",
            ConversationType::Direct,
        )
        .await
        .unwrap();
    for i in 0..3 {
        core.messages
            .create(
                &format!("m{i}"),
                "c1",
                "a",
                vec!["b".into()],
                MessageContent::text(format!("msg {i}")),
                vec![DeliveryStatus::sent("b")],
                None,
            )
            .await
            .unwrap();
    }

    assert_eq!(core.delete_conversation("c1").await.unwrap(), 3);
    assert!(matches!(
        core.conversations.get("c1").await.unwrap_err(),
        Error::NotFound(_)
    ));
    assert!(core.messages.last_message("c1").await.unwrap().is_none());

    // Deleting again reports the missing conversation.
    assert!(matches!(
        core.delete_conversation("c1").await.unwrap_err(),
        Error::NotFound(_)
    ));
}

#[tokio::test]
async fn state_survives_reconnect() {
    init_tracing();
    let dir = tempdir().unwrap();

    {
        let core = connect(dir.path()).await;
        core.conversations
            .create(
                "c1",
                vec!["a".into(), "b".into()],
                "Alice, Bob",
                "a",
                ConversationType::Direct,
            )
            .await
            .unwrap();
        core.messages
            .create(
                "m1",
                "c1",
                "a",
                vec!["b".into()],
                MessageContent::text("durable"),
                vec![DeliveryStatus::sent("b")],
                None,
            )
            .await
            .unwrap();
    }

    // A fresh core over the same database sees the committed state; a session
    // that was offline at publish time reconciles by querying the store.
    let core = connect(dir.path()).await;
    let unread = core.messages.unread_for_recipient("c1", "b").await.unwrap();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].content.original_content, "durable");
}
