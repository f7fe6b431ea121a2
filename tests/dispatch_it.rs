mod common;

use common::*;
use std::sync::Arc;
use ticket_dispatch::code::derive;
use ticket_dispatch::db::RecipientStore;
use ticket_dispatch::dispatch::{DispatchError, DispatchOutcome, Dispatcher};
use ticket_dispatch::model::FailureKind;

async fn dispatcher(db: &TestDb, transport: &RecordingTransport) -> (Arc<dyn RecipientStore>, Dispatcher) {
    dispatcher_with(db, transport, NAME_TEMPLATE).await
}

async fn dispatcher_with(
    db: &TestDb,
    transport: &RecordingTransport,
    template: &str,
) -> (Arc<dyn RecipientStore>, Dispatcher) {
    let store: Arc<dyn RecipientStore> = Arc::new(db.store().await);
    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        composer(template),
        Arc::new(transport.clone()),
    );
    (store, dispatcher)
}

#[tokio::test]
async fn individual_inserts_new_recipient() {
    let db = TestDb::new().await;
    let transport = RecordingTransport::default();
    let (store, dispatcher) = dispatcher(&db, &transport).await;

    let report = dispatcher
        .dispatch_individual("Dana", "dana@example.com")
        .await;
    assert!(report.is_sent());
    match report.outcome {
        DispatchOutcome::Sent { code } => assert_eq!(code, derive("dana@example.com")),
        other => panic!("unexpected outcome {other:?}"),
    }
    store.close().await;

    let rows = db.rows().await;
    assert_eq!(
        rows,
        vec![(
            "dana@example.com".to_string(),
            Some(derive("dana@example.com").into_string()),
            Some("Mail Sent".to_string()),
        )]
    );
    assert_eq!(
        transport.sent().await,
        vec![("dana@example.com".to_string(), "Ticket_Dana.png".to_string())]
    );
}

#[tokio::test]
async fn individual_new_recipient_renders_full_templates() {
    for template in [FULL_TEMPLATE, SHIPPED_TEMPLATE] {
        let db = TestDb::new().await;
        let transport = RecordingTransport::default();
        let (store, dispatcher) = dispatcher_with(&db, &transport, template).await;

        // txn_id stays NULL for a row created from a name and an email.
        let report = dispatcher
            .dispatch_individual("Dana", "dana@example.com")
            .await;
        match &report.outcome {
            DispatchOutcome::Sent { code } => assert_eq!(code, &derive("dana@example.com")),
            DispatchOutcome::Failed(err) => panic!("individual dispatch failed: {err}"),
        }
        store.close().await;

        let rows = db.rows().await;
        assert_eq!(rows[0].2.as_deref(), Some("Mail Sent"));
        assert_eq!(transport.sent().await.len(), 1);
    }
}

#[tokio::test]
async fn individual_sends_row_with_null_mapped_column() {
    let db = TestDb::new().await;
    db.seed(&[("Gil", "gil@example.com", None)]).await;
    let transport = RecordingTransport::default();
    let (store, dispatcher) = dispatcher_with(&db, &transport, FULL_TEMPLATE).await;

    let report = dispatcher.dispatch_individual("Gil", "gil@example.com").await;
    assert!(report.is_sent());
    store.close().await;
    assert_eq!(db.rows().await[0].2.as_deref(), Some("Mail Sent"));
}

#[tokio::test]
async fn individual_resends_existing_row() {
    let db = TestDb::new().await;
    db.seed(&[("Eve", "eve@example.com", Some("T1"))]).await;
    let transport = RecordingTransport::default();
    let (store, dispatcher) = dispatcher(&db, &transport).await;

    // The stored name wins over the one passed in.
    let report = dispatcher.dispatch_individual("Someone", "eve@example.com").await;
    assert!(report.is_sent());
    let report = dispatcher.dispatch_individual("Someone", "eve@example.com").await;
    assert!(report.is_sent());
    store.close().await;

    let rows = db.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].2.as_deref(), Some("Mail Sent"));
    let sent = transport.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].1, "Ticket_Eve.png");
}

#[tokio::test]
async fn dispatch_is_idempotent_per_recipient() {
    let db = TestDb::new().await;
    db.seed(&[("Fay", "fay@example.com", Some("T1"))]).await;
    let transport = RecordingTransport::default();
    let (store, dispatcher) = dispatcher(&db, &transport).await;

    let recipient = store.find_by_email("fay@example.com").await.unwrap().unwrap();
    let first = dispatcher.dispatch(recipient.clone()).await;
    let second = dispatcher.dispatch(recipient).await;
    store.close().await;

    let code = |outcome: DispatchOutcome| match outcome {
        DispatchOutcome::Sent { code } => code,
        DispatchOutcome::Failed(err) => panic!("failed: {err}"),
    };
    assert_eq!(code(first.outcome), code(second.outcome));
    assert_eq!(db.rows().await[0].1, Some(derive("fay@example.com").into_string()));
}

#[tokio::test]
async fn missing_row_is_store_failure() {
    let db = TestDb::new().await;
    let transport = RecordingTransport::default();
    let (store, dispatcher) = dispatcher(&db, &transport).await;

    let ghost = ticket_dispatch::model::Recipient {
        name: "Ghost".into(),
        email: "ghost@example.com".into(),
        fields: Default::default(),
        ticket_code: None,
        status: None,
    };
    let report = dispatcher.dispatch(ghost).await;
    store.close().await;

    match report.outcome {
        DispatchOutcome::Failed(err) => {
            assert_eq!(err.kind(), FailureKind::Store);
            assert!(matches!(err, DispatchError::Store(_)));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(transport.sent().await.is_empty());
}
