use conclave_core::error::CoreError;
use conclave_core::events::EventBus;
use conclave_core::{gate, message, participant, session, signaling, AppConfig};
use conclave_db::messages::AppendOutcome;
use conclave_db::sessions::SessionFilter;
use conclave_db::DbPool;
use conclave_models::gateway::{
    EVENT_MESSAGE_CREATE, EVENT_PARTICIPANT_UPDATED, EVENT_SESSION_ENDED,
};
use tempfile::TempDir;

struct TestDb {
    pool: DbPool,
    _dir: TempDir,
}

// A file-backed database so multiple pool connections share state; the
// concurrency tests below need real writer contention.
async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!(
        "sqlite://{}/conclave-test.db?mode=rwc",
        dir.path().display()
    );
    let pool = conclave_db::create_pool(&url, 5).await.expect("pool");
    conclave_db::run_migrations(&pool).await.expect("migrations");
    TestDb { pool, _dir: dir }
}

async fn make_user(pool: &DbPool, name: &str) -> i64 {
    let id = conclave_util::snowflake::generate(1);
    conclave_db::users::create_user(pool, id, name, &format!("{name}@example.com"), "hash")
        .await
        .expect("create user");
    id
}

fn test_config() -> AppConfig {
    AppConfig {
        jwt_secret: "test-secret".into(),
        jwt_expiry_seconds: 3600,
        registration_enabled: true,
        max_attachment_size: 1024 * 1024,
    }
}

#[tokio::test]
async fn create_session_seeds_active_creator() {
    let db = test_db().await;
    let creator = make_user(&db.pool, "creator1").await;

    let (session, participant) = session::create_session(
        &db.pool,
        creator,
        "Tuesday circle",
        Some("weekly check-in"),
        "message",
        4,
    )
    .await
    .expect("create");

    assert!(session.is_active);
    assert_eq!(session.creator_id, creator);
    assert_eq!(participant.role, "creator");
    assert_eq!(participant.status, "active");
    assert!(gate::can_subscribe(&db.pool, creator, session.id)
        .await
        .expect("gate"));
}

#[tokio::test]
async fn create_session_rejects_bad_input() {
    let db = test_db().await;
    let creator = make_user(&db.pool, "creator2").await;

    let err = session::create_session(&db.pool, creator, "Circle", None, "video", 4)
        .await
        .expect_err("bad mode");
    assert!(matches!(err, CoreError::Validation(_)));

    let err = session::create_session(&db.pool, creator, "Circle", None, "audio", 0)
        .await
        .expect_err("zero capacity");
    assert!(matches!(err, CoreError::Validation(_)));
}

#[tokio::test]
async fn invite_accept_flow_flips_gate() {
    let db = test_db().await;
    let events = EventBus::default();
    let creator = make_user(&db.pool, "host1").await;
    let guest = make_user(&db.pool, "guest1").await;
    let (session, _) =
        session::create_session(&db.pool, creator, "Circle", None, "message", 4)
            .await
            .expect("create");

    let invited = participant::invite(&db.pool, &events, session.id, creator, guest)
        .await
        .expect("invite");
    assert_eq!(invited.status, "invited");
    assert!(!gate::can_subscribe(&db.pool, guest, session.id)
        .await
        .expect("gate"));

    let accepted = participant::accept(&db.pool, &events, session.id, guest)
        .await
        .expect("accept");
    assert_eq!(accepted.status, "active");
    assert!(accepted.joined_at.is_some());
    assert!(gate::can_subscribe(&db.pool, guest, session.id)
        .await
        .expect("gate"));
}

#[tokio::test]
async fn invite_requires_active_membership() {
    let db = test_db().await;
    let events = EventBus::default();
    let creator = make_user(&db.pool, "host2").await;
    let outsider = make_user(&db.pool, "outsider2").await;
    let guest = make_user(&db.pool, "guest2").await;
    let (session, _) =
        session::create_session(&db.pool, creator, "Circle", None, "message", 4)
            .await
            .expect("create");

    let err = participant::invite(&db.pool, &events, session.id, outsider, guest)
        .await
        .expect_err("outsider cannot invite");
    assert!(matches!(err, CoreError::Forbidden));
}

#[tokio::test]
async fn concurrent_accepts_respect_capacity() {
    let db = test_db().await;
    let events = EventBus::default();
    let creator = make_user(&db.pool, "host3").await;
    let alice = make_user(&db.pool, "alice3").await;
    let bob = make_user(&db.pool, "bob3").await;

    // Capacity 2: the creator holds one slot, one remains.
    let (session, _) = session::create_session(&db.pool, creator, "Circle", None, "message", 2)
        .await
        .expect("create");
    participant::invite(&db.pool, &events, session.id, creator, alice)
        .await
        .expect("invite alice");
    participant::invite(&db.pool, &events, session.id, creator, bob)
        .await
        .expect("invite bob");

    let (pool_a, events_a) = (db.pool.clone(), events.clone());
    let (pool_b, events_b) = (db.pool.clone(), events.clone());
    let sid = session.id;
    let a = tokio::spawn(async move { participant::accept(&pool_a, &events_a, sid, alice).await });
    let b = tokio::spawn(async move { participant::accept(&pool_b, &events_b, sid, bob).await });
    let (a, b) = (a.await.expect("join a"), b.await.expect("join b"));

    let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one accept may win the last slot");
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(loser, Err(CoreError::CapacityExceeded)));

    let active = conclave_db::participants::count_active_participants(&db.pool, session.id)
        .await
        .expect("count");
    assert_eq!(active, 2);
}

#[tokio::test]
async fn request_join_is_idempotent_and_approvable() {
    let db = test_db().await;
    let events = EventBus::default();
    let creator = make_user(&db.pool, "host4").await;
    let joiner = make_user(&db.pool, "joiner4").await;
    let (session, _) =
        session::create_session(&db.pool, creator, "Circle", None, "message", 4)
            .await
            .expect("create");

    let first = participant::request_join(&db.pool, &events, session.id, joiner)
        .await
        .expect("request");
    assert_eq!(first.status, "pending");
    let second = participant::request_join(&db.pool, &events, session.id, joiner)
        .await
        .expect("repeat request");
    assert_eq!(second.status, "pending");

    let all = participant::list_participants(&db.pool, session.id)
        .await
        .expect("list");
    assert_eq!(all.iter().filter(|p| p.user_id == joiner).count(), 1);

    // Only the creator may approve.
    let err = participant::approve(&db.pool, &events, session.id, joiner, joiner, false)
        .await
        .expect_err("self-approval");
    assert!(matches!(err, CoreError::Forbidden));

    let approved = participant::approve(&db.pool, &events, session.id, creator, joiner, false)
        .await
        .expect("approve");
    assert_eq!(approved.status, "active");
}

#[tokio::test]
async fn reject_marks_pending_removed() {
    let db = test_db().await;
    let events = EventBus::default();
    let creator = make_user(&db.pool, "host5").await;
    let joiner = make_user(&db.pool, "joiner5").await;
    let (session, _) =
        session::create_session(&db.pool, creator, "Circle", None, "message", 4)
            .await
            .expect("create");

    participant::request_join(&db.pool, &events, session.id, joiner)
        .await
        .expect("request");
    let rejected = participant::reject(&db.pool, &events, session.id, creator, joiner, false)
        .await
        .expect("reject");
    assert_eq!(rejected.status, "removed");
}

#[tokio::test]
async fn removal_revokes_gate_and_allows_readd() {
    let db = test_db().await;
    let events = EventBus::default();
    let creator = make_user(&db.pool, "host6").await;
    let guest = make_user(&db.pool, "guest6").await;
    let (session, _) =
        session::create_session(&db.pool, creator, "Circle", None, "message", 4)
            .await
            .expect("create");

    participant::invite(&db.pool, &events, session.id, creator, guest)
        .await
        .expect("invite");
    participant::accept(&db.pool, &events, session.id, guest)
        .await
        .expect("accept");

    let removed = participant::remove(&db.pool, &events, session.id, creator, guest, false)
        .await
        .expect("remove");
    assert_eq!(removed.status, "removed");
    assert!(!gate::can_subscribe(&db.pool, guest, session.id)
        .await
        .expect("gate"));

    // Removing again is a no-op, not an error.
    let again = participant::remove(&db.pool, &events, session.id, creator, guest, false)
        .await
        .expect("repeat remove");
    assert_eq!(again.status, "removed");

    // Kicked users cannot let themselves back in...
    let err = participant::request_join(&db.pool, &events, session.id, guest)
        .await
        .expect_err("removed cannot self-rejoin");
    assert!(matches!(err, CoreError::Forbidden));

    // ...but a fresh invite re-enters at invited.
    let readded = participant::invite(&db.pool, &events, session.id, creator, guest)
        .await
        .expect("readd");
    assert_eq!(readded.status, "invited");
}

#[tokio::test]
async fn leave_does_not_end_the_session() {
    let db = test_db().await;
    let events = EventBus::default();
    let creator = make_user(&db.pool, "host7").await;
    let (session, _) =
        session::create_session(&db.pool, creator, "Circle", None, "message", 4)
            .await
            .expect("create");

    let left = participant::leave(&db.pool, &events, session.id, creator)
        .await
        .expect("leave");
    assert_eq!(left.status, "removed");

    let current = session::get_session(&db.pool, session.id).await.expect("get");
    assert!(current.is_active, "creator departure leaves the session open");

    // The creator check is by creator_id, so a departed creator can still end it.
    let ended = session::end_session(&db.pool, &events, session.id, creator, false)
        .await
        .expect("end");
    assert!(!ended.is_active);
}

#[tokio::test]
async fn ended_session_refuses_writes_but_keeps_history() {
    let db = test_db().await;
    let events = EventBus::default();
    let config = test_config();
    let creator = make_user(&db.pool, "host8").await;
    let guest = make_user(&db.pool, "guest8").await;
    let stranger = make_user(&db.pool, "stranger8").await;
    let (session, _) = session::create_session(&db.pool, creator, "Circle", None, "message", 2)
        .await
        .expect("create");

    participant::invite(&db.pool, &events, session.id, creator, guest)
        .await
        .expect("invite");
    participant::accept(&db.pool, &events, session.id, guest)
        .await
        .expect("accept");
    message::append_message(
        &db.pool, &events, &config, session.id, guest, Some("hi"), "text", None,
    )
    .await
    .expect("send");

    let mut rx = events.subscribe();
    let err = session::end_session(&db.pool, &events, session.id, stranger, false)
        .await
        .expect_err("stranger cannot end");
    assert!(matches!(err, CoreError::Forbidden));

    session::end_session(&db.pool, &events, session.id, creator, false)
        .await
        .expect("end");
    let event = rx.try_recv().expect("session end event");
    assert_eq!(event.event_type, EVENT_SESSION_ENDED);

    // A second end is a quiet no-op: no second event.
    session::end_session(&db.pool, &events, session.id, creator, false)
        .await
        .expect("repeat end");
    assert!(rx.try_recv().is_err());

    let err = message::append_message(
        &db.pool, &events, &config, session.id, guest, Some("late"), "text", None,
    )
    .await
    .expect_err("append after end");
    assert!(matches!(err, CoreError::SessionEnded));

    let err = participant::invite(&db.pool, &events, session.id, creator, stranger)
        .await
        .expect_err("invite after end");
    assert!(matches!(err, CoreError::SessionEnded));

    // History survives the end.
    let history = message::list_messages(&db.pool, session.id, guest, None, 50)
        .await
        .expect("list");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content.as_deref(), Some("hi"));
}

#[tokio::test]
async fn participant_events_are_dispatched() {
    let db = test_db().await;
    let events = EventBus::default();
    let creator = make_user(&db.pool, "host9").await;
    let guest = make_user(&db.pool, "guest9").await;
    let (session, _) =
        session::create_session(&db.pool, creator, "Circle", None, "message", 4)
            .await
            .expect("create");

    let mut rx = events.subscribe();
    participant::invite(&db.pool, &events, session.id, creator, guest)
        .await
        .expect("invite");

    let broadcast = rx.try_recv().expect("channel event");
    assert_eq!(broadcast.event_type, EVENT_PARTICIPANT_UPDATED);
    assert_eq!(broadcast.session_id, Some(session.id));
    let targeted = rx.try_recv().expect("targeted invitee event");
    assert_eq!(targeted.target_user_ids.as_deref(), Some(&[guest][..]));
}

#[tokio::test]
async fn signaling_requires_audio_mode_and_active_peers() {
    let db = test_db().await;
    let events = EventBus::default();
    let creator = make_user(&db.pool, "host10").await;
    let peer = make_user(&db.pool, "peer10").await;

    let (text_session, _) =
        session::create_session(&db.pool, creator, "Text circle", None, "message", 4)
            .await
            .expect("create text");
    let err = signaling::relay(
        &db.pool,
        &events,
        text_session.id,
        creator,
        peer,
        serde_json::json!({"type": "offer"}),
    )
    .await
    .expect_err("text session cannot relay");
    assert!(matches!(err, CoreError::Forbidden));

    let (audio_session, _) =
        session::create_session(&db.pool, creator, "Audio circle", None, "audio", 4)
            .await
            .expect("create audio");
    participant::invite(&db.pool, &events, audio_session.id, creator, peer)
        .await
        .expect("invite");

    // Recipient not yet active.
    let err = signaling::relay(
        &db.pool,
        &events,
        audio_session.id,
        creator,
        peer,
        serde_json::json!({"type": "offer"}),
    )
    .await
    .expect_err("invited peer is not an active endpoint");
    assert!(matches!(err, CoreError::Forbidden));

    participant::accept(&db.pool, &events, audio_session.id, peer)
        .await
        .expect("accept");

    let mut rx = events.subscribe();
    signaling::relay(
        &db.pool,
        &events,
        audio_session.id,
        creator,
        peer,
        serde_json::json!({"type": "offer", "sdp": "v=0"}),
    )
    .await
    .expect("relay");
    let event = rx.try_recv().expect("signal event");
    assert_eq!(event.target_user_ids.as_deref(), Some(&[peer][..]));
    assert_eq!(event.payload["payload"]["type"], "offer");
}

#[tokio::test]
async fn session_listing_filters_and_paginates() {
    let db = test_db().await;
    let creator = make_user(&db.pool, "host11").await;
    let other = make_user(&db.pool, "other11").await;

    let mut ids = Vec::new();
    for i in 0..5 {
        let (s, _) = session::create_session(
            &db.pool,
            creator,
            &format!("Circle {i}"),
            None,
            "message",
            4,
        )
        .await
        .expect("create");
        ids.push(s.id);
    }
    let (other_session, _) =
        session::create_session(&db.pool, other, "Other circle", None, "audio", 4)
            .await
            .expect("create other");
    let events = EventBus::default();
    session::end_session(&db.pool, &events, ids[0], creator, false)
        .await
        .expect("end");

    let mine = session::list_sessions(
        &db.pool,
        SessionFilter {
            creator_id: Some(creator),
            ..Default::default()
        },
        None,
        50,
    )
    .await
    .expect("list mine");
    assert_eq!(mine.len(), 5);
    assert!(mine.windows(2).all(|w| w[0].id > w[1].id), "newest first");

    let active = session::list_sessions(
        &db.pool,
        SessionFilter {
            active_only: true,
            creator_id: Some(creator),
            ..Default::default()
        },
        None,
        50,
    )
    .await
    .expect("list active");
    assert_eq!(active.len(), 4);

    // Restartable cursor: page of 2, resume below the last seen id.
    let page1 = session::list_sessions(&db.pool, SessionFilter::default(), None, 2)
        .await
        .expect("page1");
    assert_eq!(page1.len(), 2);
    assert_eq!(page1[0].id, other_session.id);
    let page2 = session::list_sessions(
        &db.pool,
        SessionFilter::default(),
        Some(page1[1].id),
        10,
    )
    .await
    .expect("page2");
    assert_eq!(page2.len(), 4);
    assert!(page2[0].id < page1[1].id);
}

#[tokio::test]
async fn message_log_is_ordered_stable_and_gapped_by_moderation() {
    let db = test_db().await;
    let events = EventBus::default();
    let config = test_config();
    let creator = make_user(&db.pool, "host12").await;
    let (session, _) = session::create_session(&db.pool, creator, "Circle", None, "message", 4)
        .await
        .expect("create");

    let mut rx = events.subscribe();
    for i in 0..6 {
        message::append_message(
            &db.pool,
            &events,
            &config,
            session.id,
            creator,
            Some(&format!("msg {i}")),
            "text",
            None,
        )
        .await
        .expect("append");
        assert_eq!(rx.try_recv().expect("event").event_type, EVENT_MESSAGE_CREATE);
    }

    let first = message::list_messages(&db.pool, session.id, creator, None, 50)
        .await
        .expect("list");
    let second = message::list_messages(&db.pool, session.id, creator, None, 50)
        .await
        .expect("list again");
    assert_eq!(first.len(), 6);
    assert!(first.windows(2).all(|w| w[0].id < w[1].id));
    let ids: Vec<i64> = first.iter().map(|m| m.id).collect();
    assert_eq!(ids, second.iter().map(|m| m.id).collect::<Vec<_>>());

    // Cursor resume from the middle.
    let tail = message::list_messages(&db.pool, session.id, creator, Some(ids[2]), 50)
        .await
        .expect("tail");
    assert_eq!(tail.iter().map(|m| m.id).collect::<Vec<_>>(), ids[3..]);

    // Moderation delete leaves a gap.
    message::moderate_delete(&db.pool, &events, session.id, ids[1], creator, false)
        .await
        .expect("moderate");
    let after = message::list_messages(&db.pool, session.id, creator, None, 50)
        .await
        .expect("list after delete");
    assert_eq!(after.len(), 5);
    assert!(after.iter().all(|m| m.id != ids[1]));
}

#[tokio::test]
async fn concurrent_appends_yield_a_total_order() {
    let db = test_db().await;
    let events = EventBus::default();
    let config = test_config();
    let creator = make_user(&db.pool, "host13").await;
    let (session, _) = session::create_session(&db.pool, creator, "Circle", None, "message", 4)
        .await
        .expect("create");

    let mut handles = Vec::new();
    for i in 0..8 {
        let (pool, events, config) = (db.pool.clone(), events.clone(), config.clone());
        let sid = session.id;
        handles.push(tokio::spawn(async move {
            message::append_message(
                &pool,
                &events,
                &config,
                sid,
                creator,
                Some(&format!("racer {i}")),
                "text",
                None,
            )
            .await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("append");
    }

    let all = message::list_messages(&db.pool, session.id, creator, None, 50)
        .await
        .expect("list");
    assert_eq!(all.len(), 8);
    assert!(
        all.windows(2).all(|w| w[0].id < w[1].id),
        "no two messages share a position"
    );
}

#[tokio::test]
async fn attachment_metadata_is_validated() {
    let db = test_db().await;
    let events = EventBus::default();
    let config = test_config();
    let creator = make_user(&db.pool, "host14").await;
    let (session, _) = session::create_session(&db.pool, creator, "Circle", None, "message", 4)
        .await
        .expect("create");

    let oversized = conclave_models::message::AttachmentMeta {
        path: "uploads/big.ogg".into(),
        mime: "audio/ogg".into(),
        size: config.max_attachment_size + 1,
    };
    let err = message::append_message(
        &db.pool, &events, &config, session.id, creator, None, "audio", Some(&oversized),
    )
    .await
    .expect_err("oversized attachment");
    assert!(matches!(err, CoreError::Validation(_)));

    let ok = conclave_models::message::AttachmentMeta {
        path: "uploads/note.ogg".into(),
        mime: "audio/ogg".into(),
        size: 2048,
    };
    let row = message::append_message(
        &db.pool, &events, &config, session.id, creator, None, "audio", Some(&ok),
    )
    .await
    .expect("audio message");
    assert_eq!(row.attachment_path.as_deref(), Some("uploads/note.ogg"));
    assert_eq!(row.message_type, "audio");
}

// The liveness and membership guards live inside the insert's transaction,
// so a write committed by another connection between a caller's checks and
// the insert still wins: the append must observe it and refuse.
#[tokio::test]
async fn append_is_refused_at_the_insert_once_end_or_removal_commits() {
    let db = test_db().await;
    let events = EventBus::default();
    let creator = make_user(&db.pool, "host15").await;
    let guest = make_user(&db.pool, "guest15").await;
    let (session, _) = session::create_session(&db.pool, creator, "Circle", None, "message", 3)
        .await
        .expect("create");
    participant::invite(&db.pool, &events, session.id, creator, guest)
        .await
        .expect("invite");
    participant::accept(&db.pool, &events, session.id, guest)
        .await
        .expect("accept");

    // Removal of the sender committed by another writer.
    conclave_db::participants::mark_removed(&db.pool, session.id, guest, Some("active"))
        .await
        .expect("remove");
    let outcome = conclave_db::messages::append_message(
        &db.pool,
        conclave_util::snowflake::generate(1),
        session.id,
        guest,
        Some("after removal"),
        "text",
        None,
        None,
        None,
    )
    .await
    .expect("query");
    assert!(matches!(outcome, AppendOutcome::SenderNotActive));

    // End flip committed by another writer.
    conclave_db::sessions::end_session(&db.pool, session.id)
        .await
        .expect("end")
        .expect("was active");
    let outcome = conclave_db::messages::append_message(
        &db.pool,
        conclave_util::snowflake::generate(1),
        session.id,
        creator,
        Some("after end"),
        "text",
        None,
        None,
        None,
    )
    .await
    .expect("query");
    assert!(matches!(outcome, AppendOutcome::SessionEnded));

    // Neither refused append left a row in the log.
    let history = message::list_messages(&db.pool, session.id, creator, None, 50)
        .await
        .expect("list");
    assert!(history.is_empty());
}
