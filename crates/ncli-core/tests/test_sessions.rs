mod common;

use common::{Harness, quiet_prefs};
use ncli_core::document::Node;
use ncli_core::lock::{Datastore, LockState};
use ncli_core::session::{CommandMode, ConnectionState, LockOutcome, SessionPrefs};
use ncli_core::transport::{Capabilities, TransportEvent, capability};
use ncli_core::ClientEvent;
use std::time::Duration;

fn running_and_candidate() -> Capabilities {
    Capabilities::default()
        .with_uri(capability::BASE)
        .with_uri(capability::CANDIDATE)
}

#[test]
fn test_connect_reaches_connected_idle() {
    let mut h = Harness::new(running_and_candidate(), quiet_prefs());
    h.connect();

    let session = h.ctx.current_session();
    assert_eq!(session.connection_state(), ConnectionState::ConnectedIdle);
    assert_eq!(session.mode(), Some(CommandMode::Normal));
    assert!(session.capabilities.has_candidate());
    let events = h.ctx.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, ClientEvent::Connected { session, .. } if session == "default")));
    assert!(h.ctx.is_idle());
}

#[test]
fn test_autoconfig_fills_shadow_config() {
    let prefs = SessionPrefs {
        autoconfig: true,
        ..quiet_prefs()
    };
    let mut h = Harness::new(running_and_candidate(), prefs);
    h.connect();

    let get_config = h.transport.last_sent();
    assert_eq!(get_config.request.name, "get-config");
    assert!(get_config.request.find_path(&["source", "running"]).is_some());
    let session = h.ctx.current_session();
    assert_eq!(session.mode(), Some(CommandMode::AutoConfig));
    assert_eq!(session.connection_state(), ConnectionState::ConnectedWaitReply);

    // nothing else goes out while the reply is outstanding
    h.ctx.pump();
    assert_eq!(h.transport.sent().len(), 1);
    assert_eq!(h.ctx.current_session().mode(), Some(CommandMode::AutoConfig));

    let data = Node::new("data").with_child(Node::leaf("hostname", "r1"));
    h.transport.reply_data(&get_config, data.clone());
    h.ctx.pump();

    let session = h.ctx.current_session();
    assert_eq!(session.shadow_config.as_ref(), Some(&data));
    assert!(!session.config_dirty);
    assert_eq!(session.mode(), Some(CommandMode::Normal));
}

#[test]
fn test_config_change_notification_refreshes_shadow_config() {
    let prefs = SessionPrefs {
        autoconfig: true,
        ..quiet_prefs()
    };
    let mut h = Harness::new(running_and_candidate(), prefs);
    h.connect();
    let first = h.transport.last_sent();
    h.transport
        .reply_data(&first, Node::new("data").with_child(Node::leaf("hostname", "r1")));
    h.ctx.pump();

    let notification = Node::new("notification")
        .with_child(Node::leaf("eventTime", "2024-01-01T00:00:00Z"))
        .with_child(Node::new("netconf-config-change"));
    h.transport.push_event(h.session_id(), TransportEvent::Notification(notification));
    h.ctx.pump();

    let refresh = h.transport.last_sent();
    assert_ne!(refresh.message_id, first.message_id);
    assert_eq!(refresh.request.name, "get-config");
    assert!(h.ctx.current_session().config_dirty);

    h.transport
        .reply_data(&refresh, Node::new("data").with_child(Node::leaf("hostname", "r2")));
    h.ctx.pump();
    let session = h.ctx.current_session();
    assert!(!session.config_dirty);
    assert_eq!(
        session
            .shadow_config
            .as_ref()
            .and_then(|c| c.child("hostname"))
            .and_then(Node::text),
        Some("r2")
    );
}

#[test]
fn test_lock_denied_until_timeout_releases_running() {
    let mut h = Harness::new(running_and_candidate(), quiet_prefs());
    h.connect();

    h.line("get-locks lock-timeout=5 retry-interval=1").unwrap();
    let lock_running = h.transport.last_sent();
    assert_eq!(lock_running.request.name, "lock");
    assert!(lock_running.request.find_path(&["target", "running"]).is_some());
    assert_eq!(h.ctx.current_session().mode(), Some(CommandMode::AutoLock));

    h.transport.reply_ok(&lock_running);
    h.ctx.pump();
    let lock_candidate = h.transport.last_sent();
    assert!(lock_candidate.request.find_path(&["target", "candidate"]).is_some());

    // first denial, then two retries after the retry interval
    h.transport.reply_error(&lock_candidate, "lock-denied");
    h.ctx.pump();
    assert_eq!(h.transport.sent().len(), 2, "retry waits for the interval");

    h.clock.advance(Duration::from_secs(1));
    h.ctx.pump();
    let retry1 = h.transport.last_sent();
    assert_eq!(retry1.request.name, "lock");
    h.transport.reply_error(&retry1, "lock-denied");
    h.ctx.pump();

    h.clock.advance(Duration::from_secs(1));
    h.ctx.pump();
    let retry2 = h.transport.last_sent();
    assert!(retry2.request.find_path(&["target", "candidate"]).is_some());

    // the third denial lands after the lock timeout
    h.clock.advance(Duration::from_secs(4));
    h.transport.reply_error(&retry2, "lock-denied");
    h.ctx.pump();

    let unlock = h.transport.last_sent();
    assert_eq!(unlock.request.name, "unlock");
    assert!(unlock.request.find_path(&["target", "running"]).is_some());
    assert_eq!(h.ctx.current_session().mode(), Some(CommandMode::AutoUnlock));

    h.transport.reply_ok(&unlock);
    h.ctx.pump();

    let session = h.ctx.current_session();
    assert_eq!(session.mode(), Some(CommandMode::Normal));
    assert_eq!(session.last_lock_result, Some(LockOutcome::TimedOut));
    assert_eq!(session.locks.record(Datastore::Running).state, LockState::Released);
    assert!(!session.locks.is_active());
}

#[test]
fn test_get_locks_success_then_release() {
    let mut h = Harness::new(running_and_candidate(), quiet_prefs());
    h.connect();

    h.line("get-locks").unwrap();
    let first = h.transport.last_sent();
    h.transport.reply_ok(&first);
    h.ctx.pump();
    let second = h.transport.last_sent();
    h.transport.reply_ok(&second);
    h.ctx.pump();

    let session = h.ctx.current_session();
    assert_eq!(session.last_lock_result, Some(LockOutcome::Acquired));
    assert_eq!(session.mode(), Some(CommandMode::Normal));
    assert!(session.locks.is_active());
    for ds in [Datastore::Running, Datastore::Candidate] {
        assert_eq!(session.locks.record(ds).state, LockState::Active);
    }

    h.line("release-locks").unwrap();
    for _ in 0..2 {
        let unlock = h.transport.last_sent();
        assert_eq!(unlock.request.name, "unlock");
        h.transport.reply_ok(&unlock);
        h.ctx.pump();
    }
    let session = h.ctx.current_session();
    assert!(!session.locks.is_active());
    for ds in [Datastore::Running, Datastore::Candidate] {
        assert_eq!(session.locks.record(ds).state, LockState::Released);
    }
    assert!(h.line("release-locks").is_err());
}

#[test]
fn test_candidate_hard_error_discards_then_releases() {
    let mut h = Harness::new(running_and_candidate(), quiet_prefs());
    h.connect();

    h.line("get-locks").unwrap();
    let running = h.transport.last_sent();
    h.transport.reply_ok(&running);
    h.ctx.pump();
    let candidate = h.transport.last_sent();
    h.transport.reply_error(&candidate, "in-use");
    h.ctx.pump();

    let discard = h.transport.last_sent();
    assert_eq!(discard.request.name, "discard-changes");
    assert_eq!(h.ctx.current_session().mode(), Some(CommandMode::AutoDiscard));
    h.transport.reply_ok(&discard);
    h.ctx.pump();

    let unlock = h.transport.last_sent();
    assert_eq!(unlock.request.name, "unlock");
    h.transport.reply_ok(&unlock);
    h.ctx.pump();

    let session = h.ctx.current_session();
    assert_eq!(session.last_lock_result, Some(LockOutcome::Failed));
    assert_eq!(session.locks.record(Datastore::Running).state, LockState::Released);
    assert_eq!(session.mode(), Some(CommandMode::Normal));
}

#[test]
fn test_reply_timeout_returns_to_connected_idle() {
    let mut h = Harness::new(running_and_candidate(), quiet_prefs());
    h.connect();

    let sent = h.line("get").unwrap();
    assert!(sent.is_some());
    assert!(!h.ctx.wants_user_input());

    h.clock.advance(Duration::from_secs(31));
    h.ctx.pump();

    let session = h.ctx.current_session();
    assert_eq!(session.connection_state(), ConnectionState::ConnectedIdle);
    assert_eq!(h.ctx.in_flight(), 0);
    assert!(h.ctx.wants_user_input());
}

#[test]
fn test_close_session_returns_to_idle() {
    let mut h = Harness::new(running_and_candidate(), quiet_prefs());
    h.connect();

    h.line("close-session").unwrap();
    assert_eq!(
        h.ctx.current_session().connection_state(),
        ConnectionState::CloseWait
    );
    let close = h.transport.last_sent();
    h.transport.reply_ok(&close);
    h.ctx.pump();

    assert_eq!(h.ctx.current_session().connection_state(), ConnectionState::Idle);
    assert_eq!(h.transport.disconnected(), vec![h.session_id()]);
}

#[test]
fn test_reply_for_unknown_message_is_dropped() {
    let mut h = Harness::new(running_and_candidate(), quiet_prefs());
    h.connect();
    h.transport.push_event(
        h.session_id(),
        TransportEvent::Reply {
            message_id: 999,
            result: Ok(common::ok_reply()),
        },
    );
    h.ctx.pump();
    assert_eq!(
        h.ctx.current_session().connection_state(),
        ConnectionState::ConnectedIdle
    );
}

#[test]
fn test_interrupt_drops_the_late_reply() {
    let mut h = Harness::new(running_and_candidate(), quiet_prefs());
    h.connect();
    h.line("get").unwrap();
    let get = h.transport.last_sent();

    h.ctx.interrupt();
    assert_eq!(
        h.ctx.current_session().connection_state(),
        ConnectionState::CancelWait
    );
    h.transport.reply_ok(&get);
    h.ctx.pump();
    assert_eq!(
        h.ctx.current_session().connection_state(),
        ConnectionState::ConnectedIdle
    );
}

#[test]
fn test_save_on_candidate_with_startup_commits_then_copies() {
    let caps = running_and_candidate().with_uri(capability::STARTUP);
    let mut h = Harness::new(caps, quiet_prefs());
    h.connect();

    h.line("save").unwrap();
    let commit = h.transport.last_sent();
    assert_eq!(commit.request.name, "commit");
    assert_eq!(h.ctx.current_session().mode(), Some(CommandMode::Save));

    h.transport.reply_ok(&commit);
    h.ctx.pump();
    let copy = h.transport.last_sent();
    assert_eq!(copy.request.name, "copy-config");
    assert!(copy.request.find_path(&["target", "startup"]).is_some());
    assert!(copy.request.find_path(&["source", "running"]).is_some());

    h.transport.reply_ok(&copy);
    h.ctx.pump();
    assert_eq!(h.ctx.current_session().mode(), Some(CommandMode::Normal));
}

#[test]
fn test_auto_test_runs_iterations_then_stops() {
    let caps = Capabilities::default().with_uri(capability::WRITABLE_RUNNING);
    let mut h = Harness::new(caps, quiet_prefs());
    h.connect();

    h.line("auto-test target=/system/contact iterations=2").unwrap();
    for _ in 0..2 {
        let edit = h.transport.last_sent();
        assert_eq!(edit.request.name, "edit-config");
        assert!(edit.request.find_path(&["target", "running"]).is_some());
        assert!(edit
            .request
            .find_path(&["config", "system", "contact"])
            .and_then(Node::text)
            .is_some());
        assert_eq!(h.ctx.current_session().mode(), Some(CommandMode::AutoTest));
        h.transport.reply_ok(&edit);
        h.ctx.pump();
    }
    let session = h.ctx.current_session();
    assert_eq!(session.mode(), Some(CommandMode::Normal));
    assert!(session.autotest.is_none());
    assert_eq!(h.transport.sent_names().iter().filter(|n| *n == "edit-config").count(), 2);
}

#[test]
fn test_peer_close_resets_session() {
    let mut h = Harness::new(running_and_candidate(), quiet_prefs());
    h.connect();
    h.line("get").unwrap();
    h.transport.push_event(
        h.session_id(),
        TransportEvent::Closed {
            reason: "connection reset".to_string(),
        },
    );
    h.ctx.pump();
    assert_eq!(h.ctx.current_session().connection_state(), ConnectionState::Idle);
    assert_eq!(h.ctx.in_flight(), 0);
}

fn config_change() -> TransportEvent {
    TransportEvent::Notification(
        Node::new("notification")
            .with_child(Node::leaf("eventTime", "2024-01-01T00:00:00Z"))
            .with_child(Node::new("netconf-config-change")),
    )
}

fn get_config_count(h: &Harness) -> usize {
    h.transport
        .sent_names()
        .iter()
        .filter(|n| n.as_str() == "get-config")
        .count()
}

#[test]
fn test_failed_config_refresh_is_not_resent() {
    let prefs = SessionPrefs {
        autoconfig: true,
        ..quiet_prefs()
    };
    let mut h = Harness::new(running_and_candidate(), prefs);
    h.connect();
    let first = h.transport.last_sent();
    h.transport.reply_data(&first, Node::new("data"));
    h.ctx.pump();

    h.transport.push_event(h.session_id(), config_change());
    h.ctx.pump();
    let refresh = h.transport.last_sent();
    assert_eq!(refresh.request.name, "get-config");
    let sent_before = get_config_count(&h);

    h.transport.reply_error(&refresh, "access-denied");
    h.ctx.pump();
    h.ctx.pump();

    assert_eq!(get_config_count(&h), sent_before);
    let session = h.ctx.current_session();
    assert!(!session.config_dirty);
    assert_eq!(session.connection_state(), ConnectionState::ConnectedIdle);
    assert!(h.ctx.wants_user_input());

    // the next change notification refreshes again
    h.transport.push_event(h.session_id(), config_change());
    h.ctx.pump();
    assert_eq!(get_config_count(&h), sent_before + 1);
}

#[test]
fn test_config_refresh_timeout_clears_dirty_flag() {
    let prefs = SessionPrefs {
        autoconfig: true,
        ..quiet_prefs()
    };
    let mut h = Harness::new(running_and_candidate(), prefs);
    h.connect();
    let first = h.transport.last_sent();
    h.transport.reply_data(&first, Node::new("data"));
    h.ctx.pump();

    h.transport.push_event(h.session_id(), config_change());
    h.ctx.pump();
    let sent_before = get_config_count(&h);

    h.clock.advance(Duration::from_secs(31));
    h.ctx.pump();

    let session = h.ctx.current_session();
    assert!(!session.config_dirty);
    assert_eq!(session.mode(), Some(CommandMode::Normal));
    assert_eq!(get_config_count(&h), sent_before);
    assert_eq!(h.ctx.in_flight(), 0);
}

#[test]
fn test_reply_routed_to_wrong_session_is_dropped() {
    let mut h = Harness::new(running_and_candidate(), quiet_prefs());
    h.connect();
    h.line("session add=lab").unwrap();
    let lab = h.ctx.session_by_name("lab").map(|s| s.id).unwrap();

    h.line("get").unwrap();
    let get = h.transport.last_sent();
    h.transport.push_event(
        lab,
        TransportEvent::Reply {
            message_id: get.message_id,
            result: Ok(common::ok_reply()),
        },
    );
    h.ctx.pump();
    assert_eq!(h.ctx.in_flight(), 1);
    assert_eq!(
        h.ctx.current_session().connection_state(),
        ConnectionState::ConnectedWaitReply
    );

    h.transport.reply_ok(&get);
    h.ctx.pump();
    assert_eq!(h.ctx.in_flight(), 0);
    assert_eq!(
        h.ctx.current_session().connection_state(),
        ConnectionState::ConnectedIdle
    );
}

#[test]
fn test_lock_failure_without_cleanup_sends_no_unlock() {
    let mut h = Harness::new(running_and_candidate(), quiet_prefs());
    h.connect();

    h.line("get-locks cleanup=false").unwrap();
    let running = h.transport.last_sent();
    h.transport.reply_ok(&running);
    h.ctx.pump();
    let candidate = h.transport.last_sent();
    h.transport.reply_error(&candidate, "in-use");
    h.ctx.pump();
    let discard = h.transport.last_sent();
    assert_eq!(discard.request.name, "discard-changes");
    h.transport.reply_ok(&discard);
    h.ctx.pump();

    assert!(!h.transport.sent_names().iter().any(|n| n == "unlock"));
    let session = h.ctx.current_session();
    assert_eq!(session.last_lock_result, Some(LockOutcome::Failed));
    assert_eq!(session.mode(), Some(CommandMode::Normal));
    assert!(!session.locks.is_active());
    for ds in [Datastore::Running, Datastore::Candidate] {
        assert_eq!(session.locks.record(ds).state, LockState::Idle);
    }
    assert!(h.line("release-locks").is_err());
}
