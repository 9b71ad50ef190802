use ncli_core::document::Node;
use ncli_core::lock::{Datastore, LockState};
use ncli_core::schema::BuiltinSchema;
use ncli_core::session::{CommandMode, LockOutcome, SessionPrefs};
use ncli_core::transport::{
    ConnectParams, LineOrigin, ManualClock, SessionId, Transport, TransportEvent,
};
use ncli_core::{ClientEvent, ServerContext};
use ncli_interaction::{DeviceProfile, LoopbackTransport, UNREACHABLE_HOST};
use std::time::Duration;

fn params(host: &str) -> ConnectParams {
    ConnectParams {
        host: host.to_string(),
        port: 830,
        ..ConnectParams::default()
    }
}

fn context(transport: &LoopbackTransport, prefs: SessionPrefs) -> (ServerContext, ManualClock) {
    let clock = ManualClock::new();
    let ctx = ServerContext::new(Box::new(transport.clone()), Box::new(BuiltinSchema::standard()))
        .with_clock(Box::new(clock.clone()))
        .with_defaults(prefs);
    (ctx, clock)
}

fn run(ctx: &mut ServerContext, line: &str) {
    ctx.handle_line(line, LineOrigin::User)
        .unwrap_or_else(|e| panic!("{line}: {e}"));
    ctx.pump();
}

#[test]
fn test_connect_then_get_config() {
    let mut transport = LoopbackTransport::default();
    let session = SessionId(1);
    transport.connect(session, &params("lab")).unwrap();

    assert_eq!(transport.poll_event(), Some((session, TransportEvent::Accepted)));
    let Some((_, TransportEvent::HelloComplete { capabilities })) = transport.poll_event() else {
        panic!("hello expected");
    };
    assert!(capabilities.has_candidate());

    let request = Node::new("get-config")
        .with_child(Node::new("source").with_child(Node::new("running")));
    let id = transport.send_request(session, &request).unwrap();
    let Some((_, TransportEvent::Reply { message_id, result })) = transport.poll_event() else {
        panic!("reply expected");
    };
    assert_eq!(message_id, id);
    let reply = result.unwrap();
    assert_eq!(
        reply.find_path(&["data", "system", "hostname"]).and_then(Node::text),
        Some("loopback")
    );
}

#[test]
fn test_unreachable_host_closes() {
    let mut transport = LoopbackTransport::default();
    transport.connect(SessionId(1), &params(UNREACHABLE_HOST)).unwrap();
    assert!(matches!(
        transport.poll_event(),
        Some((_, TransportEvent::Closed { .. }))
    ));
    assert!(transport.send_request(SessionId(1), &Node::new("get")).is_err());
}

#[test]
fn test_post_connect_loads_schema_and_shadow_config() {
    let transport = LoopbackTransport::default();
    let prefs = SessionPrefs {
        autoconfig: true,
        autonotif: true,
        echo_replies: false,
        ..SessionPrefs::default()
    };
    let (mut ctx, _clock) = context(&transport, prefs);

    run(&mut ctx, "connect host=lab.example.net");

    let session = ctx.current_session();
    assert!(session.phase.is_connected());
    assert_eq!(session.mode(), Some(CommandMode::Normal));
    assert!(session.autoload.retrieved.contains_key("acme-system"));
    assert_eq!(
        session
            .shadow_config
            .as_ref()
            .and_then(|c| c.find_path(&["system", "hostname"]))
            .and_then(Node::text),
        Some("loopback")
    );
    let handled = transport.with_device(|d| d.handled().to_vec()).unwrap();
    assert!(handled.contains(&"create-subscription".to_string()));
    assert!(ctx
        .drain_events()
        .iter()
        .any(|e| matches!(e, ClientEvent::Connected { .. })));
}

#[test]
fn test_apply_config_refreshes_shadow_through_notification() {
    let transport = LoopbackTransport::default();
    let prefs = SessionPrefs {
        autoconfig: true,
        autonotif: true,
        autoload: false,
        echo_replies: false,
        ..SessionPrefs::default()
    };
    let (mut ctx, _clock) = context(&transport, prefs);
    run(&mut ctx, "connect host=lab.example.net");

    run(
        &mut ctx,
        "$$cfg = [<config><system><hostname>edge9</hostname></system></config>]",
    );
    run(&mut ctx, "apply-config var=cfg");

    let handled = transport.with_device(|d| d.handled().to_vec()).unwrap();
    let tail: Vec<&str> = handled.iter().rev().take(4).rev().map(String::as_str).collect();
    assert_eq!(tail, ["edit-config", "commit", "copy-config", "get-config"]);

    let session = ctx.current_session();
    assert!(!session.config_dirty);
    assert_eq!(
        session
            .shadow_config
            .as_ref()
            .and_then(|c| c.find_path(&["system", "hostname"]))
            .and_then(Node::text),
        Some("edge9")
    );
    let startup = transport
        .with_device(|d| d.datastore(Datastore::Startup).clone())
        .unwrap();
    assert_eq!(
        startup.find_path(&["system", "hostname"]).and_then(Node::text),
        Some("edge9")
    );
}

#[test]
fn test_get_locks_waits_for_external_holder() {
    let transport = LoopbackTransport::new(DeviceProfile::router());
    let prefs = SessionPrefs {
        autoload: false,
        echo_replies: false,
        ..SessionPrefs::default()
    };
    let (mut ctx, clock) = context(&transport, prefs);
    run(&mut ctx, "connect host=lab.example.net");
    transport
        .with_device(|d| d.lock_externally(Datastore::Candidate))
        .unwrap();

    run(&mut ctx, "get-locks lock-timeout=10 retry-interval=2");
    assert_eq!(ctx.current_session().mode(), Some(CommandMode::AutoLock));
    assert_eq!(
        ctx.current_session().locks.record(Datastore::Candidate).state,
        LockState::TempError
    );

    transport
        .with_device(|d| d.release_external(Datastore::Candidate))
        .unwrap();
    clock.advance(Duration::from_secs(2));
    ctx.pump();

    let session = ctx.current_session();
    assert_eq!(session.last_lock_result, Some(LockOutcome::Acquired));
    assert_eq!(session.mode(), Some(CommandMode::Normal));
    let id = session.id;
    for ds in Datastore::ALL {
        assert_eq!(transport.with_device(|d| d.lock_owner(ds)).unwrap(), Some(id));
    }

    run(&mut ctx, "release-locks");
    for ds in Datastore::ALL {
        assert_eq!(transport.with_device(|d| d.lock_owner(ds)).unwrap(), None);
    }
}

#[test]
fn test_dirty_candidate_is_discarded_during_get_locks() {
    let transport = LoopbackTransport::default();
    let prefs = SessionPrefs {
        autoload: false,
        echo_replies: false,
        ..SessionPrefs::default()
    };
    let (mut ctx, _clock) = context(&transport, prefs);
    run(&mut ctx, "connect host=lab.example.net");
    transport.with_device(|d| d.dirty_candidate()).unwrap();

    run(&mut ctx, "get-locks");

    let session = ctx.current_session();
    assert_eq!(session.last_lock_result, Some(LockOutcome::Failed));
    assert_eq!(session.mode(), Some(CommandMode::Normal));
    let handled = transport.with_device(|d| d.handled().to_vec()).unwrap();
    assert!(handled.contains(&"discard-changes".to_string()));
    assert_eq!(
        transport.with_device(|d| d.lock_owner(Datastore::Running)).unwrap(),
        None
    );
}

#[test]
fn test_device_hang_up_resets_session() {
    let transport = LoopbackTransport::default();
    let prefs = SessionPrefs {
        autoload: false,
        echo_replies: false,
        ..SessionPrefs::default()
    };
    let (mut ctx, _clock) = context(&transport, prefs);
    run(&mut ctx, "connect host=lab.example.net");
    let id = ctx.current_id();

    transport.hang_up(id, "peer reset").unwrap();
    ctx.pump();

    assert!(!ctx.current_session().phase.is_connected());
    assert!(ctx
        .drain_events()
        .iter()
        .any(|e| matches!(e, ClientEvent::Disconnected { reason, .. } if reason.contains("peer reset"))));
}
