mod common;

use common::{Harness, quiet_prefs};
use ncli_core::document::Node;
use ncli_core::transport::{Capabilities, LineOrigin, capability};
use ncli_core::vars::{VarRef, VarValue};
use tempfile::TempDir;

fn harness() -> Harness {
    let mut h = Harness::new(
        Capabilities::default().with_uri(capability::CANDIDATE),
        quiet_prefs(),
    );
    h.connect();
    h
}

fn global(h: &Harness, name: &str) -> Option<VarValue> {
    h.ctx.vars().global(name).cloned()
}

#[test]
fn test_global_visible_in_nested_script_local_is_not() {
    let dir = TempDir::new().unwrap();
    let inner = dir.path().join("inner.ncli");
    std::fs::write(
        &inner,
        "$$seen_global = $$scope_g\n$$seen_local = $scope_l\n$$after_error = \"reached\"\n",
    )
    .unwrap();

    let mut h = harness();
    let run_line = format!("run file={}", inner.display());
    h.ctx
        .run_script(
            "outer",
            ["$$scope_g = \"v\"", "$scope_l = \"w\"", run_line.as_str()],
        )
        .unwrap();
    h.ctx.pump();

    assert_eq!(global(&h, "seen_global"), Some(VarValue::Text("v".into())));
    assert!(global(&h, "seen_local").is_none());
    // the failed lookup cancelled the rest of the script
    assert!(global(&h, "after_error").is_none());
    assert!(!h.ctx.runstack().is_running());
}

#[test]
fn test_local_lookup_in_same_frame() {
    let mut h = harness();
    h.ctx
        .run_script("frame", ["$x = \"1\"", "$$copy = $x"])
        .unwrap();
    h.ctx.pump();
    assert_eq!(global(&h, "copy"), Some(VarValue::Text("1".into())));
    assert!(global(&h, "x").is_none());
}

#[test]
fn test_system_variable_is_read_only() {
    let mut h = harness();
    assert!(h.line("$$HOME = \"/tmp\"").is_err());
    let err = h
        .line("$$HOME = ")
        .expect_err("system variables cannot be removed");
    assert!(err.is_assignment());
}

#[test]
fn test_config_variable_updates_session_and_defaults() {
    let mut h = harness();
    h.line("$$timeout = 7").unwrap();
    assert_eq!(h.ctx.current_session().prefs.timeout_secs, 7);
    assert_eq!(h.ctx.defaults().timeout_secs, 7);
    assert!(h.line("$$timeout = abc").is_err());
    assert_eq!(h.ctx.current_session().prefs.timeout_secs, 7);
    assert!(h.line("$$timeout = ").is_err());
}

#[test]
fn test_remote_result_assigned_to_variable() {
    let mut h = harness();
    let sent = h.line("$$cfg = get-config source=running").unwrap();
    assert!(sent.is_some());
    assert!(h.ctx.pending().is_some());

    let get = h.transport.last_sent();
    let data = Node::new("data").with_child(Node::leaf("hostname", "r1"));
    h.transport.reply_data(&get, data.clone());
    h.ctx.pump();

    assert!(h.ctx.pending().is_none());
    assert_eq!(global(&h, "cfg"), Some(VarValue::Tree(data)));
}

#[test]
fn test_error_reply_leaves_target_unset() {
    let mut h = harness();
    h.line("$$cfg = get-config source=running").unwrap();
    let get = h.transport.last_sent();
    h.transport.reply_error(&get, "access-denied");
    h.ctx.pump();
    assert!(h.ctx.pending().is_none());
    assert!(global(&h, "cfg").is_none());
}

#[test]
fn test_second_target_rejected_while_result_pending() {
    let mut h = harness();
    h.line("session add=lab").unwrap();
    h.line("$$first = get-config source=running").unwrap();
    let get = h.transport.last_sent();

    h.ctx
        .handle_line("session set-current=lab", LineOrigin::Script)
        .unwrap();
    h.ctx
        .handle_line("connect host=lab.example.net", LineOrigin::Script)
        .unwrap();
    h.ctx.pump();
    assert!(h.ctx.current_session().phase.is_connected());
    let sent_before = h.transport.sent().len();

    let err = h
        .ctx
        .handle_line("$$second = get-config source=running", LineOrigin::Script)
        .unwrap_err();
    assert!(err.is_busy());
    assert_eq!(h.transport.sent().len(), sent_before);

    let data = Node::new("data").with_child(Node::leaf("hostname", "r1"));
    h.transport.reply_data(&get, data.clone());
    h.ctx.pump();
    assert_eq!(global(&h, "first"), Some(VarValue::Tree(data)));
    assert!(global(&h, "second").is_none());
    assert!(h.ctx.pending().is_none());
}

#[test]
fn test_local_command_cannot_feed_assignment() {
    let mut h = harness();
    let err = h.line("$$x = save").unwrap_err();
    assert!(err.is_assignment());
}

#[test]
fn test_file_assignment_writes_and_deletes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.xml");
    let mut h = harness();

    h.line("$$tree = [<config><hostname>r1</hostname></config>]").unwrap();
    h.line(&format!("@{} = $$tree", path.display())).unwrap();
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("<hostname>r1</hostname>"));

    h.line(&format!("$read_back = @{}", path.display())).unwrap();
    assert!(matches!(
        h.ctx.lookup_var(&VarRef {
            name: "read_back".into(),
            global: false
        }),
        Some(VarValue::Tree(_))
    ));

    h.line(&format!("@{} = ", path.display())).unwrap();
    assert!(!path.exists());
    assert!(h.line(&format!("@{} = ", path.display())).is_err());
}

#[test]
fn test_file_not_overwritten_when_disabled() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("keep.txt");
    std::fs::write(&path, "old\n").unwrap();
    let mut h = harness();

    h.line("$$overwrite-filevars = \"false\"").unwrap();
    assert!(h.line(&format!("@{} = \"new\"", path.display())).is_err());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "old\n");
}

#[test]
fn test_apply_config_sends_edit_then_commit() {
    let mut h = harness();
    h.line("$$cfg = [<config><hostname>r9</hostname></config>]").unwrap();
    h.line("apply-config var=cfg").unwrap();

    let edit = h.transport.last_sent();
    assert_eq!(edit.request.name, "edit-config");
    assert_eq!(
        edit.request
            .find_path(&["config", "hostname"])
            .and_then(Node::text),
        Some("r9")
    );
    h.transport.reply_ok(&edit);
    h.ctx.pump();
    let commit = h.transport.last_sent();
    assert_eq!(commit.request.name, "commit");
    h.transport.reply_ok(&commit);
    h.ctx.pump();
    assert!(h.ctx.wants_user_input());
}
