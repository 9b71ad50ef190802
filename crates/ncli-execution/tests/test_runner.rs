use ncli_core::ClientEvent;
use ncli_core::test_run::Verdict;
use ncli_core::transport::VecLineSource;
use ncli_execution::{Client, ClientOptions, EventLoop, LoopInput, LoopOutput};
use ncli_interaction::UNREACHABLE_HOST;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const LIMIT: Duration = Duration::from_secs(5);

const SMOKE_SUITE: &str = r#"
[[suite]]
name = "smoke"
run_tests = ["hostname"]

[[suite.test]]
name = "hostname"

[[suite.test.step]]
name = "1"
command = "get-config source=running"
result_type = "data"
result_data_type = "data-non-empty"

[[suite.test.step]]
name = "2"
command = "commit"
result_type = "ok"
"#;

fn client(home: &TempDir) -> Client {
    Client::build(ClientOptions {
        home: Some(home.path().to_path_buf()),
        ..ClientOptions::default()
    })
    .unwrap()
}

fn event_loop(home: &TempDir) -> EventLoop {
    EventLoop::new(client(home).context).with_tick(Duration::from_millis(5))
}

#[tokio::test]
async fn test_execute_connect_reports_connected() {
    let home = TempDir::new().unwrap();
    let mut runner = event_loop(&home);

    let outcome = runner.execute("connect host=lab.example.net", LIMIT).await;
    assert!(outcome.result.is_ok());
    assert!(outcome
        .events
        .iter()
        .any(|e| matches!(e, ClientEvent::Connected { .. })));
    assert!(runner.context().current_session().phase.is_connected());
    assert!(runner.context().wants_user_input());
}

#[tokio::test]
async fn test_execute_reply_is_returned_with_events() {
    let home = TempDir::new().unwrap();
    let mut runner = event_loop(&home);
    runner.execute("connect host=lab.example.net", LIMIT).await;

    let outcome = runner.execute("get-config source=running", LIMIT).await;
    assert!(matches!(outcome.result, Ok(Some(_))));
    assert!(outcome
        .events
        .iter()
        .any(|e| matches!(e, ClientEvent::Reply { text, .. } if text.contains("loopback"))));
}

#[tokio::test]
async fn test_unreachable_host_leaves_session_idle() {
    let home = TempDir::new().unwrap();
    let mut runner = event_loop(&home);

    let outcome = runner
        .execute(&format!("connect host={UNREACHABLE_HOST}"), LIMIT)
        .await;
    assert!(!runner.context().current_session().phase.is_connected());
    assert!(outcome
        .events
        .iter()
        .any(|e| matches!(e, ClientEvent::Disconnected { .. })));
}

#[tokio::test]
async fn test_suite_file_runs_against_loopback() {
    let home = TempDir::new().unwrap();
    let suites = home.path().join("smoke.toml");
    std::fs::write(&suites, SMOKE_SUITE).unwrap();

    let built = Client::build(ClientOptions {
        home: Some(home.path().to_path_buf()),
        suites_file: Some(suites),
        ..ClientOptions::default()
    })
    .unwrap();
    assert!(built.context.suites().find("smoke").is_some());

    let mut runner = EventLoop::new(built.context).with_tick(Duration::from_millis(5));
    runner.execute("connect host=lab.example.net", LIMIT).await;
    let outcome = runner.execute("test-suite run=smoke", LIMIT).await;
    assert!(outcome.result.is_ok());

    let reports: Vec<_> = outcome
        .events
        .into_iter()
        .filter_map(|e| match e {
            ClientEvent::TestReport(report) => Some(report),
            _ => None,
        })
        .collect();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].verdict, Verdict::Passed);
    assert_eq!(reports[0].failed_steps(), 0);
}

#[tokio::test]
async fn test_run_prompts_then_stops_on_quit() {
    let home = TempDir::new().unwrap();
    let runner = event_loop(&home);
    let (input_tx, input_rx) = mpsc::channel(8);
    let (output_tx, mut output_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(runner.run(input_rx, output_tx, cancel));

    let prompt = loop {
        match tokio::time::timeout(LIMIT, output_rx.recv()).await.unwrap() {
            Some(LoopOutput::Prompt(p)) => break p,
            Some(_) => continue,
            None => panic!("loop ended early"),
        }
    };
    assert!(prompt.starts_with("ncli"));

    input_tx
        .send(LoopInput::Line("connect host=lab.example.net".into()))
        .await
        .unwrap();
    let mut connected = false;
    loop {
        match tokio::time::timeout(LIMIT, output_rx.recv()).await.unwrap() {
            Some(LoopOutput::Events(events)) => {
                connected |= events
                    .iter()
                    .any(|e| matches!(e, ClientEvent::Connected { .. }));
            }
            Some(LoopOutput::Prompt(_)) => break,
            Some(LoopOutput::Error(e)) => panic!("unexpected error: {e}"),
            None => panic!("loop ended early"),
        }
    }
    assert!(connected);

    input_tx.send(LoopInput::Quit).await.unwrap();
    let ctx = tokio::time::timeout(LIMIT, handle).await.unwrap().unwrap();
    assert!(!ctx.current_session().phase.is_connected());
}

#[tokio::test]
async fn test_run_reports_line_errors_and_honours_cancel() {
    let home = TempDir::new().unwrap();
    let runner = event_loop(&home);
    let (input_tx, input_rx) = mpsc::channel(8);
    let (output_tx, mut output_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(runner.run(input_rx, output_tx, cancel.clone()));
    input_tx
        .send(LoopInput::Line("no-such-command".into()))
        .await
        .unwrap();

    let mut saw_error = false;
    while let Ok(Some(out)) = tokio::time::timeout(Duration::from_millis(200), output_rx.recv()).await {
        if matches!(out, LoopOutput::Error(_)) {
            saw_error = true;
            break;
        }
    }
    assert!(saw_error);

    cancel.cancel();
    tokio::time::timeout(LIMIT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_feed_runs_lines_in_order() {
    let home = TempDir::new().unwrap();
    let mut runner = event_loop(&home);
    let mut source = VecLineSource::new([
        "connect host=lab.example.net",
        "",
        "$$running_cfg = get-config source=running",
        "no-such-command",
    ]);

    let outcomes = runner.feed(&mut source, LIMIT).await;
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].result.is_ok());
    assert!(outcomes[1].result.is_ok());
    assert!(outcomes[2].result.as_ref().is_err_and(|e| e.is_not_found()));
    assert!(runner.context().vars().global("running_cfg").is_some());
}
