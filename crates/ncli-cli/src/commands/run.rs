use std::time::Duration;

use anyhow::{Context, Result, bail};
use ncli_core::ClientEvent;
use ncli_core::test_run::{SuiteReport, Verdict};
use ncli_core::transport::VecLineSource;
use ncli_execution::{Client, ClientOptions, EventLoop, LogConfig, init_tracing};
use ncli_infrastructure::SessionConfigRepository;
use tracing::info;

use crate::RunArgs;

fn connect_line(args: &RunArgs) -> String {
    let mut line = format!("connect host={} port={}", args.host, args.port);
    if let Some(user) = &args.user {
        line.push_str(&format!(" user={user}"));
    }
    line
}

fn suite_lines(args: &RunArgs) -> Vec<String> {
    if args.suites.is_empty() {
        vec!["test-suite run-all".to_string()]
    } else {
        args.suites
            .iter()
            .map(|name| format!("test-suite run={name}"))
            .collect()
    }
}

fn all_passed(reports: &[SuiteReport]) -> bool {
    reports
        .iter()
        .all(|r| r.verdict != Verdict::Failed && r.failed_steps() == 0)
}

fn reports_of(events: Vec<ClientEvent>) -> Vec<SuiteReport> {
    events
        .into_iter()
        .filter_map(|event| match event {
            ClientEvent::TestReport(report) => Some(report),
            _ => None,
        })
        .collect()
}

/// Connects, runs the requested suites and prints their reports.
/// Returns whether every suite passed.
pub async fn execute(options: ClientOptions, args: &RunArgs) -> Result<bool> {
    let client = Client::build(options).context("cannot start ncli")?;
    // only the first subscriber in the process is installed
    let _ = init_tracing(&LogConfig::from(&client.config.logging));

    for name in &args.suites {
        if client.context.suites().find(name).is_none() {
            bail!("test suite '{name}' not found");
        }
    }
    let connect = match &args.session {
        Some(name) => SessionConfigRepository::new(&client.paths)
            .get(name)?
            .connect_line(),
        None => connect_line(args),
    };

    let limit = Duration::from_secs(args.timeout);
    let mut runner = EventLoop::new(client.context);
    let outcome = runner.execute(&connect, limit).await;
    outcome.result?;
    if !runner.context().current_session().phase.is_connected() {
        let reason = outcome
            .events
            .iter()
            .find_map(|e| match e {
                ClientEvent::Disconnected { reason, .. } => Some(reason.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "no hello from server".to_string());
        bail!("cannot connect: {reason}");
    }

    let lines = suite_lines(args);
    info!("running {} suite commands", lines.len());
    let mut source = VecLineSource::new(lines);
    let mut reports = Vec::new();
    let mut errors = 0;
    for outcome in runner.feed(&mut source, limit).await {
        if let Err(e) = outcome.result {
            eprintln!("Error: {e}");
            errors += 1;
        }
        reports.extend(reports_of(outcome.events));
    }
    runner.context_mut().shutdown();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print!("{report}");
        }
        let failed = reports.iter().filter(|r| r.verdict == Verdict::Failed).count();
        println!("{} suites, {} failed", reports.len(), failed);
    }
    Ok(errors == 0 && all_passed(&reports))
}
