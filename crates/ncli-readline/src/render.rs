//! Terminal rendering of core events.

use colored::{ColoredString, Colorize};
use ncli_core::ClientEvent;
use ncli_core::rpc::ReplyKind;
use ncli_core::test_run::{SuiteReport, Verdict};
use ncli_execution::SessionLogEntry;

pub fn event_lines(event: &ClientEvent) -> Vec<ColoredString> {
    match event {
        ClientEvent::Connected {
            session,
            capabilities,
        } => vec![format!("[{session}] connected ({capabilities} capabilities)").green()],
        ClientEvent::Disconnected { session, reason } => {
            vec![format!("[{session}] disconnected: {reason}").yellow()]
        }
        ClientEvent::ModeChanged { session, mode } => {
            vec![format!("[{session}] {mode}").bright_black()]
        }
        ClientEvent::Reply {
            session,
            message_id,
            kind,
            text,
        } => {
            let mut lines = vec![format!("[{session}] rpc-reply {message_id}:").bright_black()];
            lines.extend(text.lines().map(|line| match kind {
                ReplyKind::Ok => line.green(),
                ReplyKind::Data => line.normal(),
                ReplyKind::Error => line.red(),
            }));
            lines
        }
        ClientEvent::Notification { session, text } => {
            let mut lines = vec![format!("[{session}] notification:").bright_magenta()];
            lines.extend(text.lines().map(|line| line.magenta()));
            lines
        }
        ClientEvent::TestReport(report) => report_lines(report),
        ClientEvent::Info(message) => vec![message.bright_black()],
        ClientEvent::Warning(message) => vec![message.yellow()],
    }
}

pub fn report_lines(report: &SuiteReport) -> Vec<ColoredString> {
    report
        .to_string()
        .lines()
        .map(|line| {
            if line.ends_with(&format!(": {}", Verdict::Failed)) || line.trim_start().starts_with("- ") {
                line.red()
            } else if line.ends_with(&format!(": {}", Verdict::Passed)) {
                line.green()
            } else {
                line.normal()
            }
        })
        .collect()
}

pub fn log_line(entry: &SessionLogEntry) -> ColoredString {
    match entry.level.as_str() {
        "ERROR" => entry.to_string().red(),
        "WARN" => entry.to_string().yellow(),
        _ => entry.to_string().bright_black(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncli_core::test_run::{StepReport, TestReport};

    #[test]
    fn test_reply_lines_keep_text() {
        let event = ClientEvent::Reply {
            session: "default".into(),
            message_id: 4,
            kind: ReplyKind::Data,
            text: "hostname r1\nlocation lab".into(),
        };
        let lines = event_lines(&event);
        assert_eq!(lines.len(), 3);
        assert_eq!(&*lines[2], "location lab");
    }

    #[test]
    fn test_failed_report_lines_are_red() {
        let report = SuiteReport {
            suite: "smoke".into(),
            verdict: Verdict::Failed,
            tests: vec![TestReport {
                name: "t".into(),
                verdict: Verdict::Failed,
                skipped_for: None,
                steps: vec![StepReport {
                    name: "1".into(),
                    command: "commit".into(),
                    verdict: Verdict::Failed,
                    problems: vec!["no reply before the timeout".into()],
                }],
            }],
        };
        let lines = report_lines(&report);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].fgcolor(), Some(colored::Color::Red));
        assert_eq!(lines[3].fgcolor(), Some(colored::Color::Red));
    }
}
