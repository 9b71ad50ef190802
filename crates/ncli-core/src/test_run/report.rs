//! Pass/fail reports and suite listings.

use crate::testsuite::{DataKind, ResponseType, Step, Suite, Test};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Verdict {
    Passed,
    Failed,
    Skipped,
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub name: String,
    pub command: String,
    pub verdict: Verdict,
    pub problems: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestReport {
    pub name: String,
    pub verdict: Verdict,
    /// Must-pass dependency that caused a skip
    pub skipped_for: Option<String>,
    pub steps: Vec<StepReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteReport {
    pub suite: String,
    pub verdict: Verdict,
    pub tests: Vec<TestReport>,
}

impl StepReport {
    fn from_step(step: &Step) -> Self {
        let o = &step.outcome;
        let mut problems = Vec::new();
        if o.result_wrong {
            problems.push(format!(
                "got response type '{}', expected '{}'",
                o.result.unwrap_or(ResponseType::None),
                step.result_type
            ));
        }
        if o.tag_wrong {
            problems.push(format!(
                "error-tag '{}' does not match '{}'",
                o.error_tag.as_deref().unwrap_or("-"),
                step.result_error_tag.as_deref().unwrap_or("-")
            ));
        }
        if o.apptag_wrong {
            problems.push(format!(
                "error-app-tag '{}' does not match '{}'",
                o.error_apptag.as_deref().unwrap_or("-"),
                step.result_error_apptag.as_deref().unwrap_or("-")
            ));
        }
        if o.info_wrong {
            problems.push("expected error-info missing".to_string());
        }
        if o.data_wrong {
            problems.push(match step.result_data_type {
                DataKind::DataMatch => "reply data differs from the recorded snapshot".to_string(),
                kind => format!("reply data is not {kind}"),
            });
        }
        if o.timed_out {
            problems.push("no reply before the timeout".to_string());
        }
        if o.local_error {
            problems.push("command failed locally".to_string());
        }

        let verdict = if !problems.is_empty() {
            Verdict::Failed
        } else if o.done {
            Verdict::Passed
        } else {
            Verdict::NotRun
        };
        Self {
            name: step.name.clone(),
            command: step.command.clone(),
            verdict,
            problems,
        }
    }
}

impl TestReport {
    fn from_test(test: &Test) -> Self {
        let steps: Vec<StepReport> = test.steps.iter().map(StepReport::from_step).collect();
        let skipped_for = test.failed_must_pass().map(|m| m.name.clone());
        let verdict = if !test.started {
            if skipped_for.is_some() {
                Verdict::Skipped
            } else {
                Verdict::NotRun
            }
        } else if test.errors || steps.iter().any(|s| s.verdict == Verdict::Failed) {
            Verdict::Failed
        } else {
            Verdict::Passed
        };
        Self {
            name: test.name.clone(),
            verdict,
            skipped_for,
            steps,
        }
    }
}

impl SuiteReport {
    /// Builds the report from the run results stored in the suite. Tests
    /// appear in run-list order.
    pub fn from_suite(suite: &Suite) -> Self {
        let tests: Vec<TestReport> = suite
            .run_tests
            .iter()
            .filter_map(|name| suite.find_test(name))
            .map(TestReport::from_test)
            .collect();
        let verdict = if suite.errors || tests.iter().any(|t| t.verdict == Verdict::Failed) {
            Verdict::Failed
        } else if tests.iter().any(|t| t.verdict == Verdict::Passed) {
            Verdict::Passed
        } else {
            Verdict::NotRun
        };
        Self {
            suite: suite.name.clone(),
            verdict,
            tests,
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }

    pub fn failed_steps(&self) -> usize {
        self.tests
            .iter()
            .flat_map(|t| &t.steps)
            .filter(|s| s.verdict == Verdict::Failed)
            .count()
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "test-suite {}: {}", self.suite, self.verdict)?;
        for test in &self.tests {
            match &test.skipped_for {
                Some(dep) => writeln!(f, "  test {}: {} (must-pass '{dep}' failed)", test.name, test.verdict)?,
                None => writeln!(f, "  test {}: {}", test.name, test.verdict)?,
            }
            for step in &test.steps {
                writeln!(f, "    step {} [{}]: {}", step.name, step.command, step.verdict)?;
                for problem in &step.problems {
                    writeln!(f, "      - {problem}")?;
                }
            }
        }
        Ok(())
    }
}

/// Renders a suite definition for `test-suite show`.
pub fn describe_suite(suite: &Suite) -> String {
    let mut out = format!("test-suite {}\n", suite.name);
    if let Some(d) = &suite.description {
        out.push_str(&format!("  description: {d}\n"));
    }
    for line in &suite.setup {
        out.push_str(&format!("  setup: {line}\n"));
    }
    for line in &suite.cleanup {
        out.push_str(&format!("  cleanup: {line}\n"));
    }
    out.push_str(&format!("  run-test: {}\n", suite.run_tests.join(", ")));
    for test in &suite.tests {
        out.push_str(&format!("  test {}", test.name));
        if !test.must_pass.is_empty() {
            let names: Vec<&str> = test.must_pass.iter().map(|m| m.name.as_str()).collect();
            out.push_str(&format!(" (must-pass: {})", names.join(", ")));
        }
        out.push('\n');
        for step in &test.steps {
            out.push_str(&format!(
                "    step {}: {} -> {}",
                step.name, step.command, step.result_type
            ));
            if let Some(tag) = &step.result_error_tag {
                out.push_str(&format!(" tag={tag}"));
            }
            if step.result_data_type != DataKind::Unset {
                out.push_str(&format!(" {}", step.result_data_type));
            }
            if let Some(s) = &step.session_name {
                out.push_str(&format!(" @{s}"));
            }
            out.push('\n');
        }
    }
    out
}
