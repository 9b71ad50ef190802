//! Test-run engine.
//!
//! Feeds suite lines into the command pipeline and checks each step's reply
//! against its expectation. The engine never owns the suites; every call
//! takes the `SuiteSet` and the cursor is kept as indices into it.
//!
//! ```text
//! READY -> SETUP -> RUNTEST -> CLEANUP -> DONE
//!            |         |
//!            +-> ERROR <+ (session lost, setup failure, stop with error)
//! ```

mod report;

pub use report::{SuiteReport, StepReport, TestReport, Verdict, describe_suite};

use crate::error::{NcliError, Result};
use crate::rpc::{Reply, ReplyKind};
use crate::testsuite::{
    DataKind, ResponseType, SnapshotKey, SnapshotKind, SnapshotStore, Step, SuiteSet,
};
use chrono::Local;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum RunState {
    #[default]
    None,
    Init,
    Ready,
    Setup,
    RunTest,
    Cleanup,
    Done,
    Error,
}

impl RunState {
    /// A suite is in progress.
    pub fn is_busy(self) -> bool {
        matches!(self, RunState::Setup | RunState::RunTest | RunState::Cleanup)
    }
}

/// Why a run is being stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Input ran out normally
    Finished,
    /// User interrupt or `test-suite stop`
    Cancelled,
    Failed(String),
}

fn response_type(kind: ReplyKind) -> ResponseType {
    match kind {
        ReplyKind::Ok => ResponseType::Ok,
        ReplyKind::Data => ResponseType::Data,
        ReplyKind::Error => ResponseType::Error,
    }
}

#[derive(Debug, Default)]
pub struct TestRunEngine {
    state: RunState,
    input_mode: bool,
    single_suite: bool,
    /// Session that was current when the run started
    test_session: Option<String>,
    cur_suite: usize,
    /// Test indices of the current suite, in run-list order
    run_order: Vec<usize>,
    cur_run_test: Option<usize>,
    cur_step: Option<usize>,
    cur_rawline: Option<usize>,
    indent: usize,
    reports: Vec<SuiteReport>,
}

impl TestRunEngine {
    pub fn new() -> Self {
        Self {
            state: RunState::Ready,
            indent: 2,
            ..Default::default()
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Lines are being fed from a suite.
    pub fn is_active(&self) -> bool {
        self.input_mode
    }

    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    /// Indent used when writing data snapshots.
    pub fn set_indent(&mut self, indent: usize) {
        self.indent = indent;
    }

    /// Reports of suites finished since the last call.
    pub fn take_reports(&mut self) -> Vec<SuiteReport> {
        std::mem::take(&mut self.reports)
    }

    /// Starts one suite, or every suite in order when `suite_name` is `None`.
    pub fn start(
        &mut self,
        suites: &mut SuiteSet,
        suite_name: Option<&str>,
        current_session: &str,
    ) -> Result<()> {
        if self.is_busy() {
            return Err(NcliError::busy("a test-suite is already running"));
        }
        let idx = match suite_name {
            Some(name) => suites.position(name).ok_or_else(|| {
                self.state = RunState::Error;
                error!("Error: test-suite '{name}' not found");
                NcliError::not_found("test-suite", name)
            })?,
            None if suites.suites.is_empty() => {
                return Err(NcliError::invalid_state("no test-suites are loaded"));
            }
            None => 0,
        };

        self.single_suite = suite_name.is_some();
        self.test_session = Some(current_session.to_string());
        self.enter_suite(suites, idx)
    }

    /// Resets the cursor onto a suite and checks its run list.
    fn enter_suite(&mut self, suites: &mut SuiteSet, idx: usize) -> Result<()> {
        let suite = &mut suites.suites[idx];
        suite.reset_results();
        if suite.run_tests.is_empty() {
            self.state = RunState::Error;
            info!("Test-suite '{}' has no run-test statements; exiting test suite", suite.name);
            return Err(NcliError::execution(format!(
                "test-suite '{}' has no run-test statements",
                suite.name
            )));
        }

        let mut order = Vec::with_capacity(suite.run_tests.len());
        for name in &suite.run_tests {
            match suite.tests.iter().position(|t| &t.name == name) {
                Some(i) => order.push(i),
                None => {
                    self.state = RunState::Error;
                    self.input_mode = false;
                    info!("Test-suite '{}' has no test named '{name}'; exiting test suite", suite.name);
                    return Err(NcliError::not_found("test", format!("{}/{name}", suite.name)));
                }
            }
        }

        suite.started = true;
        suite.errors = false;
        self.cur_suite = idx;
        self.run_order = order;
        self.cur_run_test = Some(0);
        self.cur_step = None;
        self.cur_rawline = None;
        self.input_mode = true;
        self.state = if suite.setup.is_empty() {
            RunState::RunTest
        } else {
            RunState::Setup
        };
        info!(suite = %suite.name, "Starting test-suite '{}'", suite.name);
        Ok(())
    }

    /// Next line to execute, or `None` when the run has nothing more to
    /// feed. The caller then stops the engine.
    pub fn next_line(&mut self, suites: &mut SuiteSet) -> Option<String> {
        loop {
            match self.state {
                RunState::Setup => {
                    let idx = self.cur_rawline.map_or(0, |i| i + 1);
                    let suite = &suites.suites[self.cur_suite];
                    if idx == 0 {
                        info!("Setup for test-suite '{}'", suite.name);
                    }
                    if let Some(line) = suite.setup.get(idx) {
                        self.cur_rawline = Some(idx);
                        return Some(line.clone());
                    }
                    self.cur_rawline = None;
                    self.state = RunState::RunTest;
                }
                RunState::RunTest => {
                    if let Some(line) = self.next_step_line(suites) {
                        return Some(line);
                    }
                    if !suites.suites[self.cur_suite].cleanup.is_empty() {
                        self.state = RunState::Cleanup;
                        continue;
                    }
                    if self.finish_suite(suites) || !self.next_suite(suites) {
                        return None;
                    }
                }
                RunState::Cleanup => {
                    let idx = self.cur_rawline.map_or(0, |i| i + 1);
                    let suite = &suites.suites[self.cur_suite];
                    if idx == 0 {
                        info!("Cleanup for test-suite '{}'", suite.name);
                    }
                    if let Some(line) = suite.cleanup.get(idx) {
                        self.cur_rawline = Some(idx);
                        return Some(line.clone());
                    }
                    self.cur_rawline = None;
                    if self.finish_suite(suites) || !self.next_suite(suites) {
                        return None;
                    }
                }
                RunState::Error => {
                    self.input_mode = false;
                    return None;
                }
                _ => return None,
            }
        }
    }

    /// Advances to the next step, moving through the run list as tests
    /// complete. `None` when no runnable test is left.
    fn next_step_line(&mut self, suites: &mut SuiteSet) -> Option<String> {
        loop {
            let rt = self.cur_run_test?;
            let test_idx = self.run_order[rt];
            let suite = &mut suites.suites[self.cur_suite];
            let suite_name = suite.name.clone();
            let test = &mut suite.tests[test_idx];

            let next = match self.cur_step {
                None => {
                    info!("Starting test '{}/{}'", suite_name, test.name);
                    test.started = true;
                    0
                }
                Some(i) => i + 1,
            };

            if let Some(step) = test.steps.get_mut(next) {
                self.cur_step = Some(next);
                step.outcome.started_at = Some(Local::now());
                info!("Step {} of '{}/{}': {}", step.name, suite_name, test.name, step.command);
                return Some(step.command.clone());
            }

            info!("Test {}/{} done", suite_name, test.name);
            self.update_must_pass(suites, test_idx);
            self.cur_step = None;
            self.cur_run_test = self.next_runnable(suites, rt + 1);
        }
    }

    /// Marks the must-pass entries that name a finished test.
    fn update_must_pass(&mut self, suites: &mut SuiteSet, test_idx: usize) {
        let suite = &mut suites.suites[self.cur_suite];
        let finished = &suite.tests[test_idx];
        if !finished.started {
            return;
        }
        let name = finished.name.clone();
        let failed = finished.errors || finished.any_step_errors();
        let suite_name = suite.name.clone();
        for test in &mut suite.tests {
            for m in test.must_pass.iter_mut().filter(|m| m.name == name) {
                m.checked = true;
                m.passed = !failed;
                if failed {
                    error!(
                        "({suite_name})/({name}) failed which is a must_pass for ({suite_name})/({})",
                        test.name
                    );
                }
            }
        }
    }

    /// First run-list entry at or after `from` with no failed must-pass.
    /// Dependencies are checked in declaration order only.
    fn next_runnable(&self, suites: &SuiteSet, from: usize) -> Option<usize> {
        let suite = &suites.suites[self.cur_suite];
        (from..self.run_order.len()).find(|&i| {
            let test = &suite.tests[self.run_order[i]];
            match test.failed_must_pass() {
                None => true,
                Some(m) => {
                    error!("({}) will be skipped, its must_pass ({}) failed.", test.name, m.name);
                    false
                }
            }
        })
    }

    /// Ends the current suite. Returns true when no further suite follows.
    fn finish_suite(&mut self, suites: &mut SuiteSet) -> bool {
        let final_finish = self.single_suite || self.cur_suite + 1 >= suites.suites.len();
        let suite = &mut suites.suites[self.cur_suite];
        if suite.any_test_errors() {
            suite.errors = true;
        }
        self.state = RunState::Done;
        self.input_mode = false;
        let report = SuiteReport::from_suite(suite);
        info!(suite = %suite.name, verdict = %report.verdict, "Test suite {} results:\n{report}", suite.name);
        self.reports.push(report);
        final_finish
    }

    /// Moves to the next suite in declaration order.
    fn next_suite(&mut self, suites: &mut SuiteSet) -> bool {
        let next = self.cur_suite + 1;
        if next >= suites.suites.len() {
            return false;
        }
        match self.enter_suite(suites, next) {
            Ok(()) => true,
            Err(e) => {
                warn!("Cannot start next test-suite: {e}");
                false
            }
        }
    }

    fn current_step_mut<'a>(&self, suites: &'a mut SuiteSet) -> Option<&'a mut Step> {
        let test_idx = self.run_order.get(self.cur_run_test?)?;
        suites.suites[self.cur_suite].tests[*test_idx]
            .steps
            .get_mut(self.cur_step?)
    }

    /// Records how the last fed line was handled. `reply_pending` is true
    /// when a request went out and `handle_reply` will follow.
    pub fn handle_return(
        &mut self,
        suites: &mut SuiteSet,
        result: std::result::Result<(), &NcliError>,
        reply_pending: bool,
    ) {
        if !self.is_busy() {
            return;
        }
        match self.state {
            RunState::Setup => {
                if let Err(e) = result {
                    self.state = RunState::Error;
                    self.input_mode = false;
                    info!(
                        "Error exit for test-suite '{}' ({e})",
                        suites.suites[self.cur_suite].name
                    );
                }
            }
            RunState::Cleanup => {}
            RunState::RunTest => {
                if let Some(step) = self.current_step_mut(suites) {
                    match result {
                        Err(_) => {
                            step.outcome.local_error = true;
                            step.outcome.result = Some(ResponseType::No);
                            step.outcome.done = true;
                        }
                        Ok(()) if !reply_pending => {
                            step.outcome.done = true;
                            step.outcome.result = Some(ResponseType::No);
                            step.outcome.stopped_at = Some(Local::now());
                            if !step.result_type.is_wildcard() && step.result_type != ResponseType::No {
                                step.outcome.result_wrong = true;
                            }
                        }
                        Ok(()) => {}
                    }
                }
                if result.is_err() {
                    self.kill_test(suites);
                }
            }
            _ => {}
        }
    }

    /// Fails the current test and skips to the next runnable one.
    fn kill_test(&mut self, suites: &mut SuiteSet) {
        let Some(rt) = self.cur_run_test else {
            return;
        };
        let test_idx = self.run_order[rt];
        let suite = &mut suites.suites[self.cur_suite];
        suite.errors = true;
        suite.tests[test_idx].errors = true;
        self.update_must_pass(suites, test_idx);
        self.cur_step = None;
        self.cur_run_test = self.next_runnable(suites, rt + 1);
    }

    /// Checks a reply against the current step's expectation.
    pub fn handle_reply(
        &mut self,
        suites: &mut SuiteSet,
        snapshots: &mut dyn SnapshotStore,
        reply: &Reply,
    ) {
        if self.state != RunState::RunTest {
            if !self.is_busy() {
                debug!("Dropping test reply because no test-suite is active");
            }
            return;
        }
        let suite_name = suites.suites[self.cur_suite].name.clone();
        let test_name = self
            .cur_run_test
            .map(|rt| suites.suites[self.cur_suite].tests[self.run_order[rt]].name.clone())
            .unwrap_or_default();
        let indent = self.indent;
        let Some(step) = self.current_step_mut(suites) else {
            return;
        };

        let got = response_type(reply.kind);
        step.outcome.done = true;
        step.outcome.result = Some(got);
        step.outcome.stopped_at = Some(Local::now());

        if !step.result_type.is_wildcard() && step.result_type != got {
            step.outcome.result_wrong = true;
            info!(
                "Error: step {} in test '{suite_name}/{test_name}'\nGot response type '{got}', expected '{}'",
                step.name, step.result_type
            );
            return;
        }
        match got {
            ResponseType::Error => check_error(step, reply),
            ResponseType::Data => {
                let key = SnapshotKey::new(&suite_name, &test_name, &step.name);
                check_data(step, reply, snapshots, &key, indent);
            }
            _ => {}
        }
    }

    /// Marks the current step as timed out and fails its test.
    pub fn handle_timeout(&mut self, suites: &mut SuiteSet) {
        if self.state != RunState::RunTest {
            return;
        }
        if let Some(step) = self.current_step_mut(suites) {
            step.outcome.timed_out = true;
            step.outcome.done = true;
        }
        self.kill_test(suites);
    }

    /// Session the next line must run in. A step names its own session;
    /// local-only steps run in the current one.
    pub fn target_session(&self, suites: &SuiteSet, current_session: &str) -> Option<String> {
        if !self.is_busy() {
            return None;
        }
        let step = self
            .cur_run_test
            .and_then(|rt| self.run_order.get(rt))
            .and_then(|&t| suites.suites[self.cur_suite].tests[t].steps.get(self.cur_step?))
            .filter(|_| self.state == RunState::RunTest);
        if let Some(step) = step {
            if let Some(name) = &step.session_name {
                return Some(name.clone());
            }
            if step.result_type == ResponseType::No {
                return Some(current_session.to_string());
            }
        }
        self.test_session.clone()
    }

    pub fn stop(&mut self, suites: &mut SuiteSet, reason: StopReason) -> Result<()> {
        let name = suites
            .suites
            .get(self.cur_suite)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        if self.state == RunState::Done {
            self.input_mode = false;
            info!("Finished test-suite '{name}'");
            return Ok(());
        }
        if !self.is_busy() {
            return Err(NcliError::invalid_state("no test-suite is active"));
        }

        self.input_mode = false;
        let detail = match &reason {
            StopReason::Finished | StopReason::Cancelled => {
                self.state = RunState::Done;
                "canceled".to_string()
            }
            StopReason::Failed(msg) => {
                self.state = RunState::Error;
                msg.clone()
            }
        };
        info!("Stopping test-suite '{name}': {detail}");
        if let Some(suite) = suites.suites.get_mut(self.cur_suite) {
            if suite.any_test_errors() || matches!(reason, StopReason::Failed(_)) {
                suite.errors = true;
            }
            self.reports.push(SuiteReport::from_suite(suite));
        }
        Ok(())
    }
}

fn check_error(step: &mut Step, reply: &Reply) {
    let Some(err) = reply.errors.first() else {
        error!("Error: no <rpc-error> element found");
        return;
    };
    if step.result_error_tag.as_ref().is_some_and(|want| *want != err.tag) {
        step.outcome.tag_wrong = true;
        step.outcome.error_tag = Some(err.tag.clone());
    }
    if let Some(want) = &step.result_error_apptag {
        match &err.app_tag {
            None => {
                step.outcome.apptag_wrong = true;
                error!("Error: no <error-app-tag> element found");
            }
            Some(got) if got != want => {
                step.outcome.apptag_wrong = true;
                step.outcome.error_apptag = Some(got.clone());
            }
            Some(_) => {}
        }
    }
    for name in &step.result_error_info {
        if !err.info.iter().any(|n| &n.name == name) {
            step.outcome.info_wrong = true;
            error!("Error: no <{name}> child within <error-info> element found");
        }
    }
}

fn check_data(
    step: &mut Step,
    reply: &Reply,
    snapshots: &mut dyn SnapshotStore,
    key: &SnapshotKey,
    indent: usize,
) {
    let payload = reply.payload();
    match step.result_data_type {
        DataKind::Unset | DataKind::AnyData => {}
        DataKind::DataEmpty => step.outcome.data_wrong = !payload.children.is_empty(),
        DataKind::DataNonEmpty => step.outcome.data_wrong = payload.children.is_empty(),
        DataKind::DataMatch => {
            if let Err(e) = compare_snapshot(step, &payload, snapshots, key, indent) {
                error!("Snapshot check for step '{}' failed: {e}", step.name);
                step.outcome.local_error = true;
            }
        }
    }
}

/// Writes the run copy, then compares it byte for byte with the recorded
/// copy. A missing recorded copy is created from this reply.
fn compare_snapshot(
    step: &mut Step,
    payload: &crate::document::Node,
    snapshots: &mut dyn SnapshotStore,
    key: &SnapshotKey,
    indent: usize,
) -> Result<()> {
    let current = payload.to_xml(indent)?;
    snapshots.write(key, SnapshotKind::Run, &current)?;
    match snapshots.read(key, SnapshotKind::Record)? {
        None => {
            info!("No existing recorded data of STEP '{}', recording this reply", step.name);
            snapshots.write(key, SnapshotKind::Record, &current)?;
        }
        Some(recorded) if recorded == current => {
            info!("Validate reply data O.K. at STEP '{}'", step.name);
        }
        Some(_) => {
            info!("Validate reply data failed at STEP '{}'", step.name);
            step.outcome.data_wrong = true;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Node;
    use crate::testsuite::{MemorySnapshotStore, Step, Suite, Test};

    fn ok_reply() -> Reply {
        Reply::classify(Node::new("rpc-reply").with_child(Node::new("ok")))
    }

    fn data_reply(v: &str) -> Reply {
        Reply::classify(
            Node::new("rpc-reply").with_child(Node::new("data").with_child(Node::leaf("a", v))),
        )
    }

    fn suites() -> SuiteSet {
        let mut suite = Suite::new("s1")
            .with_test(
                Test::new("t1")
                    .with_step(Step::new("1", "lock target=running").expect(ResponseType::Ok))
                    .with_step(Step::new("2", "get").expect(ResponseType::Data)),
            )
            .with_test(Test::new("t2").with_must_pass("t1").with_step(Step::new("1", "commit")));
        suite.setup.push("$x = 1".into());
        suite.cleanup.push("unlock target=running".into());
        SuiteSet {
            suites: vec![suite],
        }
    }

    #[test]
    fn test_full_run_sequence() {
        let mut set = suites();
        let mut snaps = MemorySnapshotStore::default();
        let mut engine = TestRunEngine::new();
        engine.start(&mut set, Some("s1"), "default").unwrap();
        assert_eq!(engine.state(), RunState::Setup);

        assert_eq!(engine.next_line(&mut set).as_deref(), Some("$x = 1"));
        engine.handle_return(&mut set, Ok(()), false);

        assert_eq!(engine.next_line(&mut set).as_deref(), Some("lock target=running"));
        assert_eq!(engine.state(), RunState::RunTest);
        engine.handle_return(&mut set, Ok(()), true);
        engine.handle_reply(&mut set, &mut snaps, &ok_reply());

        assert_eq!(engine.next_line(&mut set).as_deref(), Some("get"));
        engine.handle_return(&mut set, Ok(()), true);
        engine.handle_reply(&mut set, &mut snaps, &data_reply("1"));

        assert_eq!(engine.next_line(&mut set).as_deref(), Some("commit"));
        engine.handle_return(&mut set, Ok(()), true);
        engine.handle_reply(&mut set, &mut snaps, &ok_reply());

        assert_eq!(engine.next_line(&mut set).as_deref(), Some("unlock target=running"));
        assert_eq!(engine.state(), RunState::Cleanup);
        engine.handle_return(&mut set, Ok(()), true);

        assert_eq!(engine.next_line(&mut set), None);
        assert_eq!(engine.state(), RunState::Done);
        engine.stop(&mut set, StopReason::Finished).unwrap();
        let reports = engine.take_reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].passed());
    }

    #[test]
    fn test_failed_must_pass_skips_dependent() {
        let mut set = suites();
        set.suites[0].setup.clear();
        set.suites[0].cleanup.clear();
        let mut snaps = MemorySnapshotStore::default();
        let mut engine = TestRunEngine::new();
        engine.start(&mut set, Some("s1"), "default").unwrap();

        engine.next_line(&mut set);
        engine.handle_return(&mut set, Ok(()), true);
        engine.handle_reply(&mut set, &mut snaps, &data_reply("x"));

        engine.next_line(&mut set);
        engine.handle_return(&mut set, Ok(()), true);
        engine.handle_reply(&mut set, &mut snaps, &data_reply("x"));

        assert_eq!(engine.next_line(&mut set), None);
        let t2 = set.suites[0].find_test("t2").unwrap();
        assert!(!t2.started);
        let report = &engine.take_reports()[0];
        assert_eq!(report.tests[1].verdict, Verdict::Skipped);
        assert_eq!(report.verdict, Verdict::Failed);
    }

    #[test]
    fn test_local_failure_skips_rest_of_test() {
        let mut set = suites();
        set.suites[0].setup.clear();
        let mut engine = TestRunEngine::new();
        engine.start(&mut set, Some("s1"), "default").unwrap();

        engine.next_line(&mut set);
        let err = NcliError::execution("bad command");
        engine.handle_return(&mut set, Err(&err), false);

        // t1 failed, t2 depends on it, so cleanup is next
        assert_eq!(engine.next_line(&mut set).as_deref(), Some("unlock target=running"));
        assert!(set.suites[0].errors);
    }

    #[test]
    fn test_setup_failure_is_fatal() {
        let mut set = suites();
        let mut engine = TestRunEngine::new();
        engine.start(&mut set, Some("s1"), "default").unwrap();
        engine.next_line(&mut set);
        let err = NcliError::execution("boom");
        engine.handle_return(&mut set, Err(&err), false);
        assert_eq!(engine.state(), RunState::Error);
        assert_eq!(engine.next_line(&mut set), None);
        assert!(!engine.is_active());
    }

    #[test]
    fn test_data_match_creates_then_compares_snapshot() {
        let mut set = SuiteSet {
            suites: vec![Suite::new("s").with_test(Test::new("t").with_step({
                let mut s = Step::new("1", "get").expect(ResponseType::Data);
                s.result_data_type = DataKind::DataMatch;
                s
            }))],
        };
        let mut snaps = MemorySnapshotStore::default();
        for (value, wrong) in [("1", false), ("1", false), ("2", true)] {
            let mut engine = TestRunEngine::new();
            engine.start(&mut set, Some("s"), "default").unwrap();
            engine.next_line(&mut set);
            engine.handle_reply(&mut set, &mut snaps, &data_reply(value));
            assert_eq!(set.suites[0].tests[0].steps[0].outcome.data_wrong, wrong);
        }
        assert_eq!(snaps.len(), 2);
    }

    #[test]
    fn test_error_expectations() {
        let mut step = Step::new("1", "lock target=running").expect(ResponseType::Error);
        step.result_error_tag = Some("lock-denied".into());
        step.result_error_apptag = Some("x".into());
        step.result_error_info = vec!["session-id".into()];
        let reply = Reply::classify(
            Node::new("rpc-reply").with_child(
                Node::new("rpc-error")
                    .with_child(Node::leaf("error-tag", "in-use"))
                    .with_child(Node::new("error-info").with_child(Node::leaf("session-id", "4"))),
            ),
        );
        check_error(&mut step, &reply);
        assert!(step.outcome.tag_wrong);
        assert_eq!(step.outcome.error_tag.as_deref(), Some("in-use"));
        assert!(step.outcome.apptag_wrong);
        assert!(!step.outcome.info_wrong);
    }

    #[test]
    fn test_target_session_rules() {
        let mut set = suites();
        set.suites[0].setup.clear();
        set.suites[0].tests[0].steps[0].session_name = Some("other".into());
        let mut engine = TestRunEngine::new();
        assert_eq!(engine.target_session(&set, "cur"), None);
        engine.start(&mut set, Some("s1"), "start").unwrap();
        engine.next_line(&mut set);
        assert_eq!(engine.target_session(&set, "cur").as_deref(), Some("other"));
    }

    #[test]
    fn test_start_errors() {
        let mut set = suites();
        let mut engine = TestRunEngine::new();
        assert!(engine.start(&mut set, Some("nope"), "d").unwrap_err().is_not_found());
        set.suites[0].run_tests.push("ghost".into());
        let mut engine = TestRunEngine::new();
        assert!(engine.start(&mut set, Some("s1"), "d").is_err());
        let mut engine = TestRunEngine::new();
        assert!(engine.stop(&mut set, StopReason::Cancelled).is_err());
    }

    #[test]
    fn test_run_all_chains_suites() {
        let mut set = SuiteSet {
            suites: vec![
                Suite::new("a").with_test(Test::new("t").with_step(Step::new("1", "get"))),
                Suite::new("b").with_test(Test::new("t").with_step(Step::new("1", "commit"))),
            ],
        };
        let mut snaps = MemorySnapshotStore::default();
        let mut engine = TestRunEngine::new();
        engine.start(&mut set, None, "d").unwrap();
        assert_eq!(engine.next_line(&mut set).as_deref(), Some("get"));
        engine.handle_reply(&mut set, &mut snaps, &data_reply("1"));
        assert_eq!(engine.next_line(&mut set).as_deref(), Some("commit"));
        engine.handle_reply(&mut set, &mut snaps, &ok_reply());
        assert_eq!(engine.next_line(&mut set), None);
        assert_eq!(engine.take_reports().len(), 2);
    }
}
