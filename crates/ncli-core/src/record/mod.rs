//! Record engine.
//!
//! Captures executed commands and their replies as steps of a new test.
//! Only one recording exists at a time. The test is merged into the
//! persisted suite set on `finish`.

mod serialize;

pub use serialize::command_line;

use crate::command::ValidatedCommand;
use crate::error::{NcliError, Result};
use crate::rpc::{Reply, ReplyKind};
use crate::testsuite::{
    DataKind, ResponseType, SnapshotKey, SnapshotKind, SnapshotStore, Step, SuiteRepository,
    SuiteSet, Test,
};
use tracing::{debug, error, info};

/// Commands that drive the recorder or the runner are never captured.
const NOT_RECORDED: &[&str] = &["record-test", "test-suite"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum RecordState {
    #[default]
    None,
    InProgress,
    Paused,
}

/// What `finish` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishOutcome {
    /// The test had no steps and was dropped
    Empty,
    Saved { suite: String, test: String, steps: usize },
}

#[derive(Debug, Default)]
pub struct RecordEngine {
    state: RecordState,
    suite: String,
    test: Option<Test>,
    step_counter: u32,
    /// A captured request still waits for its reply
    awaiting_reply: bool,
    indent: usize,
}

impl RecordEngine {
    pub fn new() -> Self {
        Self {
            indent: 2,
            ..Default::default()
        }
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecordState::InProgress
    }

    /// Suite and test being recorded.
    pub fn target(&self) -> Option<(&str, &str)> {
        self.test
            .as_ref()
            .map(|t| (self.suite.as_str(), t.name.as_str()))
    }

    pub fn set_indent(&mut self, indent: usize) {
        self.indent = indent;
    }

    pub fn start(&mut self, suites: &SuiteSet, suite: &str, test: &str) -> Result<()> {
        if let Some((s, t)) = self.target() {
            info!("Recording is active: suite={s} test={t}");
            return Err(NcliError::busy(format!(
                "recording of {s}/{t} is already {}",
                self.state
            )));
        }
        if suites.contains_test(suite, test) {
            info!("Use a different suite or test name.");
            return Err(NcliError::invalid_state(format!(
                "duplicate suite-name {suite}, test-name {test}"
            )));
        }
        self.state = RecordState::InProgress;
        self.suite = suite.to_string();
        self.test = Some(Test::new(test));
        self.step_counter = 0;
        self.awaiting_reply = false;
        info!("Start recording: suite={suite} test={test}");
        Ok(())
    }

    /// Checks that a control command names the active recording. Names
    /// may be omitted.
    fn check_target(&self, suite: Option<&str>, test: Option<&str>) -> Result<()> {
        let Some((s, t)) = self.target() else {
            return Err(NcliError::invalid_state("no recording is active"));
        };
        if suite.is_some_and(|x| x != s) || test.is_some_and(|x| x != t) {
            return Err(NcliError::not_found(
                "recording",
                format!("{}/{}", suite.unwrap_or(s), test.unwrap_or(t)),
            ));
        }
        Ok(())
    }

    pub fn pause(&mut self, suite: Option<&str>, test: Option<&str>) -> Result<()> {
        self.check_target(suite, test)?;
        if self.state == RecordState::InProgress {
            info!("Pause recording: suite={}", self.suite);
            self.state = RecordState::Paused;
        }
        Ok(())
    }

    pub fn resume(&mut self, suite: Option<&str>, test: Option<&str>) -> Result<()> {
        self.check_target(suite, test)?;
        if self.state == RecordState::Paused {
            info!("Resume recording: suite={}", self.suite);
            self.state = RecordState::InProgress;
        }
        Ok(())
    }

    /// Drops everything captured so far.
    pub fn cancel(&mut self, suite: Option<&str>, test: Option<&str>) -> Result<()> {
        self.check_target(suite, test)?;
        info!("Recording canceled: suite={}", self.suite);
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.state = RecordState::None;
        self.suite.clear();
        self.test = None;
        self.step_counter = 0;
        self.awaiting_reply = false;
    }

    /// Merges the captured test into `suites` and saves them. An empty test
    /// is dropped without touching the suite set. On a save failure the
    /// merge is undone and the recording stays open.
    pub fn finish(
        &mut self,
        suites: &mut SuiteSet,
        repo: &mut dyn SuiteRepository,
        suite: Option<&str>,
        test: Option<&str>,
    ) -> Result<FinishOutcome> {
        self.check_target(suite, test)?;
        let Some(captured) = self.test.clone() else {
            return Err(NcliError::internal("recording has no test"));
        };
        if captured.steps.is_empty() {
            info!("An empty test will not be saved.");
            self.reset();
            return Ok(FinishOutcome::Empty);
        }

        let before = suites.clone();
        let (suite_name, test_name, steps) =
            (self.suite.clone(), captured.name.clone(), captured.steps.len());
        suites.merge_recorded(&suite_name, captured)?;
        if let Err(e) = repo.save(suites) {
            error!("Save recorded test failed ({e})");
            *suites = before;
            return Err(e);
        }
        info!("Finish recording: suite {suite_name} test {test_name}");
        self.reset();
        Ok(FinishOutcome::Saved {
            suite: suite_name,
            test: test_name,
            steps,
        })
    }

    /// Captures an executed command as a new step.
    pub fn record_command(&mut self, cmd: &ValidatedCommand, session_name: &str) -> Result<()> {
        if !self.is_recording() || NOT_RECORDED.contains(&cmd.name()) {
            return Ok(());
        }
        let command = command_line(cmd)?;
        let Some(test) = self.test.as_mut() else {
            return Ok(());
        };
        self.step_counter += 1;
        let mut step = Step::new(self.step_counter.to_string(), command);
        step.session_name = Some(session_name.to_string());
        step.result_type = ResponseType::No;
        debug!(step = %step.name, "recorded command: {}", step.command);
        test.steps.push(step);
        self.awaiting_reply = !cmd.is_local();
        Ok(())
    }

    /// Fills in the expectation of the last captured step from its reply.
    /// Data payloads become the step's reference snapshot.
    pub fn record_reply(&mut self, reply: &Reply, snapshots: &mut dyn SnapshotStore) -> Result<()> {
        if !self.is_recording() || !self.awaiting_reply {
            return Ok(());
        }
        self.awaiting_reply = false;
        let suite = self.suite.clone();
        let indent = self.indent;
        let Some(test) = self.test.as_mut() else {
            return Ok(());
        };
        let test_name = test.name.clone();
        let Some(step) = test.steps.last_mut() else {
            return Ok(());
        };
        match reply.kind {
            ReplyKind::Ok => step.result_type = ResponseType::Ok,
            ReplyKind::Error => {
                step.result_type = ResponseType::Error;
                step.result_error_tag = reply.error_tag().map(str::to_string);
            }
            ReplyKind::Data => {
                step.result_type = ResponseType::Data;
                step.result_data_type = DataKind::DataMatch;
                let key = SnapshotKey::new(&suite, &test_name, &step.name);
                snapshots.write(&key, SnapshotKind::Record, &reply.payload().to_xml(indent)?)?;
            }
        }
        Ok(())
    }
}
