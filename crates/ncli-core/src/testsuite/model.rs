use crate::error::{NcliError, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;

/// Expected (or observed) reply class of a step.
///
/// `None` is an unrecognised value, `No` is an explicit "none" (local
/// command, no reply) and `Any` is the default when nothing was given.
/// All three display as "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    None,
    No,
    #[default]
    Any,
    Ok,
    Data,
    Error,
}

impl ResponseType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseType::None | ResponseType::No | ResponseType::Any => "none",
            ResponseType::Ok => "ok",
            ResponseType::Data => "data",
            ResponseType::Error => "error",
        }
    }

    pub fn parse(text: &str) -> Self {
        match text {
            "ok" => ResponseType::Ok,
            "data" => ResponseType::Data,
            "error" => ResponseType::Error,
            "none" => ResponseType::No,
            _ => ResponseType::None,
        }
    }

    /// Unset and absent expectations accept any reply class.
    pub fn is_wildcard(self) -> bool {
        matches!(self, ResponseType::None | ResponseType::Any)
    }

    fn is_any(&self) -> bool {
        *self == ResponseType::Any
    }
}

impl std::fmt::Display for ResponseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ResponseType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ResponseType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(ResponseType::parse(&text))
    }
}

/// How a `data` reply is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DataKind {
    AnyData,
    DataEmpty,
    DataNonEmpty,
    /// Compare with the recorded snapshot
    DataMatch,
    #[default]
    #[serde(other)]
    Unset,
}

impl DataKind {
    fn is_unset(&self) -> bool {
        *self == DataKind::Unset
    }
}

/// Run-time results of a step. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub started_at: Option<DateTime<Local>>,
    pub stopped_at: Option<DateTime<Local>>,
    pub result: Option<ResponseType>,
    pub error_tag: Option<String>,
    pub error_apptag: Option<String>,
    pub done: bool,
    pub result_wrong: bool,
    pub timed_out: bool,
    pub local_error: bool,
    pub tag_wrong: bool,
    pub apptag_wrong: bool,
    pub info_wrong: bool,
    pub data_wrong: bool,
}

impl StepOutcome {
    pub fn any_error(&self) -> bool {
        self.result_wrong
            || self.timed_out
            || self.local_error
            || self.tag_wrong
            || self.apptag_wrong
            || self.info_wrong
            || self.data_wrong
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    pub command: String,
    #[serde(default, skip_serializing_if = "ResponseType::is_any")]
    pub result_type: ResponseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_error_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_error_apptag: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result_error_info: Vec<String>,
    #[serde(default, skip_serializing_if = "DataKind::is_unset")]
    pub result_data_type: DataKind,
    #[serde(skip)]
    pub outcome: StepOutcome,
}

impl Step {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            session_name: None,
            command: command.into(),
            result_type: ResponseType::Any,
            result_error_tag: None,
            result_error_apptag: None,
            result_error_info: Vec::new(),
            result_data_type: DataKind::Unset,
            outcome: StepOutcome::default(),
        }
    }

    pub fn expect(mut self, result_type: ResponseType) -> Self {
        self.result_type = result_type;
        self
    }
}

/// One must-pass dependency with its run-time check state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct MustPass {
    pub name: String,
    pub checked: bool,
    pub passed: bool,
}

impl From<String> for MustPass {
    fn from(name: String) -> Self {
        Self {
            name,
            checked: false,
            passed: false,
        }
    }
}

impl From<MustPass> for String {
    fn from(m: MustPass) -> Self {
        m.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_pass: Vec<MustPass>,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
    #[serde(skip)]
    pub started: bool,
    #[serde(skip)]
    pub errors: bool,
}

impl Test {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            must_pass: Vec::new(),
            steps: Vec::new(),
            started: false,
            errors: false,
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_must_pass(mut self, name: &str) -> Self {
        self.must_pass.push(MustPass::from(name.to_string()));
        self
    }

    pub fn find_step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn any_step_errors(&self) -> bool {
        self.steps.iter().any(|s| s.outcome.any_error())
    }

    /// First must-pass dependency that has been checked and failed.
    pub fn failed_must_pass(&self) -> Option<&MustPass> {
        self.must_pass.iter().find(|m| m.checked && !m.passed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suite {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleanup: Vec<String>,
    #[serde(default)]
    pub run_tests: Vec<String>,
    #[serde(default, rename = "test")]
    pub tests: Vec<Test>,
    #[serde(skip)]
    pub started: bool,
    #[serde(skip)]
    pub errors: bool,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            setup: Vec::new(),
            cleanup: Vec::new(),
            run_tests: Vec::new(),
            tests: Vec::new(),
            started: false,
            errors: false,
        }
    }

    /// Adds a test and appends it to the run list.
    pub fn with_test(mut self, test: Test) -> Self {
        self.run_tests.push(test.name.clone());
        self.tests.push(test);
        self
    }

    pub fn find_test(&self, name: &str) -> Option<&Test> {
        self.tests.iter().find(|t| t.name == name)
    }

    pub fn find_test_mut(&mut self, name: &str) -> Option<&mut Test> {
        self.tests.iter_mut().find(|t| t.name == name)
    }

    /// Test and step names must be unique within their parent.
    pub fn validate(&self) -> Result<()> {
        let mut tests = BTreeSet::new();
        for test in &self.tests {
            if !tests.insert(test.name.as_str()) {
                return Err(NcliError::config(format!(
                    "duplicate test '{}' in suite '{}'",
                    test.name, self.name
                )));
            }
            let mut steps = BTreeSet::new();
            for step in &test.steps {
                if !steps.insert(step.name.as_str()) {
                    return Err(NcliError::config(format!(
                        "duplicate step '{}' in test '{}/{}'",
                        step.name, self.name, test.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Clears every run-time result before a new run.
    pub fn reset_results(&mut self) {
        self.started = false;
        self.errors = false;
        for test in &mut self.tests {
            test.started = false;
            test.errors = false;
            for m in &mut test.must_pass {
                m.checked = false;
                m.passed = false;
            }
            for step in &mut test.steps {
                step.outcome = StepOutcome::default();
            }
        }
    }

    /// Recomputes test error flags from step results; true if any failed.
    pub fn any_test_errors(&mut self) -> bool {
        let mut failed = false;
        for test in self.tests.iter_mut().filter(|t| t.started) {
            test.errors = test.any_step_errors();
            failed |= test.errors;
        }
        failed
    }
}

/// The persisted set of suites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteSet {
    #[serde(default, rename = "suite")]
    pub suites: Vec<Suite>,
}

impl SuiteSet {
    pub fn find(&self, name: &str) -> Option<&Suite> {
        self.suites.iter().find(|s| s.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Suite> {
        self.suites.iter_mut().find(|s| s.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.suites.iter().position(|s| s.name == name)
    }

    pub fn contains_test(&self, suite: &str, test: &str) -> bool {
        self.find(suite).is_some_and(|s| s.find_test(test).is_some())
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for suite in &self.suites {
            if !names.insert(suite.name.as_str()) {
                return Err(NcliError::config(format!("duplicate suite '{}'", suite.name)));
            }
            suite.validate()?;
        }
        Ok(())
    }

    /// Adds a recorded test: a new suite is appended whole, otherwise the
    /// test joins the existing suite and its run list.
    pub fn merge_recorded(&mut self, suite_name: &str, test: Test) -> Result<()> {
        match self.find_mut(suite_name) {
            None => {
                self.suites.push(Suite::new(suite_name).with_test(test));
                Ok(())
            }
            Some(suite) if suite.find_test(&test.name).is_some() => Err(NcliError::invalid_state(
                format!("duplicate suite-name {suite_name}, test-name {}", test.name),
            )),
            Some(suite) => {
                suite.run_tests.push(test.name.clone());
                suite.tests.push(test);
                Ok(())
            }
        }
    }

    pub fn delete_suite(&mut self, name: &str) -> Result<Suite> {
        let pos = self
            .position(name)
            .ok_or_else(|| NcliError::not_found("test-suite", name))?;
        Ok(self.suites.remove(pos))
    }

    /// Removes a test and its run-list entries.
    pub fn delete_test(&mut self, suite: &str, test: &str) -> Result<Test> {
        let s = self
            .find_mut(suite)
            .ok_or_else(|| NcliError::not_found("test-suite", suite))?;
        let pos = s
            .tests
            .iter()
            .position(|t| t.name == test)
            .ok_or_else(|| NcliError::not_found("test", format!("{suite}/{test}")))?;
        s.run_tests.retain(|r| r != test);
        Ok(s.tests.remove(pos))
    }
}
