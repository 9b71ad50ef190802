//! Object/schema model contract.
//!
//! The core only asks the schema model to look up command descriptors so it
//! can validate parameters and build request documents. It never mutates it.
//! `BuiltinSchema` describes the base protocol operations plus the client's
//! local commands, which is enough to run without retrieved modules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Module that owns the client's local commands.
pub const LOCAL_MODULE: &str = "ncli";
/// Module that owns the base protocol operations.
pub const BASE_MODULE: &str = "ietf-netconf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Remote operation sent to the server
    Rpc,
    /// Command handled inside the client
    LocalCommand,
}

/// Parameter data type, as far as command parsing and recording care.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    String,
    Uint32,
    Boolean,
    /// Presence-only flag, written as a bare name
    Empty,
    /// String that is never echoed, recorded verbatim
    Password,
    Enumeration(Vec<String>),
    /// Container with a single empty child naming a datastore (`source=running`)
    Datastore,
    /// Arbitrary subtree, only settable from a variable
    AnyData,
}

impl ParamType {
    pub fn is_simple(&self) -> bool {
        !matches!(self, ParamType::Datastore | ParamType::AnyData)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    pub name: String,
    pub ty: ParamType,
    pub mandatory: bool,
    pub default: Option<String>,
}

impl ParamDescriptor {
    pub fn new(name: &str, ty: ParamType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            mandatory: false,
            default: None,
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn with_default(mut self, value: &str) -> Self {
        self.default = Some(value.to_string());
        self
    }
}

/// Describes one command or remote operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub name: String,
    pub module: String,
    pub kind: ObjectKind,
    pub description: String,
    pub params: Vec<ParamDescriptor>,
}

impl ObjectDescriptor {
    pub fn rpc(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            module: BASE_MODULE.to_string(),
            kind: ObjectKind::Rpc,
            description: description.to_string(),
            params: Vec::new(),
        }
    }

    pub fn local(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            module: LOCAL_MODULE.to_string(),
            kind: ObjectKind::LocalCommand,
            description: description.to_string(),
            params: Vec::new(),
        }
    }

    pub fn in_module(mut self, module: &str) -> Self {
        self.module = module.to_string();
        self
    }

    pub fn param(mut self, param: ParamDescriptor) -> Self {
        self.params.push(param);
        self
    }

    pub fn find_param(&self, name: &str) -> Option<&ParamDescriptor> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn is_local(&self) -> bool {
        self.kind == ObjectKind::LocalCommand
    }
}

/// Read-only lookup contract consumed by the core.
pub trait SchemaModel: Send {
    /// Finds an object by path. With `module = None` every module is searched.
    fn find_object(&self, module: Option<&str>, path: &str) -> Option<&ObjectDescriptor>;

    /// Returns true if the module (and revision, when given) is available locally.
    fn has_module(&self, name: &str, revision: Option<&str>) -> bool;

    /// All command names, used for completion and help.
    fn command_names(&self) -> Vec<String>;
}

/// Schema model holding the base protocol and local commands.
#[derive(Debug, Clone, Default)]
pub struct BuiltinSchema {
    objects: BTreeMap<String, ObjectDescriptor>,
    modules: BTreeMap<String, Option<String>>,
}

impl BuiltinSchema {
    /// Base protocol operations plus local commands.
    pub fn standard() -> Self {
        let mut schema = Self::default();
        schema.add_module("ietf-netconf", Some("2011-06-01"));
        schema.add_module("ietf-netconf-monitoring", Some("2010-10-04"));
        schema.add_module("notifications", Some("2008-07-14"));
        schema.add_module(LOCAL_MODULE, None);
        for obj in base_operations().into_iter().chain(local_commands()) {
            schema.add_object(obj);
        }
        schema
    }

    pub fn add_object(&mut self, obj: ObjectDescriptor) {
        self.objects.insert(obj.name.clone(), obj);
    }

    /// Builder-style variant of `add_object`.
    pub fn with_object(mut self, obj: ObjectDescriptor) -> Self {
        self.add_object(obj);
        self
    }

    pub fn add_module(&mut self, name: &str, revision: Option<&str>) {
        self.modules
            .insert(name.to_string(), revision.map(str::to_string));
    }
}

impl SchemaModel for BuiltinSchema {
    fn find_object(&self, module: Option<&str>, path: &str) -> Option<&ObjectDescriptor> {
        let name = path.trim_start_matches('/');
        let name = name.rsplit(':').next().unwrap_or(name);
        let obj = self.objects.get(name)?;
        match module {
            Some(m) if m != obj.module => None,
            _ => Some(obj),
        }
    }

    fn has_module(&self, name: &str, revision: Option<&str>) -> bool {
        match (self.modules.get(name), revision) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(have), Some(want)) => have.as_deref().is_none_or(|h| h == want),
        }
    }

    fn command_names(&self) -> Vec<String> {
        self.objects.keys().cloned().collect()
    }
}

fn datastore(name: &str) -> ParamDescriptor {
    ParamDescriptor::new(name, ParamType::Datastore)
}

fn base_operations() -> Vec<ObjectDescriptor> {
    use ParamType::*;
    vec![
        ObjectDescriptor::rpc("get", "Retrieve running configuration and state data")
            .param(ParamDescriptor::new("filter", AnyData))
            .param(ParamDescriptor::new("with-defaults", Enumeration(vec![
                "report-all".into(),
                "trim".into(),
                "explicit".into(),
            ]))),
        ObjectDescriptor::rpc("get-config", "Retrieve all or part of a configuration datastore")
            .param(datastore("source").mandatory())
            .param(ParamDescriptor::new("filter", AnyData)),
        ObjectDescriptor::rpc("edit-config", "Load configuration into a target datastore")
            .param(datastore("target").mandatory())
            .param(ParamDescriptor::new("default-operation", Enumeration(vec![
                "merge".into(),
                "replace".into(),
                "none".into(),
            ])))
            .param(ParamDescriptor::new("config", AnyData).mandatory()),
        ObjectDescriptor::rpc("copy-config", "Copy one datastore to another")
            .param(datastore("target").mandatory())
            .param(datastore("source").mandatory()),
        ObjectDescriptor::rpc("delete-config", "Delete a configuration datastore")
            .param(datastore("target").mandatory()),
        ObjectDescriptor::rpc("lock", "Lock a configuration datastore")
            .param(datastore("target").mandatory()),
        ObjectDescriptor::rpc("unlock", "Release a datastore lock")
            .param(datastore("target").mandatory()),
        ObjectDescriptor::rpc("discard-changes", "Revert the candidate to the running configuration"),
        ObjectDescriptor::rpc("commit", "Commit the candidate configuration"),
        ObjectDescriptor::rpc("validate", "Validate a datastore")
            .param(datastore("source").mandatory()),
        ObjectDescriptor::rpc("close-session", "Gracefully close this session"),
        ObjectDescriptor::rpc("kill-session", "Force termination of another session")
            .param(ParamDescriptor::new("session-id", Uint32).mandatory()),
        ObjectDescriptor::rpc("get-schema", "Retrieve a schema module from the server")
            .in_module("ietf-netconf-monitoring")
            .param(ParamDescriptor::new("identifier", String).mandatory())
            .param(ParamDescriptor::new("version", String))
            .param(ParamDescriptor::new("format", String).with_default("yang")),
        ObjectDescriptor::rpc("create-subscription", "Start a notification subscription")
            .in_module("notifications")
            .param(ParamDescriptor::new("stream", String))
            .param(ParamDescriptor::new("startTime", String))
            .param(ParamDescriptor::new("stopTime", String)),
    ]
}

fn local_commands() -> Vec<ObjectDescriptor> {
    use ParamType::*;
    vec![
        ObjectDescriptor::local("connect", "Connect the current session to a server")
            .param(ParamDescriptor::new("host", String).mandatory())
            .param(ParamDescriptor::new("port", Uint32).with_default("830"))
            .param(ParamDescriptor::new("user", String))
            .param(ParamDescriptor::new("password", Password)),
        ObjectDescriptor::local("session", "Manage named sessions")
            .param(ParamDescriptor::new("list", Empty))
            .param(ParamDescriptor::new("set-current", String))
            .param(ParamDescriptor::new("add", String))
            .param(ParamDescriptor::new("delete", String)),
        ObjectDescriptor::local("get-locks", "Lock every datastore the server supports")
            .param(ParamDescriptor::new("lock-timeout", Uint32))
            .param(ParamDescriptor::new("retry-interval", Uint32))
            .param(ParamDescriptor::new("cleanup", Boolean)),
        ObjectDescriptor::local("release-locks", "Unlock the datastores locked by get-locks"),
        ObjectDescriptor::local("save", "Save the configuration to non-volatile storage"),
        ObjectDescriptor::local("update-config", "Refresh the shadow configuration"),
        ObjectDescriptor::local("apply-config", "Edit the default target with a variable's tree and save")
            .param(ParamDescriptor::new("var", String).mandatory()),
        ObjectDescriptor::local("auto-test", "Send random edits to a target node and save after each")
            .param(ParamDescriptor::new("target", String).mandatory())
            .param(ParamDescriptor::new("iterations", Uint32).with_default("1"))
            .param(ParamDescriptor::new("session-name", String)),
        ObjectDescriptor::local("record-test", "Record commands into a test")
            .param(ParamDescriptor::new("start", Empty))
            .param(ParamDescriptor::new("finish", Empty))
            .param(ParamDescriptor::new("cancel", Empty))
            .param(ParamDescriptor::new("pause", Empty))
            .param(ParamDescriptor::new("resume", Empty))
            .param(ParamDescriptor::new("suite-name", String))
            .param(ParamDescriptor::new("test-name", String)),
        ObjectDescriptor::local("test-suite", "Run and manage test suites")
            .param(ParamDescriptor::new("run", String))
            .param(ParamDescriptor::new("run-all", Empty))
            .param(ParamDescriptor::new("list", Empty))
            .param(ParamDescriptor::new("show", String))
            .param(ParamDescriptor::new("delete", String))
            .param(ParamDescriptor::new("test", String))
            .param(ParamDescriptor::new("stop", Empty)),
        ObjectDescriptor::local("run", "Run a script file")
            .param(ParamDescriptor::new("file", String).mandatory()),
    ]
}
