#![allow(dead_code)]

use ncli_core::document::Node;
use ncli_core::error::Result;
use ncli_core::schema::{BuiltinSchema, SchemaModel};
use ncli_core::session::SessionPrefs;
use ncli_core::testsuite::{SuiteRepository, SuiteSet};
use ncli_core::transport::{
    Capabilities, ConnectParams, LineOrigin, ManualClock, MessageId, SessionId, Transport,
    TransportEvent,
};
use ncli_core::ServerContext;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct SentRequest {
    pub session: SessionId,
    pub message_id: MessageId,
    pub request: Node,
}

#[derive(Debug, Default)]
struct TransportState {
    next_id: MessageId,
    sent: Vec<SentRequest>,
    events: VecDeque<(SessionId, TransportEvent)>,
    capabilities: Capabilities,
    disconnected: Vec<SessionId>,
}

/// Transport double: records requests and hands out events queued by the
/// test. Clones share state so the test keeps a handle after the context
/// takes ownership.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<TransportState>>,
}

impl ScriptedTransport {
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        let transport = Self::default();
        transport.state.lock().unwrap().capabilities = capabilities;
        transport
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn last_sent(&self) -> SentRequest {
        self.state
            .lock()
            .unwrap()
            .sent
            .last()
            .cloned()
            .expect("a request was sent")
    }

    pub fn sent_names(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.request.name).collect()
    }

    pub fn disconnected(&self) -> Vec<SessionId> {
        self.state.lock().unwrap().disconnected.clone()
    }

    pub fn push_event(&self, session: SessionId, event: TransportEvent) {
        self.state.lock().unwrap().events.push_back((session, event));
    }

    pub fn reply(&self, to: &SentRequest, document: Node) {
        self.push_event(
            to.session,
            TransportEvent::Reply {
                message_id: to.message_id,
                result: Ok(document),
            },
        );
    }

    pub fn reply_ok(&self, to: &SentRequest) {
        self.reply(to, ok_reply());
    }

    pub fn reply_error(&self, to: &SentRequest, tag: &str) {
        self.reply(to, error_reply(tag));
    }

    pub fn reply_data(&self, to: &SentRequest, data: Node) {
        self.reply(to, Node::new("rpc-reply").with_child(data));
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, session: SessionId, _params: &ConnectParams) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let capabilities = state.capabilities.clone();
        state.events.push_back((session, TransportEvent::Accepted));
        state
            .events
            .push_back((session, TransportEvent::HelloComplete { capabilities }));
        Ok(())
    }

    fn send_request(&mut self, session: SessionId, request: &Node) -> Result<MessageId> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let message_id = state.next_id;
        state.sent.push(SentRequest {
            session,
            message_id,
            request: request.clone(),
        });
        Ok(message_id)
    }

    fn disconnect(&mut self, session: SessionId) {
        self.state.lock().unwrap().disconnected.push(session);
    }

    fn poll_event(&mut self) -> Option<(SessionId, TransportEvent)> {
        self.state.lock().unwrap().events.pop_front()
    }
}

/// Suite repository whose contents stay visible to the test.
#[derive(Debug, Clone, Default)]
pub struct SharedSuiteRepository {
    pub suites: Arc<Mutex<SuiteSet>>,
    pub saves: Arc<Mutex<usize>>,
}

impl SharedSuiteRepository {
    pub fn with_suites(suites: SuiteSet) -> Self {
        Self {
            suites: Arc::new(Mutex::new(suites)),
            saves: Arc::default(),
        }
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap()
    }
}

impl SuiteRepository for SharedSuiteRepository {
    fn load(&self) -> Result<SuiteSet> {
        Ok(self.suites.lock().unwrap().clone())
    }

    fn save(&mut self, suites: &SuiteSet) -> Result<()> {
        *self.suites.lock().unwrap() = suites.clone();
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }
}

pub fn ok_reply() -> Node {
    Node::new("rpc-reply").with_child(Node::new("ok"))
}

pub fn error_reply(tag: &str) -> Node {
    Node::new("rpc-reply").with_child(
        Node::new("rpc-error")
            .with_child(Node::leaf("error-type", "protocol"))
            .with_child(Node::leaf("error-tag", tag)),
    )
}

/// Quiet defaults: no automatic post-connect requests, no echo.
pub fn quiet_prefs() -> SessionPrefs {
    SessionPrefs {
        echo_replies: false,
        autoload: false,
        autoconfig: false,
        autonotif: false,
        ..SessionPrefs::default()
    }
}

pub struct Harness {
    pub ctx: ServerContext,
    pub transport: ScriptedTransport,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new(capabilities: Capabilities, prefs: SessionPrefs) -> Self {
        Self::with_schema(capabilities, prefs, Box::new(BuiltinSchema::standard()))
    }

    pub fn with_schema(
        capabilities: Capabilities,
        prefs: SessionPrefs,
        schema: Box<dyn SchemaModel>,
    ) -> Self {
        let transport = ScriptedTransport::with_capabilities(capabilities);
        let clock = ManualClock::new();
        let ctx = ServerContext::new(Box::new(transport.clone()), schema)
            .with_clock(Box::new(clock.clone()))
            .with_defaults(prefs);
        Self {
            ctx,
            transport,
            clock,
        }
    }

    /// Runs a user line and everything it triggers.
    pub fn line(&mut self, line: &str) -> Result<Option<MessageId>> {
        let result = self.ctx.handle_line(line, LineOrigin::User);
        self.ctx.pump();
        result
    }

    pub fn connect(&mut self) {
        self.line("connect host=lab.example.net").expect("connect");
        assert!(self.ctx.current_session().phase.is_connected());
    }

    pub fn session_id(&self) -> SessionId {
        self.ctx.current_id()
    }
}
