//! Async event loop around the synchronous `ServerContext`.
//!
//! The context never blocks; the loop feeds it user lines and pumps it on a
//! fixed tick so replies, retries and timeouts make progress while the user
//! is typing.

use ncli_core::error::{NcliError, Result};
use ncli_core::transport::{LineOrigin, LineSource, MessageId};
use ncli_core::{ClientEvent, ServerContext};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopInput {
    Line(String),
    /// Ctrl-C while a command is running
    Interrupt,
    Quit,
}

#[derive(Debug, Clone)]
pub enum LoopOutput {
    Events(Vec<ClientEvent>),
    /// The context is ready for the next line
    Prompt(String),
    Error(NcliError),
}

/// Result of one line run to completion.
#[derive(Debug)]
pub struct LineOutcome {
    pub result: Result<Option<MessageId>>,
    pub events: Vec<ClientEvent>,
}

pub struct EventLoop {
    ctx: ServerContext,
    tick: Duration,
}

impl EventLoop {
    pub fn new(ctx: ServerContext) -> Self {
        Self {
            ctx,
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn context(&self) -> &ServerContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut ServerContext {
        &mut self.ctx
    }

    pub fn into_context(self) -> ServerContext {
        self.ctx
    }

    /// Pumps until the context asks for user input again.
    pub async fn settle(&mut self, limit: Duration) -> Result<()> {
        let deadline = Instant::now() + limit;
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            self.ctx.pump();
            if self.ctx.wants_user_input() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(NcliError::timeout(format!(
                    "still busy after {}s",
                    limit.as_secs()
                )));
            }
            interval.tick().await;
        }
    }

    /// Runs one line and everything it starts (scripts, test runs,
    /// automatic sequences), then hands back the events it produced.
    pub async fn execute(&mut self, line: &str, limit: Duration) -> LineOutcome {
        let mut result = self.ctx.handle_line(line, LineOrigin::User);
        if let Err(e) = self.settle(limit).await {
            warn!("'{line}' did not finish: {e}");
            self.ctx.interrupt();
            self.ctx.pump();
            if result.is_ok() {
                result = Err(e);
            }
        }
        LineOutcome {
            result,
            events: self.ctx.drain_events(),
        }
    }

    /// Runs every line of `source` in turn, each to completion.
    pub async fn feed(&mut self, source: &mut dyn LineSource, limit: Duration) -> Vec<LineOutcome> {
        let mut outcomes = Vec::new();
        while let Some(line) = source.next_line(&self.ctx.prompt()) {
            if line.trim().is_empty() {
                continue;
            }
            outcomes.push(self.execute(&line, limit).await);
        }
        outcomes
    }

    /// Interactive loop. Returns the context after `Quit`, a closed input
    /// channel or cancellation; every session is shut down by then.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<LoopInput>,
        output: mpsc::UnboundedSender<LoopOutput>,
        cancel: CancellationToken,
    ) -> ServerContext {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut prompted = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = input.recv() => match msg {
                    None | Some(LoopInput::Quit) => break,
                    Some(LoopInput::Line(line)) => {
                        prompted = false;
                        if let Err(e) = self.ctx.handle_line(&line, LineOrigin::User) {
                            let _ = output.send(LoopOutput::Error(e));
                        }
                        self.ctx.pump();
                    }
                    Some(LoopInput::Interrupt) => {
                        debug!("interrupt");
                        self.ctx.interrupt();
                        self.ctx.pump();
                    }
                },
                _ = interval.tick() => self.ctx.pump(),
            }

            let events = self.ctx.drain_events();
            if !events.is_empty() && output.send(LoopOutput::Events(events)).is_err() {
                break;
            }
            if self.ctx.wants_user_input() && !prompted {
                prompted = true;
                if output.send(LoopOutput::Prompt(self.ctx.prompt())).is_err() {
                    break;
                }
            }
        }

        self.ctx.shutdown();
        self.ctx
    }
}
