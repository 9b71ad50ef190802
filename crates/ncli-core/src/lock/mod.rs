//! Lock coordinator state.
//!
//! `LockTable` holds one `LockRecord` per datastore and decides which
//! `<lock>`/`<unlock>` to send next. It never sends anything itself; the
//! server context asks it for the next step, sends the request and reports
//! back with `mark_sent` and the reply handlers.
//!
//! Datastores are always walked in the order running, candidate, startup.

use crate::transport::Capabilities;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Error tag that marks a lock as held by someone else.
pub const LOCK_DENIED_TAG: &str = "lock-denied";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Datastore {
    Running,
    Candidate,
    Startup,
}

impl Datastore {
    pub const ALL: [Datastore; 3] = [Datastore::Running, Datastore::Candidate, Datastore::Startup];

    fn index(self) -> usize {
        match self {
            Datastore::Running => 0,
            Datastore::Candidate => 1,
            Datastore::Startup => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LockState {
    #[default]
    Idle,
    RequestSent,
    /// Lock denied; retried after the retry interval
    TempError,
    FatalError,
    Active,
    ReleaseSent,
    Released,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub datastore: Datastore,
    pub state: LockState,
    /// This datastore takes part in the current lock sequence
    pub used: bool,
    pub last_msg: Option<Instant>,
}

impl LockRecord {
    fn new(datastore: Datastore) -> Self {
        Self {
            datastore,
            state: LockState::Idle,
            used: false,
            last_msg: None,
        }
    }

    fn reset(&mut self) {
        self.state = LockState::Idle;
        self.used = false;
        self.last_msg = None;
    }
}

/// What to do next in an acquire sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStep {
    /// Send `<lock>` for this datastore
    Send(Datastore),
    /// Denied locks are pending retry; try again on a later tick
    Waiting,
    /// Every used datastore has been tried; check `all_acquired`
    Done,
    /// A used datastore ended in a fatal error
    Fatal(Datastore),
    /// The overall lock timeout expired
    TimedOut,
}

/// Reaction to a `<lock>` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReplyAction {
    /// Ask for the next acquire step
    Continue,
    /// Candidate failed hard: send `<discard-changes>` before giving up
    DiscardCandidate,
    /// Give up and clean up
    Abort,
}

/// Per-session lock table.
#[derive(Debug, Clone)]
pub struct LockTable {
    records: [LockRecord; 3],
    /// A get-locks sequence owns the table
    active: bool,
    /// Denied locks wait for their retry interval
    waiting: bool,
    current: Datastore,
    started: Option<Instant>,
    timeout: Duration,
    retry: Duration,
    cleanup: bool,
}

impl Default for LockTable {
    fn default() -> Self {
        Self {
            records: Datastore::ALL.map(LockRecord::new),
            active: false,
            waiting: false,
            current: Datastore::Running,
            started: None,
            timeout: Duration::from_secs(120),
            retry: Duration::from_secs(1),
            cleanup: true,
        }
    }
}

impl LockTable {
    pub fn record(&self, ds: Datastore) -> &LockRecord {
        &self.records[ds.index()]
    }

    fn record_mut(&mut self, ds: Datastore) -> &mut LockRecord {
        &mut self.records[ds.index()]
    }

    pub fn records(&self) -> impl Iterator<Item = &LockRecord> {
        self.records.iter()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn cleanup_enabled(&self) -> bool {
        self.cleanup
    }

    /// Datastore of the last request sent.
    pub fn current(&self) -> Datastore {
        self.current
    }

    /// Prepares a new get-locks sequence. Running is always locked;
    /// candidate and startup only when the server has them.
    pub fn setup(
        &mut self,
        caps: &Capabilities,
        timeout: Duration,
        retry: Duration,
        cleanup: bool,
        now: Instant,
    ) {
        for rec in &mut self.records {
            rec.reset();
        }
        self.active = true;
        self.waiting = false;
        self.current = Datastore::Running;
        self.started = Some(now);
        self.timeout = timeout;
        self.retry = retry;
        self.cleanup = cleanup;

        self.record_mut(Datastore::Running).used = true;
        self.record_mut(Datastore::Candidate).used = caps.has_candidate();
        self.record_mut(Datastore::Startup).used = caps.has_startup();
    }

    /// True once the overall timeout has run out. A zero timeout never
    /// expires.
    pub fn timed_out(&self, now: Instant) -> bool {
        match self.started {
            Some(start) if !self.timeout.is_zero() => now.duration_since(start) >= self.timeout,
            _ => false,
        }
    }

    /// Picks the next `<lock>` to send.
    pub fn next_acquire(&mut self, first: bool, now: Instant) -> AcquireStep {
        if first {
            self.started = Some(now);
        } else if self.timed_out(now) {
            return AcquireStep::TimedOut;
        }

        for rec in self.records.iter().filter(|r| r.used) {
            match rec.state {
                LockState::Idle => return AcquireStep::Send(rec.datastore),
                LockState::FatalError => return AcquireStep::Fatal(rec.datastore),
                _ => {}
            }
        }

        let mut still_waiting = false;
        for rec in self
            .records
            .iter()
            .filter(|r| r.used && r.state == LockState::TempError)
        {
            let due = rec
                .last_msg
                .is_none_or(|sent| now.duration_since(sent) >= self.retry);
            if due {
                return AcquireStep::Send(rec.datastore);
            }
            still_waiting = true;
        }

        if still_waiting {
            self.waiting = true;
            AcquireStep::Waiting
        } else {
            AcquireStep::Done
        }
    }

    /// Records that a `<lock>` (or `<unlock>`) for `ds` went out.
    pub fn mark_sent(&mut self, ds: Datastore, lock: bool, now: Instant) {
        let rec = self.record_mut(ds);
        rec.state = if lock {
            LockState::RequestSent
        } else {
            LockState::ReleaseSent
        };
        rec.last_msg = Some(now);
        self.current = ds;
    }

    /// Applies a `<lock>` reply for the current datastore.
    /// `error_tag` is `None` for a successful reply.
    pub fn on_lock_reply(&mut self, error_tag: Option<&str>) -> LockReplyAction {
        let ds = self.current;
        match error_tag {
            None => {
                self.record_mut(ds).state = LockState::Active;
                LockReplyAction::Continue
            }
            Some(LOCK_DENIED_TAG) => {
                self.record_mut(ds).state = LockState::TempError;
                LockReplyAction::Continue
            }
            Some(_) => {
                self.record_mut(ds).state = LockState::FatalError;
                if ds == Datastore::Candidate {
                    LockReplyAction::DiscardCandidate
                } else {
                    LockReplyAction::Abort
                }
            }
        }
    }

    /// True when every used datastore is locked.
    pub fn all_acquired(&self) -> bool {
        self.records
            .iter()
            .filter(|r| r.used)
            .all(|r| r.state == LockState::Active)
    }

    /// Starts a release sequence. Returns true if any lock is held.
    pub fn begin_release(&mut self, now: Instant) -> bool {
        self.started = Some(now);
        self.waiting = false;
        self.records
            .iter()
            .any(|r| r.used && r.state == LockState::Active)
    }

    /// Next datastore that needs an `<unlock>`.
    pub fn next_release(&self) -> Option<Datastore> {
        self.records
            .iter()
            .find(|r| r.used && r.state == LockState::Active)
            .map(|r| r.datastore)
    }

    /// Applies an `<unlock>` reply. A failed unlock is terminal so it is
    /// never retried.
    pub fn on_unlock_reply(&mut self, ok: bool) {
        let ds = self.current;
        self.record_mut(ds).state = if ok {
            LockState::Released
        } else {
            LockState::FatalError
        };
    }

    /// Ends the sequence. Record states are kept for `get-locks` reports.
    pub fn clear(&mut self) {
        self.active = false;
        self.waiting = false;
        self.current = Datastore::Running;
        self.started = None;
    }

    /// Forgets everything, used when the session drops.
    pub fn reset(&mut self) {
        for rec in &mut self.records {
            rec.reset();
        }
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::capability;

    fn caps_with_candidate() -> Capabilities {
        Capabilities::default().with_uri(capability::CANDIDATE)
    }

    fn table(now: Instant) -> LockTable {
        let mut t = LockTable::default();
        t.setup(
            &caps_with_candidate(),
            Duration::from_secs(10),
            Duration::from_secs(2),
            true,
            now,
        );
        t
    }

    #[test]
    fn test_setup_uses_capabilities() {
        let now = Instant::now();
        let t = table(now);
        assert!(t.record(Datastore::Running).used);
        assert!(t.record(Datastore::Candidate).used);
        assert!(!t.record(Datastore::Startup).used);
        assert!(t.is_active());
    }

    #[test]
    fn test_acquire_in_order() {
        let now = Instant::now();
        let mut t = table(now);
        assert_eq!(t.next_acquire(true, now), AcquireStep::Send(Datastore::Running));
        t.mark_sent(Datastore::Running, true, now);
        assert_eq!(t.on_lock_reply(None), LockReplyAction::Continue);
        assert_eq!(t.next_acquire(false, now), AcquireStep::Send(Datastore::Candidate));
        t.mark_sent(Datastore::Candidate, true, now);
        t.on_lock_reply(None);
        assert_eq!(t.next_acquire(false, now), AcquireStep::Done);
        assert!(t.all_acquired());
    }

    #[test]
    fn test_denied_lock_waits_for_retry_interval() {
        let start = Instant::now();
        let mut t = table(start);
        t.next_acquire(true, start);
        t.mark_sent(Datastore::Running, true, start);
        t.on_lock_reply(None);
        t.next_acquire(false, start);
        t.mark_sent(Datastore::Candidate, true, start);
        assert_eq!(t.on_lock_reply(Some(LOCK_DENIED_TAG)), LockReplyAction::Continue);

        assert_eq!(t.next_acquire(false, start), AcquireStep::Waiting);
        assert!(t.is_waiting());
        let later = start + Duration::from_secs(2);
        assert_eq!(t.next_acquire(false, later), AcquireStep::Send(Datastore::Candidate));
        let past = start + Duration::from_secs(11);
        assert_eq!(t.next_acquire(false, past), AcquireStep::TimedOut);
    }

    #[test]
    fn test_candidate_hard_error_asks_for_discard() {
        let now = Instant::now();
        let mut t = table(now);
        t.mark_sent(Datastore::Candidate, true, now);
        assert_eq!(
            t.on_lock_reply(Some("in-use")),
            LockReplyAction::DiscardCandidate
        );
        t.mark_sent(Datastore::Running, true, now);
        assert_eq!(t.on_lock_reply(Some("access-denied")), LockReplyAction::Abort);
        assert_eq!(t.next_acquire(false, now), AcquireStep::Fatal(Datastore::Running));
    }

    #[test]
    fn test_release_marks_released_and_keeps_state_after_clear() {
        let now = Instant::now();
        let mut t = table(now);
        t.mark_sent(Datastore::Running, true, now);
        t.on_lock_reply(None);

        assert!(t.begin_release(now));
        let ds = t.next_release().unwrap();
        assert_eq!(ds, Datastore::Running);
        t.mark_sent(ds, false, now);
        t.on_unlock_reply(true);
        assert!(t.next_release().is_none());
        t.clear();
        assert!(!t.is_active());
        assert_eq!(t.record(Datastore::Running).state, LockState::Released);
    }

    #[test]
    fn test_zero_timeout_never_expires() {
        let now = Instant::now();
        let mut t = LockTable::default();
        t.setup(&Capabilities::default(), Duration::ZERO, Duration::ZERO, false, now);
        assert!(!t.timed_out(now + Duration::from_secs(100_000)));
    }
}
