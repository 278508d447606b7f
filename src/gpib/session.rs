//! ## Session
//!
//! Per-device state shared by every record talking to one address: error
//! counters, the timeout window, timeouts, the unsolicited SRQ handler and
//! the SRQ wait.
//!

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::constants::gpib::{DEFAULT_QUEUE_TIMEOUT, DEFAULT_SRQ_WAIT_TIMEOUT};
use crate::error::{Error, Result};
use crate::gpib::GpibRecord;
use crate::interfaces::{Gpib, SrqHandler};
use crate::request::Request;
use crate::timer::TimerId;
use crate::types::Addr;

// SRQ WAIT
// ==========

/// Who is waiting for an SRQ, if anyone.
pub(crate) enum SrqWait<R> {
    Idle,
    Awaiting {
        owner: Arc<R>,
        token: u64,
        since: Instant,
        from_srq: bool,
        timer: Option<TimerId>,
    },
}

/// ### Srq State
///
/// The SRQ wait of a session and the records parked behind it. Every
/// transition happens under the session lock; the token tells a stale
/// timer apart from the wait it was armed for.
///
pub(crate) struct SrqState<R> {
    wait: SrqWait<R>,
    wait_list: VecDeque<Arc<R>>,
    next_token: u64,
}

impl<R> SrqState<R> {
    pub fn new() -> SrqState<R> {
        SrqState {
            wait: SrqWait::Idle,
            wait_list: VecDeque::new(),
            next_token: 1,
        }
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self.wait, SrqWait::Awaiting { .. })
    }

    pub fn owner_is(&self, record: &Arc<R>) -> bool {
        matches!(&self.wait, SrqWait::Awaiting { owner, .. } if Arc::ptr_eq(owner, record))
    }

    /// Time since the current wait began
    pub fn waiting_for(&self) -> Option<Duration> {
        match &self.wait {
            SrqWait::Awaiting { since, .. } => Some(since.elapsed()),
            SrqWait::Idle => None,
        }
    }

    pub fn parked(&self) -> usize {
        self.wait_list.len()
    }

    /// ### Begin Wait
    ///
    /// Make `owner` the one record waiting for SRQ.
    ///
    /// #### Returns
    /// The token identifying this wait, or `SrqOwnershipViolation` if some
    /// record is already waiting.
    ///
    pub fn begin_wait(&mut self, owner: Arc<R>) -> Result<u64> {
        if self.is_awaiting() {
            return Err(Error::SrqOwnershipViolation);
        }
        let token = self.next_token;
        self.next_token += 1;
        self.wait = SrqWait::Awaiting {
            owner,
            token,
            since: Instant::now(),
            from_srq: false,
            timer: None,
        };
        Ok(token)
    }

    /// Remember the timer armed for wait `token`.
    pub fn set_timer(&mut self, token: u64, id: TimerId) -> bool {
        match &mut self.wait {
            SrqWait::Awaiting {
                token: current,
                from_srq: false,
                timer,
                ..
            } if *current == token => {
                *timer = Some(id);
                true
            }
            _ => false,
        }
    }

    /// Park a record until the current wait ends.
    pub fn park(&mut self, record: Arc<R>) {
        self.wait_list.push_back(record);
    }

    /// ### Mark From Srq
    ///
    /// An SRQ arrived for this device. Marks the wait so its timer can no
    /// longer claim it.
    ///
    /// #### Returns
    /// The owner and its timer, the first time only.
    ///
    pub fn mark_from_srq(&mut self) -> Option<(Arc<R>, Option<TimerId>)> {
        match &mut self.wait {
            SrqWait::Awaiting {
                owner,
                from_srq: from_srq @ false,
                timer,
                ..
            } => {
                *from_srq = true;
                Some((owner.clone(), timer.take()))
            }
            _ => None,
        }
    }

    /// Take the timer of the current wait so it can be canceled.
    pub fn take_timer(&mut self) -> Option<TimerId> {
        match &mut self.wait {
            SrqWait::Awaiting { timer, .. } => timer.take(),
            SrqWait::Idle => None,
        }
    }

    /// ### Clear Wait
    ///
    /// End the wait on behalf of `owner`.
    ///
    /// #### Returns
    /// The parked records in arrival order, or `None` if `owner` does not
    /// own the wait.
    ///
    pub fn clear_wait(&mut self, owner: &Arc<R>) -> Option<Vec<Arc<R>>> {
        if !self.owner_is(owner) {
            return None;
        }
        self.wait = SrqWait::Idle;
        Some(self.wait_list.drain(..).collect())
    }

    /// ### Expire Wait
    ///
    /// End the wait on behalf of the timer armed for `token`. Fails if the
    /// wait has moved on or an SRQ already claimed it.
    ///
    /// #### Returns
    /// The owner and the parked records.
    ///
    pub fn expire_wait(&mut self, token: u64) -> Option<(Arc<R>, Vec<Arc<R>>)> {
        match &self.wait {
            SrqWait::Awaiting {
                owner,
                token: current,
                from_srq: false,
                ..
            } if *current == token => {
                let owner = owner.clone();
                self.wait = SrqWait::Idle;
                Some((owner, self.wait_list.drain(..).collect()))
            }
            _ => None,
        }
    }
}

// DEVICE SESSION
// ==========

pub(crate) struct SessionState {
    pub tmo_count: u64,
    pub error_count: u64,
    pub queue_timeout: Duration,
    pub srq_wait_timeout: Duration,
    timeout_active: bool,
    timeout_time: Option<Instant>,
    pub unsolicited: Option<SrqHandler>,
    pub srq: SrqState<GpibRecord>,
}

impl SessionState {
    /// Note a device timeout: opens the time window.
    pub fn timeout_happened(&mut self) {
        self.open_window();
        self.tmo_count += 1;
    }

    /// Note any other transport failure. Also opens the time window.
    pub fn error_happened(&mut self) {
        self.open_window();
        self.error_count += 1;
    }

    /// Count a failed transport call as a timeout or an error.
    pub fn io_failed(&mut self, err: &Error) {
        if err.is_timeout() {
            self.timeout_happened();
        } else {
            self.error_happened();
        }
    }

    fn open_window(&mut self) {
        self.timeout_active = true;
        self.timeout_time = Some(Instant::now());
    }

    /// ### Time Window Active
    ///
    /// True while less than `window` has passed since the last timeout.
    /// Closes the window once it has.
    ///
    pub fn time_window_active(&mut self, window: Duration) -> bool {
        if !self.timeout_active {
            return false;
        }
        match self.timeout_time {
            Some(at) if at.elapsed() < window => true,
            _ => {
                self.timeout_active = false;
                false
            }
        }
    }
}

/// ### Device Session
///
/// Shared by all records on one link and address.
///
pub struct DeviceSession {
    pub addr: Addr,
    pub(crate) state: Mutex<SessionState>,
}

impl DeviceSession {
    pub(crate) fn new(addr: Addr) -> DeviceSession {
        DeviceSession {
            addr,
            state: Mutex::new(SessionState {
                tmo_count: 0,
                error_count: 0,
                queue_timeout: DEFAULT_QUEUE_TIMEOUT,
                srq_wait_timeout: DEFAULT_SRQ_WAIT_TIMEOUT,
                timeout_active: false,
                timeout_time: None,
                unsolicited: None,
                srq: SrqState::new(),
            }),
        }
    }

    /// Device timeouts seen so far
    pub fn tmo_count(&self) -> u64 {
        self.state.lock().tmo_count
    }

    /// Transport errors other than timeouts seen so far
    pub fn error_count(&self) -> u64 {
        self.state.lock().error_count
    }

    pub fn queue_timeout(&self) -> Duration {
        self.state.lock().queue_timeout
    }

    pub fn srq_wait_timeout(&self) -> Duration {
        self.state.lock().srq_wait_timeout
    }

    /// Whether some record is waiting for this device's SRQ
    pub fn is_waiting_for_srq(&self) -> bool {
        self.state.lock().srq.is_awaiting()
    }
}

// PORT INSTANCE
// ==========

/// ### Port Instance
///
/// One per link: its GPIB interface, if any, and the sessions of its devices.
///
pub(crate) struct PortInstance {
    pub link: i32,
    pub port: String,
    pub gpib: Option<Arc<dyn Gpib>>,
    pub sessions: Mutex<BTreeMap<Addr, Arc<DeviceSession>>>,
    /// Request that registered the SRQ handler with the driver
    pub srq_request: Mutex<Option<Request>>,
}

impl PortInstance {
    pub fn session(&self, addr: Addr) -> Option<Arc<DeviceSession>> {
        self.sessions.lock().get(&addr).cloned()
    }

    pub fn session_or_insert(&self, addr: Addr) -> Arc<DeviceSession> {
        self.sessions
            .lock()
            .entry(addr)
            .or_insert_with(|| Arc::new(DeviceSession::new(addr)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn record(name: &'static str) -> Arc<&'static str> {
        Arc::new(name)
    }

    #[test]
    fn single_owner() {
        let mut srq = SrqState::new();
        let a = record("a");
        let b = record("b");
        let token = srq.begin_wait(a.clone()).unwrap();
        assert!(srq.owner_is(&a));
        assert!(matches!(srq.begin_wait(b.clone()), Err(Error::SrqOwnershipViolation)));
        assert!(srq.owner_is(&a));
        assert!(srq.clear_wait(&b).is_none());
        assert!(srq.clear_wait(&a).is_some());
        assert!(!srq.is_awaiting());
        assert_ne!(srq.begin_wait(b).unwrap(), token);
    }

    #[test]
    fn srq_beats_timer() {
        let mut srq = SrqState::new();
        let a = record("a");
        let token = srq.begin_wait(a.clone()).unwrap();
        let (owner, _) = srq.mark_from_srq().unwrap();
        assert!(Arc::ptr_eq(&owner, &a));
        assert!(srq.mark_from_srq().is_none());
        assert!(srq.expire_wait(token).is_none());
        assert!(srq.clear_wait(&a).is_some());
    }

    #[test]
    fn timer_beats_srq() {
        let mut srq = SrqState::new();
        let a = record("a");
        let token = srq.begin_wait(a.clone()).unwrap();
        let (owner, parked) = srq.expire_wait(token).unwrap();
        assert!(Arc::ptr_eq(&owner, &a));
        assert!(parked.is_empty());
        assert!(srq.mark_from_srq().is_none());
        assert!(srq.clear_wait(&a).is_none());
    }

    #[test]
    fn stale_token_does_not_expire_a_new_wait() {
        let mut srq = SrqState::new();
        let a = record("a");
        let old = srq.begin_wait(a.clone()).unwrap();
        srq.clear_wait(&a).unwrap();
        let new = srq.begin_wait(a.clone()).unwrap();
        assert!(srq.expire_wait(old).is_none());
        assert!(srq.expire_wait(new).is_some());
    }

    #[test]
    fn parked_records_come_back_in_order() {
        let mut srq = SrqState::new();
        let owner = record("owner");
        srq.begin_wait(owner.clone()).unwrap();
        for name in ["r1", "r2", "r3"] {
            srq.park(record(name));
        }
        assert_eq!(srq.parked(), 3);
        let released: Vec<&str> = srq.clear_wait(&owner).unwrap().iter().map(|r| **r).collect();
        assert_eq!(released, ["r1", "r2", "r3"]);
        assert_eq!(srq.parked(), 0);
    }

    #[test]
    fn racing_claims_have_one_winner() {
        for _ in 0..100 {
            let srq = Arc::new(Mutex::new(SrqState::new()));
            let a = record("a");
            let token = srq.lock().begin_wait(a.clone()).unwrap();

            let by_srq = {
                let srq = srq.clone();
                let a = a.clone();
                thread::spawn(move || {
                    let claimed = srq.lock().mark_from_srq().is_some();
                    claimed && srq.lock().clear_wait(&a).is_some()
                })
            };
            let by_timer = {
                let srq = srq.clone();
                thread::spawn(move || srq.lock().expire_wait(token).is_some())
            };
            let wins = [by_srq.join().unwrap(), by_timer.join().unwrap()];
            assert_eq!(wins.iter().filter(|w| **w).count(), 1);
        }
    }

    #[test]
    fn time_window_closes() {
        let session = DeviceSession::new(5);
        let mut state = session.state.lock();
        assert!(!state.time_window_active(Duration::from_secs(1)));
        state.timeout_happened();
        assert_eq!(state.tmo_count, 1);
        assert!(state.time_window_active(Duration::from_secs(60)));
        assert!(!state.time_window_active(Duration::ZERO));
        assert!(!state.time_window_active(Duration::from_secs(60)));

        state.error_happened();
        assert_eq!((state.tmo_count, state.error_count), (1, 1));
        assert!(state.time_window_active(Duration::from_secs(60)));
    }
}
