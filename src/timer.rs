//! ## Timer Queue
//!
//! One thread running cancellable one-shot timers.
//!
//! Queue timeouts and SRQ wait timeouts are both started here. A timer
//! callback runs on the timer thread with no crate lock held.
//!

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::Result;

type TimerCallback = Box<dyn FnOnce() + Send>;

/// ### Timer Id
///
/// Identifies a started timer for cancellation.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

struct TimerState {
    /// Pending timers ordered by deadline, then by start order
    pending: BTreeMap<(Instant, u64), TimerCallback>,
    next_id: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    cond: Condvar,
}

/// ### Timer Queue
///
/// Owns the timer thread. Dropping the queue stops the thread; pending
/// timers are discarded without running.
///
pub struct TimerQueue {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerQueue {
    /// ### New
    ///
    /// Start the timer thread.
    ///
    /// #### Arguments
    /// - `name` -> the name of the timer thread
    ///
    pub fn new(name: &str) -> Result<TimerQueue> {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState {
                pending: BTreeMap::new(),
                next_id: 0,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });
        let thread = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(name.to_string())
                .spawn(move || run(&shared))?
        };
        Ok(TimerQueue {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// ### Start
    ///
    /// Run `callback` once after `delay`, unless cancelled first.
    ///
    pub fn start(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) -> TimerId {
        let mut state = self.shared.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state
            .pending
            .insert((Instant::now() + delay, id), Box::new(callback));
        self.shared.cond.notify_one();
        TimerId(id)
    }

    /// ### Cancel
    ///
    /// #### Returns
    /// `true` if the timer was still pending, `false` if it already fired or was cancelled.
    ///
    pub fn cancel(&self, id: TimerId) -> bool {
        let mut state = self.shared.state.lock();
        let key = state.pending.keys().find(|(_, n)| *n == id.0).copied();
        match key {
            Some(key) => state.pending.remove(&key).is_some(),
            None => false,
        }
    }

    /// Number of timers still pending.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending.len()
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.pending.clear();
            self.shared.cond.notify_one();
        }
        if let Some(thread) = self.thread.lock().take() {
            // a timer callback may drop the last handle from the timer thread itself
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

fn run(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        let now = Instant::now();
        match state.pending.keys().next().copied() {
            Some(key) if key.0 <= now => {
                if let Some(callback) = state.pending.remove(&key) {
                    drop(state);
                    callback();
                    state = shared.state.lock();
                }
            }
            Some((deadline, _)) => {
                shared.cond.wait_until(&mut state, deadline);
            }
            None => shared.cond.wait(&mut state),
        }
    }
}
