//! ## Event
//!
//! Binary event used to wake port workers.
//!

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// ### Event
///
/// A signal that is either set or clear. `wait` consumes the signal, so any
/// number of `signal` calls before a `wait` wake it once.
///
#[derive(Debug, Default)]
pub struct Event {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Event {
        Event::default()
    }

    /// Set the event and wake one waiter.
    pub fn signal(&self) {
        let mut set = self.set.lock();
        *set = true;
        self.cond.notify_one();
    }

    /// Block until the event is set, then clear it.
    pub fn wait(&self) {
        let mut set = self.set.lock();
        while !*set {
            self.cond.wait(&mut set);
        }
        *set = false;
    }

    /// ### Wait Timeout
    ///
    /// Block until the event is set or `timeout` elapses.
    ///
    /// #### Returns
    /// `true` if the event was set (and is now cleared), `false` on timeout.
    ///
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut set = self.set.lock();
        if !*set {
            self.cond.wait_while_for(&mut set, |set| !*set, timeout);
        }
        std::mem::replace(&mut *set, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn signals_collapse() {
        let event = Event::new();
        event.signal();
        event.signal();
        assert!(event.wait_timeout(Duration::from_millis(10)));
        assert!(!event.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn wakes_waiter_on_other_thread() {
        let event = Arc::new(Event::new());
        let waiter = {
            let event = event.clone();
            thread::spawn(move || event.wait_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        event.signal();
        assert!(waiter.join().unwrap());
    }
}
