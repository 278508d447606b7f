//! ## Queue
//!
//! Queueing, cancellation and the exclusive-hold locks.
//!

use std::time::Duration;

use crate::error::{Error, Result};
use crate::manager::{connect, Manager};
use crate::request::{Binding, Request};
use crate::trace::{asyn_print, TraceMask};
use crate::types::{CallbackState, LockScope, Priority, PORT_ADDR};

impl Manager {
    /// ### Queue Request
    ///
    /// Queue `req` for its process callback. On a synchronous port the
    /// callback runs before this returns.
    ///
    /// #### Arguments
    /// - `req` -> a connected request
    /// - `priority` -> the queue to use
    /// - `timeout` -> if set, the timeout callback runs instead once this expires in the queue
    ///
    pub fn queue_request(&self, req: &Request, priority: Priority, timeout: Option<Duration>) -> Result<()> {
        self.try_queue(req, priority, timeout).map_err(|e| req.note(e))
    }

    fn try_queue(&self, req: &Request, priority: Priority, timeout: Option<Duration>) -> Result<()> {
        let binding = req.binding()?;
        if timeout.is_some() && !req.has_timeout_callback() {
            return Err(Error::NoTimeoutCallback);
        }
        if !binding.port.attributes.can_block {
            return self.run_synchronous(req, &binding, priority);
        }

        let port = &binding.port;
        let mut state = port.state.lock();
        let seq = state.next_queue_seq;
        let slot = state.slots.get_mut(binding.key).ok_or(Error::NotConnected)?;
        if slot.queued {
            return Err(Error::AlreadyQueued);
        }
        slot.queued = true;
        slot.priority = priority;
        slot.queue_seq = seq;
        slot.pending = Some(req.clone());
        if let Some(timeout) = timeout {
            let port = port.clone();
            let key = binding.key;
            slot.timer = Some(
                self.timers()
                    .start(timeout, move || port.queue_timeout(key, seq)),
            );
        }
        state.next_queue_seq += 1;

        // a lock holder goes ahead of everyone waiting at its priority
        if state.is_holder(binding.key, binding.addr) {
            state.enqueue_front(priority, binding.key);
        } else {
            state.enqueue_back(priority, binding.key);
        }
        state.queue_state_change = true;
        drop(state);

        asyn_print!(req, TraceMask::FLOW, "queued at {:?}", priority);
        port.signal();
        Ok(())
    }

    /// Run the callback of `req` inline on a port that can not block.
    fn run_synchronous(&self, req: &Request, binding: &Binding, priority: Priority) -> Result<()> {
        let port = &binding.port;
        let _sync = port.synchronous.lock();
        {
            let mut state = port.state.lock();
            if !state.dpc.enabled || !state.dp(binding.addr).enabled {
                return Err(Error::NotEnabled {
                    port: port.name.clone(),
                    addr: binding.addr,
                });
            }
            if priority != Priority::Connect && !state.is_ready(binding.addr) {
                connect::auto_connect(self, port, &mut state, PORT_ADDR);
                if state.dpc.connected {
                    connect::auto_connect(self, port, &mut state, binding.addr);
                }
                if !state.is_ready(binding.addr) {
                    return Err(Error::DeviceNotConnected {
                        port: port.name.clone(),
                        addr: binding.addr,
                    });
                }
            }
            if let Some(slot) = state.slots.get_mut(binding.key) {
                slot.state = CallbackState::Active;
            }
        }
        asyn_print!(req, TraceMask::FLOW, "synchronous callback");
        req.process();
        let mut state = port.state.lock();
        if let Some(slot) = state.slots.get_mut(binding.key) {
            if slot.state == CallbackState::Canceled {
                port.callback_done.notify_all();
            }
            slot.state = CallbackState::Idle;
        }
        Ok(())
    }

    /// ### Cancel Request
    ///
    /// Take `req` out of its queue. If its callback is running, wait for it
    /// to return.
    ///
    /// #### Returns
    /// `true` if the request was removed from a queue.
    ///
    pub fn cancel_request(&self, req: &Request) -> Result<bool> {
        let binding = req.binding().map_err(|e| req.note(e))?;
        let port = &binding.port;
        let mut state = port.state.lock();

        if let Some((request, timer)) = state.dequeue(binding.key) {
            if let Some(timer) = timer {
                self.timers().cancel(timer);
            }
            drop(state);
            drop(request);
            asyn_print!(req, TraceMask::FLOW, "canceled");
            port.signal();
            return Ok(true);
        }

        let active = state
            .slots
            .get(binding.key)
            .is_some_and(|slot| slot.state != CallbackState::Idle);
        if !active || port.is_worker_thread() {
            return Ok(false);
        }
        if let Some(slot) = state.slots.get_mut(binding.key) {
            slot.state = CallbackState::Canceled;
        }
        while state
            .slots
            .get(binding.key)
            .is_some_and(|slot| slot.state == CallbackState::Canceled)
        {
            port.callback_done.wait(&mut state);
        }
        Ok(false)
    }

    /// ### Lock
    ///
    /// Hold the port (or just the request's device): once the next callback
    /// of `req` has run, only `req` is served until the guard is released.
    /// A holder's later requests go to the front of their queue.
    ///
    /// #### Returns
    /// A guard that unlocks when dropped.
    ///
    pub fn lock(&self, req: &Request, scope: LockScope) -> Result<LockGuard> {
        self.try_lock(req, scope).map_err(|e| req.note(e))?;
        asyn_print!(req, TraceMask::FLOW, "lock {:?}", scope);
        Ok(LockGuard {
            request: Some(req.clone()),
            scope,
        })
    }

    fn try_lock(&self, req: &Request, scope: LockScope) -> Result<()> {
        let binding = req.binding()?;
        if !binding.port.attributes.can_block {
            return Err(Error::Synchronous);
        }
        let mut state = binding.port.state.lock();
        let slot = state.slots.get_mut(binding.key).ok_or(Error::NotConnected)?;
        if slot.queued {
            return Err(Error::IsQueued);
        }
        match scope {
            LockScope::Port => slot.lock_port += 1,
            LockScope::Device => slot.lock_device += 1,
        }
        Ok(())
    }

    pub(crate) fn unlock(&self, req: &Request, scope: LockScope) -> Result<()> {
        self.try_unlock(req, scope).map_err(|e| req.note(e))?;
        asyn_print!(req, TraceMask::FLOW, "unlock {:?}", scope);
        Ok(())
    }

    fn try_unlock(&self, req: &Request, scope: LockScope) -> Result<()> {
        let binding = req.binding()?;
        let port = &binding.port;
        let mut state = port.state.lock();
        let slot = state.slots.get_mut(binding.key).ok_or(Error::NotConnected)?;
        if slot.queued {
            return Err(Error::IsQueued);
        }
        let count = match scope {
            LockScope::Port => &mut slot.lock_port,
            LockScope::Device => &mut slot.lock_device,
        };
        if *count == 0 {
            return Err(Error::NotLocked);
        }
        *count -= 1;
        if *count > 0 {
            return Ok(());
        }
        let dp = match scope {
            LockScope::Port => &mut state.dpc,
            LockScope::Device => state.dp_mut(binding.addr),
        };
        if dp.block_holder == Some(binding.key) {
            dp.block_holder = None;
            state.queue_state_change = true;
            drop(state);
            port.signal();
        }
        Ok(())
    }
}

/// ### Lock Guard
///
/// Returned by [`Manager::lock`]. Unlocks on drop; use [`LockGuard::unlock`]
/// to see the result.
///
#[must_use = "dropping the guard releases the lock"]
pub struct LockGuard {
    request: Option<Request>,
    scope: LockScope,
}

impl LockGuard {
    pub fn scope(&self) -> LockScope {
        self.scope
    }

    pub fn unlock(mut self) -> Result<()> {
        match self.request.take() {
            Some(request) => request.manager().clone().unlock(&request, self.scope),
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            if let Err(err) = request.manager().clone().unlock(&request, self.scope) {
                asyn_print!(request, TraceMask::ERROR, "unlock on drop failed: {}", err);
            }
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("request", &self.request)
            .field("scope", &self.scope)
            .finish()
    }
}
