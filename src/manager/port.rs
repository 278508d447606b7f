//! ## Port
//!
//! Per port state and the worker loop that serves blocking ports.
//!

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard, ReentrantMutex};

use crate::constants::queue::NUMBER_QUEUE_PRIORITIES;
use crate::event::Event;
use crate::interfaces::{Interfaces, Octet};
use crate::manager::arena::Arena;
use crate::manager::exception::ExceptionUser;
use crate::manager::registry::ManagerInner;
use crate::manager::{connect, Manager};
use crate::request::{Request, RequestInner};
use crate::timer::{TimerId, TimerQueue};
use crate::trace::{asyn_print, TraceMask};
use crate::types::{Addr, CallbackState, PortAttributes, Priority, PORT_ADDR};

/// ### Dp Common
///
/// Connection state shared by ports and devices.
///
pub(crate) struct DpCommon {
    pub enabled: bool,
    pub connected: bool,
    pub auto_connect: bool,
    pub auto_connect_active: bool,
    pub number_connects: u64,
    pub last_connect_disconnect: Option<Instant>,
    pub exception_active: bool,
    pub exception_users: Vec<ExceptionUser>,
    /// Slot of the request whose lock keeps everyone else out
    pub block_holder: Option<usize>,
    pub interpose: Option<Arc<dyn Octet>>,
    pub trace: Arc<AtomicU32>,
}

impl DpCommon {
    pub fn new(auto_connect: bool, trace: u32) -> DpCommon {
        DpCommon {
            enabled: true,
            connected: false,
            auto_connect,
            auto_connect_active: false,
            number_connects: 0,
            last_connect_disconnect: None,
            exception_active: false,
            exception_users: Vec::new(),
            block_holder: None,
            interpose: None,
            trace: Arc::new(AtomicU32::new(trace)),
        }
    }

    pub fn trace_mask(&self) -> TraceMask {
        TraceMask::from_bits(self.trace.load(Ordering::Relaxed))
    }
}

/// ### User Slot
///
/// Manager side state of a connected request.
///
pub(crate) struct UserSlot {
    pub request: Weak<RequestInner>,
    /// Strong handle kept while queued so a queued request cannot vanish
    pub pending: Option<Request>,
    pub addr: Addr,
    pub priority: Priority,
    pub queued: bool,
    /// Distinguishes successive queueings of the same request
    pub queue_seq: u64,
    pub state: CallbackState,
    pub lock_port: u32,
    pub lock_device: u32,
    pub timer: Option<TimerId>,
    pub exception_user: bool,
}

impl UserSlot {
    pub fn new(request: &Request, addr: Addr) -> UserSlot {
        UserSlot {
            request: Arc::downgrade(&request.0),
            pending: None,
            addr,
            priority: Priority::Low,
            queued: false,
            queue_seq: 0,
            state: CallbackState::Idle,
            lock_port: 0,
            lock_device: 0,
            timer: None,
            exception_user: false,
        }
    }
}

pub(crate) struct PortState {
    multi_device: bool,
    pub dpc: DpCommon,
    pub devices: BTreeMap<Addr, DpCommon>,
    pub queues: [VecDeque<usize>; NUMBER_QUEUE_PRIORITIES],
    pub slots: Arena<UserSlot>,
    pub queue_state_change: bool,
    pub next_queue_seq: u64,
    pub interfaces: Interfaces,
    pub port_interpose: Option<Arc<dyn Octet>>,
    pub shutdown: bool,
}

impl PortState {
    /// Device address owning separate state, if `addr` has one on this port.
    pub fn device_key(&self, addr: Addr) -> Option<Addr> {
        (self.multi_device && addr >= 0).then_some(addr)
    }

    pub fn dp(&self, addr: Addr) -> &DpCommon {
        match self.device_key(addr).and_then(|a| self.devices.get(&a)) {
            Some(device) => device,
            None => &self.dpc,
        }
    }

    pub fn dp_mut(&mut self, addr: Addr) -> &mut DpCommon {
        match self.device_key(addr) {
            Some(addr) => {
                let (auto_connect, trace) = (self.dpc.auto_connect, self.dpc.trace_mask().bits());
                self.devices
                    .entry(addr)
                    .or_insert_with(|| DpCommon::new(auto_connect, trace))
            }
            None => &mut self.dpc,
        }
    }

    /// Port and device both enabled and connected
    pub fn is_ready(&self, addr: Addr) -> bool {
        let dp = self.dp(addr);
        self.dpc.enabled && self.dpc.connected && dp.enabled && dp.connected
    }

    pub fn enqueue_back(&mut self, priority: Priority, key: usize) {
        self.queues[priority.index()].push_back(key);
    }

    /// Queue ahead of everything at `priority`; used for lock holders.
    pub fn enqueue_front(&mut self, priority: Priority, key: usize) {
        self.queues[priority.index()].push_front(key);
    }

    /// ### Dequeue
    ///
    /// Take a queued request out of its queue.
    ///
    /// #### Returns
    /// The strong handle kept while queued, and its queue timer.
    ///
    pub fn dequeue(&mut self, key: usize) -> Option<(Request, Option<TimerId>)> {
        let slot = self.slots.get_mut(key)?;
        if !slot.queued {
            return None;
        }
        slot.queued = false;
        let timer = slot.timer.take();
        let request = slot.pending.take()?;
        let queue = &mut self.queues[slot.priority.index()];
        if let Some(pos) = queue.iter().position(|k| *k == key) {
            queue.remove(pos);
        }
        self.queue_state_change = true;
        Some((request, timer))
    }

    pub fn is_holder(&self, key: usize, addr: Addr) -> bool {
        self.dpc.block_holder == Some(key) || self.dp(addr).block_holder == Some(key)
    }

    /// Blocked by a lock held by some other request
    fn is_blocked(&self, key: usize, addr: Addr) -> bool {
        let held_by_other = |holder: Option<usize>| holder.is_some_and(|h| h != key);
        held_by_other(self.dpc.block_holder) || held_by_other(self.dp(addr).block_holder)
    }
}

/// ### Port
///
/// A registered port. Lives as long as its manager.
///
pub(crate) struct Port {
    pub name: String,
    pub attributes: PortAttributes,
    pub state: Mutex<PortState>,
    /// Held while a callback or a connect attempt talks to the driver
    pub synchronous: ReentrantMutex<()>,
    pub notify: Event,
    pub callback_done: Condvar,
    pub exception_done: Condvar,
    pub timers: Arc<TimerQueue>,
    trace: Arc<AtomicU32>,
    pub worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: Mutex<Option<ThreadId>>,
}

impl Port {
    pub fn new(
        name: &str,
        attributes: PortAttributes,
        auto_connect: bool,
        timers: Arc<TimerQueue>,
    ) -> Port {
        let dpc = DpCommon::new(auto_connect, TraceMask::default().bits());
        let trace = dpc.trace.clone();
        Port {
            name: name.to_string(),
            attributes,
            state: Mutex::new(PortState {
                multi_device: attributes.multi_device,
                dpc,
                devices: BTreeMap::new(),
                queues: Default::default(),
                slots: Arena::default(),
                queue_state_change: false,
                next_queue_seq: 0,
                interfaces: Interfaces::default(),
                port_interpose: None,
                shutdown: false,
            }),
            synchronous: ReentrantMutex::new(()),
            notify: Event::new(),
            callback_done: Condvar::new(),
            exception_done: Condvar::new(),
            timers,
            trace,
            worker: Mutex::new(None),
            worker_id: Mutex::new(None),
        }
    }

    pub fn set_worker(&self, handle: JoinHandle<()>) {
        *self.worker_id.lock() = Some(handle.thread().id());
        *self.worker.lock() = Some(handle);
    }

    pub fn is_worker_thread(&self) -> bool {
        *self.worker_id.lock() == Some(std::thread::current().id())
    }

    /// Wake the worker, if there is one.
    pub fn signal(&self) {
        if self.attributes.can_block {
            self.notify.signal();
        }
    }

    pub(crate) fn trace_target(&self, mask: TraceMask) -> Option<(String, Addr)> {
        TraceMask::from_bits(self.trace.load(Ordering::Relaxed))
            .intersects(mask)
            .then(|| (self.name.clone(), PORT_ADDR))
    }

    /// ### Queue Timeout
    ///
    /// Timer callback for a queued request. A no-op unless the same queueing
    /// (`seq`) is still waiting.
    ///
    pub fn queue_timeout(self: &Arc<Port>, key: usize, seq: u64) {
        let mut state = self.state.lock();
        let current = state
            .slots
            .get(key)
            .is_some_and(|slot| slot.queued && slot.queue_seq == seq);
        if !current {
            asyn_print!(self, TraceMask::FLOW, "queue timeout but not queued");
            return;
        }
        if let Some(slot) = state.slots.get_mut(key) {
            slot.timer = None;
        }
        let Some((request, _)) = state.dequeue(key) else {
            return;
        };
        asyn_print!(request, TraceMask::FLOW, "queue timeout");
        if let Some(slot) = state.slots.get_mut(key) {
            slot.state = CallbackState::Active;
        }
        MutexGuard::unlocked(&mut state, || request.run_timeout());
        self.callback_finished(&mut state, key);
        drop(state);
        self.signal();
    }

    /// Reset the callback state of `key` and wake a waiting canceller.
    fn callback_finished(&self, state: &mut PortState, key: usize) {
        if let Some(slot) = state.slots.get_mut(key) {
            if slot.state == CallbackState::Canceled {
                self.callback_done.notify_all();
            }
            slot.state = CallbackState::Idle;
        }
    }

    /// Make `key` the holder at every scope it holds a lock on.
    fn take_hold(state: &mut PortState, key: usize) {
        let Some(slot) = state.slots.get(key) else {
            return;
        };
        let (addr, port, device) = (slot.addr, slot.lock_port > 0, slot.lock_device > 0);
        if port {
            state.dpc.block_holder = Some(key);
        }
        if device {
            state.dp_mut(addr).block_holder = Some(key);
        }
    }

    /// ### Run Callback
    ///
    /// Dequeue `key` and run its process callback with the state unlocked and
    /// the synchronous lock held.
    ///
    fn run_callback(self: &Arc<Port>, state: &mut MutexGuard<'_, PortState>, key: usize) {
        let Some((request, timer)) = state.dequeue(key) else {
            return;
        };
        if let Some(timer) = timer {
            self.timers.cancel(timer);
        }
        Port::take_hold(state, key);
        if let Some(slot) = state.slots.get_mut(key) {
            slot.state = CallbackState::Active;
        }
        MutexGuard::unlocked(state, || {
            let _sync = self.synchronous.lock();
            asyn_print!(request, TraceMask::FLOW, "process callback");
            request.process();
        });
        self.callback_finished(state, key);
        Port::take_hold(state, key);
    }
}

// WORKER
// ==========

/// ### Run
///
/// Body of the worker thread of a blocking port.
///
pub(crate) fn run(port: Arc<Port>, manager: Weak<ManagerInner>) {
    asyn_print!(port, TraceMask::FLOW, "port thread started");
    let mut retry: Option<Duration> = None;
    loop {
        match retry.take() {
            Some(delay) => {
                port.notify.wait_timeout(delay);
            }
            None => port.notify.wait(),
        }
        let Some(manager) = Manager::upgrade(&manager) else {
            break;
        };
        if port.state.lock().shutdown {
            break;
        }
        retry = service(&manager, &port);
    }
    asyn_print!(port, TraceMask::FLOW, "port thread exiting");
}

fn earliest(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// ### Service
///
/// Run every eligible request.
///
/// #### Returns
/// How long to wait before retrying an auto-connect held back by the spacing rule.
///
fn service(manager: &Manager, port: &Arc<Port>) -> Option<Duration> {
    let mut state = port.state.lock();
    let mut retry = None;
    'scan: loop {
        if state.shutdown {
            return None;
        }
        state.queue_state_change = false;
        if !state.dpc.enabled {
            return None;
        }

        // CONNECT REQUESTS
        // ==========
        if let Some(key) = state.queues[Priority::Connect.index()].pop_front() {
            port.run_callback(&mut state, key);
            continue;
        }

        // THE PORT ITSELF
        // ==========
        if !state.dpc.connected {
            retry = earliest(retry, connect::auto_connect(manager, port, &mut state, PORT_ADDR));
            if !state.dpc.connected {
                return retry;
            }
        }

        // PICK A REQUEST
        // ==========
        let mut selected = None;
        'pick: for priority in Priority::SCAN_ORDER {
            let keys: Vec<usize> = state.queues[priority.index()].iter().copied().collect();
            for key in keys {
                let Some(addr) = state.slots.get(key).map(|slot| slot.addr) else {
                    continue;
                };
                if state.is_blocked(key, addr) || !state.dp(addr).enabled {
                    continue;
                }
                if !state.dp(addr).connected {
                    let delay = connect::auto_connect(manager, port, &mut state, addr);
                    retry = earliest(retry, delay);
                    if state.queue_state_change {
                        continue 'scan;
                    }
                    if !state.dp(addr).connected {
                        continue;
                    }
                }
                selected = Some(key);
                break 'pick;
            }
        }
        let Some(key) = selected else {
            return retry;
        };
        port.run_callback(&mut state, key);
    }
}
