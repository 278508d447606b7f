mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use proptest::prelude::*;
use rs_asyn::{Error, Event, Exception, LockScope, Manager, Octet, Priority, Request, TraceMask};

use common::{blocking, blocking_multi_device, init_tracing, mock_port, synchronous, wait_until};

const WAIT: Duration = Duration::from_secs(5);

/// A request whose callback holds the port worker until released.
struct Gate {
    request: Request,
    started: Arc<Event>,
    release: Arc<Event>,
}

impl Gate {
    fn new(manager: &Manager, port: &str) -> Gate {
        let started = Arc::new(Event::new());
        let release = Arc::new(Event::new());
        let request = {
            let (started, release) = (started.clone(), release.clone());
            manager.create_request(move |_| {
                started.signal();
                release.wait();
            })
        };
        manager.connect_device(&request, port, 0).unwrap();
        Gate {
            request,
            started,
            release,
        }
    }

    /// Queue the gate and wait until the worker is inside it.
    fn close(&self, manager: &Manager) {
        manager
            .queue_request(&self.request, Priority::High, None)
            .unwrap();
        assert!(self.started.wait_timeout(WAIT), "gate never ran");
    }

    fn open(&self) {
        self.release.signal();
    }
}

/// A request that appends `tag` to `log` when it runs.
fn logging_request(manager: &Manager, port: &str, log: &Arc<Mutex<Vec<usize>>>, tag: usize) -> Request {
    let log = log.clone();
    let request = manager.create_request(move |_| log.lock().push(tag));
    manager.connect_device(&request, port, 0).unwrap();
    request
}

fn run_order(priorities: &[Priority]) -> Vec<usize> {
    let manager = Manager::new().unwrap();
    mock_port(&manager, "P", blocking(), false);
    let gate = Gate::new(&manager, "P");
    gate.close(&manager);

    let log = Arc::new(Mutex::new(Vec::new()));
    let requests: Vec<Request> = (0..priorities.len())
        .map(|tag| logging_request(&manager, "P", &log, tag))
        .collect();
    for (request, priority) in requests.iter().zip(priorities) {
        manager.queue_request(request, *priority, None).unwrap();
    }
    gate.open();

    assert!(wait_until(WAIT, || log.lock().len() == priorities.len()));
    let order = log.lock().clone();
    order
}

// QUEUEING
// ==========

#[test]
fn higher_priorities_run_first() {
    init_tracing();
    let order = run_order(&[Priority::Low, Priority::Medium, Priority::High, Priority::Connect]);
    assert_eq!(order, vec![3, 2, 1, 0]);
}

#[test]
fn same_priority_runs_in_queue_order() {
    init_tracing();
    let order = run_order(&[Priority::Medium, Priority::Medium, Priority::Medium]);
    assert_eq!(order, vec![0, 1, 2]);
}

fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Medium),
        Just(Priority::High),
        Just(Priority::Connect),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn queued_requests_run_by_priority_then_arrival(priorities in prop::collection::vec(priority(), 1..8)) {
        let order = run_order(&priorities);

        let mut expected: Vec<usize> = (0..priorities.len()).collect();
        expected.sort_by_key(|&tag| std::cmp::Reverse(priorities[tag]));
        prop_assert_eq!(order, expected);
    }
}

#[test]
fn queue_request_twice_is_rejected() {
    init_tracing();
    let manager = Manager::new().unwrap();
    mock_port(&manager, "P", blocking(), false);
    let gate = Gate::new(&manager, "P");
    gate.close(&manager);

    let log = Arc::new(Mutex::new(Vec::new()));
    let request = logging_request(&manager, "P", &log, 0);
    manager.queue_request(&request, Priority::Low, None).unwrap();
    let err = manager
        .queue_request(&request, Priority::Low, None)
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyQueued));
    assert!(!request.error_message().is_empty());

    gate.open();
    assert!(wait_until(WAIT, || log.lock().len() == 1));
}

#[test]
fn unconnected_request_can_not_be_queued() {
    init_tracing();
    let manager = Manager::new().unwrap();
    let request = manager.create_request(|_| {});
    let err = manager
        .queue_request(&request, Priority::Low, None)
        .unwrap_err();
    assert!(matches!(err, Error::NotConnected));
}

// CANCEL AND QUEUE TIMEOUT
// ==========

#[test]
fn canceled_request_never_runs() {
    init_tracing();
    let manager = Manager::new().unwrap();
    mock_port(&manager, "P", blocking(), false);
    let gate = Gate::new(&manager, "P");
    gate.close(&manager);

    let log = Arc::new(Mutex::new(Vec::new()));
    let canceled = logging_request(&manager, "P", &log, 0);
    let marker = logging_request(&manager, "P", &log, 1);
    manager.queue_request(&canceled, Priority::High, None).unwrap();
    manager.queue_request(&marker, Priority::Low, None).unwrap();

    assert!(manager.cancel_request(&canceled).unwrap());
    assert!(!manager.cancel_request(&canceled).unwrap());
    gate.open();

    assert!(wait_until(WAIT, || log.lock().contains(&1)));
    assert_eq!(*log.lock(), vec![1]);
}

#[test]
fn cancel_waits_for_a_running_callback() {
    init_tracing();
    let manager = Manager::new().unwrap();
    mock_port(&manager, "P", blocking(), false);
    let gate = Gate::new(&manager, "P");
    gate.close(&manager);

    let returned = Arc::new(AtomicBool::new(false));
    let canceller = {
        let manager = manager.clone();
        let request = gate.request.clone();
        let returned = returned.clone();
        thread::spawn(move || {
            let removed = manager.cancel_request(&request);
            returned.store(true, Ordering::SeqCst);
            removed
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!returned.load(Ordering::SeqCst));
    gate.open();
    assert!(!canceller.join().unwrap().unwrap());
    assert!(returned.load(Ordering::SeqCst));
}

#[test]
fn queue_timeout_runs_the_timeout_callback() {
    init_tracing();
    let manager = Manager::new().unwrap();
    mock_port(&manager, "P", blocking(), false);
    let gate = Gate::new(&manager, "P");
    gate.close(&manager);

    let processed = Arc::new(AtomicBool::new(false));
    let timed_out = Arc::new(Event::new());
    let request = {
        let (processed, timed_out) = (processed.clone(), timed_out.clone());
        manager.create_request_with_timeout(
            move |_| processed.store(true, Ordering::SeqCst),
            move |_| timed_out.signal(),
        )
    };
    manager.connect_device(&request, "P", 0).unwrap();
    manager
        .queue_request(&request, Priority::Medium, Some(Duration::from_millis(50)))
        .unwrap();

    assert!(timed_out.wait_timeout(WAIT));
    gate.open();

    let log = Arc::new(Mutex::new(Vec::new()));
    let marker = logging_request(&manager, "P", &log, 0);
    manager.queue_request(&marker, Priority::Low, None).unwrap();
    assert!(wait_until(WAIT, || !log.lock().is_empty()));
    assert!(!processed.load(Ordering::SeqCst));
}

#[test]
fn queue_timeout_needs_a_timeout_callback() {
    init_tracing();
    let manager = Manager::new().unwrap();
    mock_port(&manager, "P", blocking(), false);
    let request = manager.create_request(|_| {});
    manager.connect_device(&request, "P", 0).unwrap();
    let err = manager
        .queue_request(&request, Priority::Low, Some(Duration::from_secs(1)))
        .unwrap_err();
    assert!(matches!(err, Error::NoTimeoutCallback));
}

// LOCKS
// ==========

#[test]
fn port_lock_holder_is_served_alone() {
    init_tracing();
    let manager = Manager::new().unwrap();
    mock_port(&manager, "P", blocking(), false);

    let holder_runs = Arc::new(AtomicUsize::new(0));
    let holder_ran = Arc::new(Event::new());
    let holder = {
        let (runs, ran) = (holder_runs.clone(), holder_ran.clone());
        manager.create_request(move |_| {
            runs.fetch_add(1, Ordering::SeqCst);
            ran.signal();
        })
    };
    manager.connect_device(&holder, "P", 0).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let other = logging_request(&manager, "P", &log, 0);

    let guard = manager.lock(&holder, LockScope::Port).unwrap();
    assert_eq!(guard.scope(), LockScope::Port);
    manager.queue_request(&holder, Priority::Low, None).unwrap();
    assert!(holder_ran.wait_timeout(WAIT));

    manager.queue_request(&other, Priority::High, None).unwrap();
    thread::sleep(Duration::from_millis(150));
    assert!(log.lock().is_empty());

    manager.queue_request(&holder, Priority::Low, None).unwrap();
    assert!(holder_ran.wait_timeout(WAIT));
    assert_eq!(holder_runs.load(Ordering::SeqCst), 2);
    assert!(log.lock().is_empty());

    assert!(matches!(manager.disconnect(&holder), Err(Error::AlreadyLocked)));
    guard.unlock().unwrap();
    assert!(wait_until(WAIT, || log.lock().len() == 1));
    manager.disconnect(&holder).unwrap();
}

#[test]
fn device_lock_leaves_other_devices_alone() {
    init_tracing();
    let manager = Manager::new().unwrap();
    mock_port(&manager, "M", blocking_multi_device(), false);

    let log = Arc::new(Mutex::new(Vec::new()));
    let holder_ran = Arc::new(Event::new());
    let holder = {
        let ran = holder_ran.clone();
        manager.create_request(move |_| ran.signal())
    };
    manager.connect_device(&holder, "M", 1).unwrap();

    let same_device = {
        let log = log.clone();
        manager.create_request(move |_| log.lock().push(1))
    };
    manager.connect_device(&same_device, "M", 1).unwrap();
    let other_device = {
        let log = log.clone();
        manager.create_request(move |_| log.lock().push(2))
    };
    manager.connect_device(&other_device, "M", 2).unwrap();

    let guard = manager.lock(&holder, LockScope::Device).unwrap();
    manager.queue_request(&holder, Priority::Medium, None).unwrap();
    assert!(holder_ran.wait_timeout(WAIT));

    manager.queue_request(&same_device, Priority::High, None).unwrap();
    manager.queue_request(&other_device, Priority::Low, None).unwrap();
    assert!(wait_until(WAIT, || log.lock().contains(&2)));
    assert!(!log.lock().contains(&1));

    drop(guard);
    assert!(wait_until(WAIT, || log.lock().contains(&1)));
}

#[test]
fn synchronous_ports_can_not_be_locked() {
    init_tracing();
    let manager = Manager::new().unwrap();
    mock_port(&manager, "S", synchronous(), false);
    let request = manager.create_request(|_| {});
    manager.connect_device(&request, "S", 0).unwrap();
    assert!(matches!(
        manager.lock(&request, LockScope::Port),
        Err(Error::Synchronous)
    ));
}

// SYNCHRONOUS PORTS
// ==========

#[test]
fn synchronous_port_runs_the_callback_inline() {
    init_tracing();
    let manager = Manager::new().unwrap();
    let driver = mock_port(&manager, "S", synchronous(), false);

    let runs = Arc::new(AtomicUsize::new(0));
    let request = {
        let runs = runs.clone();
        manager.create_request(move |req| {
            let octet = req.manager().find_octet(req).unwrap();
            octet.write(req, b"*RST\n").unwrap();
            runs.fetch_add(1, Ordering::SeqCst);
        })
    };
    manager.connect_device(&request, "S", 0).unwrap();
    assert!(!manager.is_connected(&request).unwrap());

    manager.queue_request(&request, Priority::Medium, None).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(driver.connects.load(Ordering::SeqCst), 1);
    assert!(manager.is_connected(&request).unwrap());
    assert_eq!(driver.written(), vec![b"*RST\n".to_vec()]);

    manager.queue_request(&request, Priority::Medium, None).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(driver.connects.load(Ordering::SeqCst), 1);
}

#[test]
fn synchronous_port_refuses_when_disabled_or_unreachable() {
    init_tracing();
    let manager = Manager::new().unwrap();
    let driver = mock_port(&manager, "S", synchronous(), false);
    let request = manager.create_request(|_| {});
    manager.connect_device(&request, "S", 0).unwrap();

    driver.fail_connect.store(true, Ordering::SeqCst);
    assert!(matches!(
        manager.queue_request(&request, Priority::Low, None),
        Err(Error::DeviceNotConnected { .. })
    ));

    manager.enable(&request, false).unwrap();
    assert!(matches!(
        manager.queue_request(&request, Priority::Low, None),
        Err(Error::NotEnabled { .. })
    ));
}

// CONNECTION AND EXCEPTIONS
// ==========

#[test]
fn connect_device_connects_an_auto_connect_port() {
    init_tracing();
    let manager = Manager::new().unwrap();
    let driver = mock_port(&manager, "P", blocking(), false);
    let request = manager.create_request(|_| {});
    manager.connect_device(&request, "P", 0).unwrap();

    assert!(wait_until(WAIT, || manager.is_connected(&request).unwrap()));
    assert_eq!(driver.connects.load(Ordering::SeqCst), 1);
    assert!(manager.can_block(&request).unwrap());
    assert!(!manager.is_multi_device(&request).unwrap());
    assert!(manager.is_auto_connect(&request).unwrap());
    assert_eq!(request.port_name().as_deref(), Some("P"));
    assert_eq!(request.addr().unwrap(), 0);
}

#[test]
fn auto_connect_attempts_are_spaced() {
    init_tracing();
    let manager = Manager::new().unwrap();
    let driver = mock_port(&manager, "P", blocking(), false);
    driver.fail_connect.store(true, Ordering::SeqCst);

    let ran = Arc::new(Event::new());
    let request = {
        let ran = ran.clone();
        manager.create_request(move |_| ran.signal())
    };
    let started = Instant::now();
    manager.connect_device(&request, "P", 0).unwrap();
    manager.queue_request(&request, Priority::Medium, None).unwrap();

    // the connect request, then the worker's own attempt
    assert!(wait_until(WAIT, || driver.connects.load(Ordering::SeqCst) >= 2));
    thread::sleep(Duration::from_millis(50));
    let attempts = driver.connects.load(Ordering::SeqCst);

    // waking the worker inside the spacing does not retry early
    manager.enable(&request, true).unwrap();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(driver.connects.load(Ordering::SeqCst), attempts);
    driver.fail_connect.store(false, Ordering::SeqCst);

    assert!(ran.wait_timeout(WAIT));
    assert!(started.elapsed() >= Duration::from_millis(1500));
    assert!(manager.is_connected(&request).unwrap());
}

#[test]
fn exceptions_reach_registered_callbacks() {
    init_tracing();
    let manager = Manager::new().unwrap();
    mock_port(&manager, "P", blocking(), false);
    let request = manager.create_request(|_| {});
    manager.connect_device(&request, "P", 0).unwrap();
    assert!(wait_until(WAIT, || manager.is_connected(&request).unwrap()));

    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        manager
            .exception_callback_add(&request, move |_, exception| seen.lock().push(exception))
            .unwrap();
    }
    assert!(manager.exception_callback_add(&request, |_, _| {}).is_err());

    manager.exception_disconnect(&request).unwrap();
    assert!(!manager.is_connected(&request).unwrap());
    assert!(matches!(
        manager.exception_disconnect(&request),
        Err(Error::DeviceNotConnected { .. })
    ));

    manager.auto_connect(&request, false).unwrap();
    assert!(!manager.is_auto_connect(&request).unwrap());
    manager.enable(&request, false).unwrap();
    assert!(!manager.is_enabled(&request).unwrap());
    let mask = TraceMask::ERROR | TraceMask::FLOW;
    manager.set_trace_mask(&request, mask).unwrap();
    assert_eq!(manager.trace_mask(&request).unwrap(), mask);

    assert_eq!(
        *seen.lock(),
        vec![
            Exception::Connect,
            Exception::AutoConnect,
            Exception::Enable,
            Exception::TraceMask
        ]
    );

    assert!(matches!(
        manager.disconnect(&request),
        Err(Error::ExceptionUserActive)
    ));
    manager.exception_callback_remove(&request).unwrap();
    manager.disconnect(&request).unwrap();
}

#[test]
fn disabled_device_waits_until_enabled() {
    init_tracing();
    let manager = Manager::new().unwrap();
    mock_port(&manager, "M", blocking_multi_device(), false);

    let log = Arc::new(Mutex::new(Vec::new()));
    let first = {
        let log = log.clone();
        manager.create_request(move |_| log.lock().push(5))
    };
    manager.connect_device(&first, "M", 5).unwrap();
    let second = {
        let log = log.clone();
        manager.create_request(move |_| log.lock().push(6))
    };
    manager.connect_device(&second, "M", 6).unwrap();

    manager.enable(&first, false).unwrap();
    manager.queue_request(&first, Priority::High, None).unwrap();
    manager.queue_request(&second, Priority::Low, None).unwrap();
    assert!(wait_until(WAIT, || log.lock().contains(&6)));
    assert!(!log.lock().contains(&5));

    manager.enable(&first, true).unwrap();
    assert!(wait_until(WAIT, || log.lock().contains(&5)));
}

#[test]
fn freed_request_can_not_connect_again() {
    init_tracing();
    let manager = Manager::new().unwrap();
    mock_port(&manager, "P", blocking(), false);
    let request = manager.create_request(|_| {});
    manager.connect_device(&request, "P", 0).unwrap();
    assert!(matches!(
        manager.connect_device(&request, "P", 0),
        Err(Error::AlreadyConnected)
    ));

    manager.free_request(&request).unwrap();
    assert!(request.is_freed());
    assert!(matches!(
        manager.connect_device(&request, "P", 0),
        Err(Error::Freed)
    ));
}

#[test]
fn queued_or_locked_request_can_not_be_freed() {
    init_tracing();
    let manager = Manager::new().unwrap();
    mock_port(&manager, "P", blocking(), false);
    let gate = Gate::new(&manager, "P");
    gate.close(&manager);

    let log = Arc::new(Mutex::new(Vec::new()));
    let queued = logging_request(&manager, "P", &log, 0);
    manager.queue_request(&queued, Priority::Low, None).unwrap();
    assert!(matches!(manager.free_request(&queued), Err(Error::IsQueued)));
    assert!(!queued.is_freed());

    let locked = logging_request(&manager, "P", &log, 1);
    let guard = manager.lock(&locked, LockScope::Device).unwrap();
    assert!(matches!(manager.free_request(&locked), Err(Error::AlreadyLocked)));
    guard.unlock().unwrap();
    manager.free_request(&locked).unwrap();

    gate.open();
    assert!(wait_until(WAIT, || log.lock().contains(&0)));
    manager.free_request(&queued).unwrap();
}

#[test]
fn duplicate_request_shares_callbacks_and_binding() {
    init_tracing();
    let manager = Manager::new().unwrap();
    mock_port(&manager, "P", blocking(), false);

    let runs = Arc::new(AtomicUsize::new(0));
    let ran = Arc::new(Event::new());
    let request = {
        let (runs, ran) = (runs.clone(), ran.clone());
        manager.create_request(move |_| {
            runs.fetch_add(1, Ordering::SeqCst);
            ran.signal();
        })
    };
    request.set_timeout(Duration::from_millis(250));
    manager.connect_device(&request, "P", 0).unwrap();

    let duplicate = manager.duplicate_request(&request).unwrap();
    assert!(!duplicate.ptr_eq(&request));
    assert_ne!(duplicate.id(), request.id());
    assert_eq!(duplicate.port_name().as_deref(), Some("P"));
    assert_eq!(duplicate.timeout(), Duration::from_millis(250));

    manager.queue_request(&duplicate, Priority::Low, None).unwrap();
    assert!(ran.wait_timeout(WAIT));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

// INTERPOSE
// ==========

/// Upper-cases everything written through it.
#[derive(Default)]
struct Shout {
    next: Mutex<Option<Arc<dyn Octet>>>,
}

impl Shout {
    fn next(&self) -> rs_asyn::Result<Arc<dyn Octet>> {
        self.next
            .lock()
            .clone()
            .ok_or(Error::InterfaceNotFound("asynOctet"))
    }
}

impl Octet for Shout {
    fn write(&self, user: &Request, data: &[u8]) -> rs_asyn::Result<usize> {
        self.next()?.write(user, &data.to_ascii_uppercase())
    }

    fn read(&self, user: &Request, buf: &mut [u8]) -> rs_asyn::Result<usize> {
        self.next()?.read(user, buf)
    }

    fn flush(&self, user: &Request) -> rs_asyn::Result<()> {
        self.next()?.flush(user)
    }

    fn set_eos(&self, user: &Request, eos: &[u8]) -> rs_asyn::Result<()> {
        self.next()?.set_eos(user, eos)
    }

    fn get_eos(&self, user: &Request) -> rs_asyn::Result<Vec<u8>> {
        self.next()?.get_eos(user)
    }
}

#[test]
fn interposed_octet_filters_one_device() {
    init_tracing();
    let manager = Manager::new().unwrap();
    let driver = mock_port(&manager, "M", blocking_multi_device(), false);

    let shout = Arc::new(Shout::default());
    let previous = manager.interpose_octet("M", 3, shout.clone()).unwrap();
    *shout.next.lock() = Some(previous);

    let filtered = manager.create_request(|_| {});
    manager.connect_device(&filtered, "M", 3).unwrap();
    let plain = manager.create_request(|_| {});
    manager.connect_device(&plain, "M", 4).unwrap();

    manager
        .find_octet(&filtered)
        .unwrap()
        .write(&filtered, b"idn?")
        .unwrap();
    manager
        .find_octet(&plain)
        .unwrap()
        .write(&plain, b"idn?")
        .unwrap();
    assert_eq!(driver.written(), vec![b"IDN?".to_vec(), b"idn?".to_vec()]);
    assert!(manager.snapshot("M").unwrap().devices.iter().any(|(addr, dp)| *addr == 3 && dp.interposed));
}

// REGISTRY AND REPORTS
// ==========

#[test]
fn ports_and_interfaces_register_once() {
    init_tracing();
    let manager = Manager::new().unwrap();
    let driver = mock_port(&manager, "P", blocking(), false);

    assert!(matches!(
        manager.register_port("P", blocking(), true),
        Err(Error::PortAlreadyRegistered(_))
    ));
    assert!(matches!(
        manager.register_interface("P", rs_asyn::Interface::Octet(driver)),
        Err(Error::InterfaceAlreadyRegistered(_))
    ));

    let request = manager.create_request(|_| {});
    assert!(matches!(
        manager.connect_device(&request, "nowhere", 0),
        Err(Error::PortNotFound(_))
    ));
    manager.connect_device(&request, "P", 0).unwrap();
    assert!(manager.find_octet(&request).is_ok());
    assert!(matches!(
        manager.find_gpib(&request),
        Err(Error::InterfaceNotFound(_))
    ));
    assert_eq!(manager.port_names(), vec!["P".to_string()]);
}

#[test]
fn report_describes_the_port_and_its_driver() {
    init_tracing();
    let manager = Manager::new().unwrap();
    mock_port(&manager, "R", blocking(), false);

    let ran = Arc::new(Event::new());
    let request = {
        let ran = ran.clone();
        manager.create_request(move |_| ran.signal())
    };
    manager.connect_device(&request, "R", 0).unwrap();
    manager.queue_request(&request, Priority::Low, None).unwrap();
    assert!(ran.wait_timeout(WAIT));

    let snapshot = manager.snapshot("R").unwrap();
    assert_eq!(snapshot.name, "R");
    assert!(snapshot.state.connected);
    assert_eq!(snapshot.state.number_connects, 1);
    assert_eq!(snapshot.queued_total(), 0);
    assert_eq!(snapshot.queued_at(Priority::Connect), 0);
    assert!(snapshot.connected_requests >= 1);

    let report = manager.report(1, Some("R")).unwrap();
    assert!(report.contains("R multiDevice:No canBlock:Yes autoConnect:Yes"));
    assert!(report.contains("connected:Yes"));
    assert!(report.contains("mock connects 1"));
    assert!(matches!(
        manager.report(0, Some("missing")),
        Err(Error::PortNotFound(_))
    ));
}
