//! ## Common
//!
//! A scripted transport standing in for an instrument link, plus helpers
//! shared by the integration tests.
//!

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rs_asyn::{Addr, Common, Error, Gpib, Interface, Manager, Octet, PortAttributes, Request, Result, SrqHandler};

/// Route `tracing` output to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// ### Wait Until
///
/// Poll `condition` until it holds or `timeout` passes.
///
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[derive(Default)]
struct MockState {
    responses: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    eos: Vec<u8>,
    srq: Option<SrqHandler>,
    polls: Vec<(Addr, bool)>,
    commands: Vec<String>,
}

/// ### Mock Driver
///
/// Answers reads from a queue of scripted responses and records everything
/// written to it. A read with nothing queued times out.
///
#[derive(Default)]
pub struct MockDriver {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub fail_connect: AtomicBool,
    state: Mutex<MockState>,
}

impl MockDriver {
    pub fn push_response(&self, response: &[u8]) {
        self.state.lock().responses.push_back(response.to_vec());
    }

    pub fn clear_responses(&self) {
        self.state.lock().responses.clear();
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    pub fn eos(&self) -> Vec<u8> {
        self.state.lock().eos.clone()
    }

    pub fn polls(&self) -> Vec<(Addr, bool)> {
        self.state.lock().polls.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    pub fn has_srq_handler(&self) -> bool {
        self.state.lock().srq.is_some()
    }

    /// Raise a service request from `addr` as the driver's SRQ thread would.
    pub fn trigger_srq(&self, addr: Addr, status_byte: u8) -> bool {
        let handler = self.state.lock().srq.clone();
        match handler {
            Some(handler) => {
                handler(addr, status_byte);
                true
            }
            None => false,
        }
    }
}

impl Common for MockDriver {
    fn report(&self, out: &mut dyn fmt::Write, details: u32) -> fmt::Result {
        writeln!(out, "    mock connects {}", self.connects.load(Ordering::SeqCst))?;
        if details > 0 {
            writeln!(out, "    mock queued responses {}", self.state.lock().responses.len())?;
        }
        Ok(())
    }

    fn connect(&self, user: &Request) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Transport("connection refused".into()));
        }
        user.manager().exception_connect(user)
    }

    fn disconnect(&self, user: &Request) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        user.manager().exception_disconnect(user)
    }
}

impl Octet for MockDriver {
    fn write(&self, _user: &Request, data: &[u8]) -> Result<usize> {
        self.state.lock().written.push(data.to_vec());
        Ok(data.len())
    }

    fn read(&self, _user: &Request, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let Some(mut pending) = state.responses.pop_front() else {
            return Err(Error::TransportTimeout);
        };
        let (end, skip) = match find(&pending, &state.eos) {
            Some(at) => (at, state.eos.len()),
            None => (pending.len(), 0),
        };
        let n = end.min(buf.len());
        buf[..n].copy_from_slice(&pending[..n]);
        let consumed = if n < end { n } else { end + skip };
        if consumed < pending.len() {
            pending.drain(..consumed);
            state.responses.push_front(pending);
        }
        Ok(n)
    }

    fn flush(&self, _user: &Request) -> Result<()> {
        self.state.lock().responses.clear();
        Ok(())
    }

    fn set_eos(&self, _user: &Request, eos: &[u8]) -> Result<()> {
        self.state.lock().eos = eos.to_vec();
        Ok(())
    }

    fn get_eos(&self, _user: &Request) -> Result<Vec<u8>> {
        Ok(self.eos())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

impl Gpib for MockDriver {
    fn ifc(&self, _user: &Request) -> Result<()> {
        self.state.lock().commands.push("ifc".into());
        Ok(())
    }

    fn ren(&self, _user: &Request, assert: bool) -> Result<()> {
        self.state.lock().commands.push(format!("ren {}", assert));
        Ok(())
    }

    fn universal_cmd(&self, _user: &Request, cmd: u8) -> Result<()> {
        self.state.lock().commands.push(format!("universal {:#04x}", cmd));
        Ok(())
    }

    fn addressed_cmd(&self, user: &Request, data: &[u8]) -> Result<usize> {
        let addr = user.addr()?;
        self.state
            .lock()
            .commands
            .push(format!("addressed {} {:02x?}", addr, data));
        Ok(data.len())
    }

    fn register_srq_handler(&self, _user: &Request, handler: SrqHandler) -> Result<()> {
        self.state.lock().srq = Some(handler);
        Ok(())
    }

    fn poll_addr(&self, _user: &Request, addr: Addr, enable: bool) -> Result<()> {
        self.state.lock().polls.push((addr, enable));
        Ok(())
    }
}

/// ### Mock Port
///
/// Register an auto-connecting port served by a fresh [`MockDriver`].
///
/// #### Arguments
/// - `gpib` -> also register the GPIB interface
///
pub fn mock_port(manager: &Manager, name: &str, attributes: PortAttributes, gpib: bool) -> Arc<MockDriver> {
    let driver = Arc::new(MockDriver::default());
    manager
        .register_port(name, attributes, true)
        .expect("register port");
    manager
        .register_interface(name, Interface::Common(driver.clone()))
        .expect("register common");
    manager
        .register_interface(name, Interface::Octet(driver.clone()))
        .expect("register octet");
    if gpib {
        manager
            .register_interface(name, Interface::Gpib(driver.clone()))
            .expect("register gpib");
    }
    driver
}

pub fn blocking() -> PortAttributes {
    PortAttributes {
        can_block: true,
        multi_device: false,
    }
}

pub fn blocking_multi_device() -> PortAttributes {
    PortAttributes {
        can_block: true,
        multi_device: true,
    }
}

pub fn synchronous() -> PortAttributes {
    PortAttributes {
        can_block: false,
        multi_device: false,
    }
}
