//! In-memory I2C bus and delay used by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal_1::i2c::{ErrorKind, ErrorType, NoAcknowledgeSource, Operation};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Write(u8, Vec<u8>),
    Read(u8, usize),
}

#[derive(Default)]
struct State {
    present: HashSet<u8>,
    responses: HashMap<(u8, Vec<u8>), VecDeque<Vec<u8>>>,
    failing: HashSet<(u8, Vec<u8>)>,
    last_write: HashMap<u8, Vec<u8>>,
    log: Vec<Op>,
    hang: bool,
}

/// Reads answer with the bytes registered for the last write to the same
/// address; unknown registers read as zeros.
#[derive(Clone, Default)]
pub struct MockBus {
    state: Rc<RefCell<State>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, address: u8) {
        self.state.borrow_mut().present.insert(address);
    }

    pub fn respond(&self, address: u8, command: &[u8], data: &[u8]) {
        self.respond_sequence(address, command, &[data]);
    }

    /// Successive reads consume the sequence, the last entry repeats.
    pub fn respond_sequence(&self, address: u8, command: &[u8], data: &[&[u8]]) {
        let queue = data.iter().map(|d| d.to_vec()).collect();
        self.state.borrow_mut().responses.insert((address, command.to_vec()), queue);
    }

    pub fn fail_on(&self, address: u8, command: &[u8]) {
        self.state.borrow_mut().failing.insert((address, command.to_vec()));
    }

    pub fn heal(&self, address: u8, command: &[u8]) {
        self.state.borrow_mut().failing.remove(&(address, command.to_vec()));
    }

    /// Every following transaction never completes.
    pub fn hang(&self) {
        self.state.borrow_mut().hang = true;
    }

    pub fn transactions(&self) -> Vec<Op> {
        self.state.borrow().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.borrow_mut().log.clear();
    }

    pub fn writes(&self, address: u8) -> Vec<Vec<u8>> {
        self.state
            .borrow()
            .log
            .iter()
            .filter_map(|op| match op {
                Op::Write(a, bytes) if *a == address => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }
}

impl ErrorType for MockBus {
    type Error = ErrorKind;
}

impl I2c for MockBus {
    async fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        if self.state.borrow().hang {
            core::future::pending::<()>().await;
        }

        let mut state = self.state.borrow_mut();
        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(bytes) => {
                    state.log.push(Op::Write(address, bytes.to_vec()));
                    if !state.present.contains(&address) {
                        return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
                    }
                    if state.failing.contains(&(address, bytes.to_vec())) {
                        return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data));
                    }
                    state.last_write.insert(address, bytes.to_vec());
                }
                Operation::Read(buffer) => {
                    state.log.push(Op::Read(address, buffer.len()));
                    if !state.present.contains(&address) {
                        return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
                    }
                    let command = state.last_write.get(&address).cloned().unwrap_or_default();
                    buffer.fill(0);
                    if let Some(queue) = state.responses.get_mut(&(address, command)) {
                        let data = if queue.len() > 1 { queue.pop_front().unwrap_or_default() } else { queue.front().cloned().unwrap_or_default() };
                        let n = data.len().min(buffer.len());
                        buffer[..n].copy_from_slice(&data[..n]);
                    }
                }
            }
        }

        Ok(())
    }
}

/// Returns immediately and accumulates the requested time.
#[derive(Clone, Default)]
pub struct NoopDelay {
    requested_ns: Rc<Cell<u64>>,
}

impl NoopDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requested_ms(&self) -> u64 {
        self.requested_ns.get() / 1_000_000
    }
}

impl DelayNs for NoopDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.requested_ns.set(self.requested_ns.get() + u64::from(ns));
    }

    async fn delay_us(&mut self, us: u32) {
        self.requested_ns.set(self.requested_ns.get() + u64::from(us) * 1_000);
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.requested_ns.set(self.requested_ns.get() + u64::from(ms) * 1_000_000);
    }
}
