use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::command::Instruction;
use crate::error::{BusError, Result};
use crate::regs::{self, RAM_SIZE, RAM_START, REGISTER_SPACE};
use crate::traits::{Completion, SpiBus, Transfer};

/// Layout and behaviour of a [`SimController`].
///
/// Mirrors what device bring-up would have programmed into the real
/// controller: where the transmit-event ring lives and where each transmit
/// FIFO keeps its message object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// RAM offset of the transmit-event ring.
    pub tef_offset: u16,
    /// Number of records in the transmit-event ring.
    pub tef_count: usize,
    /// Whether event records carry a timestamp word.
    pub tef_timestamp: bool,
    /// `(fifo, ram offset)` of every configured transmit FIFO.
    pub fifos: Vec<(u8, u16)>,
    /// Transmit armed FIFOs as soon as their request bit is set.
    pub auto_transmit: bool,
}

impl SimConfig {
    pub fn new(tef_count: usize, tef_timestamp: bool) -> Self {
        Self {
            tef_offset: 0,
            tef_count,
            tef_timestamp,
            fifos: Vec::new(),
            auto_transmit: false,
        }
    }

    /// Add a transmit FIFO whose message object lives at `ram_offset`.
    pub fn with_fifo(mut self, fifo: u8, ram_offset: u16) -> Self {
        self.fifos.push((fifo, ram_offset));
        self
    }

    pub fn with_auto_transmit(mut self, auto_transmit: bool) -> Self {
        self.auto_transmit = auto_transmit;
        self
    }

    fn record_size(&self) -> usize {
        if self.tef_timestamp {
            12
        } else {
            8
        }
    }
}

/// Bus traffic observed by a [`SimController`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusCounters {
    /// Synchronous reads.
    pub reads: u64,
    /// Synchronous writes.
    pub writes: u64,
    /// Asynchronous transfers executed.
    pub async_transfers: u64,
    /// Asynchronous submissions refused.
    pub rejected: u64,
}

impl BusCounters {
    /// Total bus round trips.
    pub fn total(&self) -> u64 {
        self.reads + self.writes + self.async_transfers
    }
}

struct Job {
    transfer: Transfer,
    complete: Completion,
}

#[derive(Default)]
struct Faults {
    reject_submits: usize,
    reject_after: Option<usize>,
    fail_completions: usize,
}

struct Shared {
    device: Mutex<Device>,
    queued: Mutex<usize>,
    drained: Condvar,
    faults: Mutex<Faults>,
}

/// In-memory MCP25xxFD model behind the [`SpiBus`] trait.
///
/// Asynchronous transfers run in submission order on a dedicated worker
/// thread, which is also where their completion callbacks are invoked.
pub struct SimController {
    shared: Arc<Shared>,
    queue: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimController {
    /// Create a simulated controller and start its bus worker.
    pub fn new(config: SimConfig) -> Self {
        let shared = Arc::new(Shared {
            device: Mutex::new(Device::new(config)),
            queued: Mutex::new(0),
            drained: Condvar::new(),
            faults: Mutex::new(Faults::default()),
        });

        let (tx, rx) = mpsc::channel::<Job>();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("mcpfd-sim-bus".to_string())
            .spawn(move || run_worker(worker_shared, rx))
            .ok();
        if worker.is_none() {
            warn!("failed to spawn simulated bus worker");
        }

        Self {
            shared,
            queue: Mutex::new(worker.as_ref().map(|_| tx)),
            worker: Mutex::new(worker),
        }
    }

    /// Complete the transmission requested on `fifo`.
    ///
    /// Writes a transmit-event record and clears the request bit. Returns
    /// `false` if the FIFO had no pending request.
    pub fn transmit(&self, fifo: u8) -> bool {
        self.shared.device.lock().transmit(fifo)
    }

    /// Complete every pending transmission, lowest FIFO first.
    pub fn transmit_pending(&self) -> Vec<u8> {
        let mut device = self.shared.device.lock();
        let pending = device.reg(regs::CAN_TXREQ);
        (0..regs::FIFO_COUNT)
            .filter(|fifo| pending & (1 << fifo) != 0)
            .filter(|fifo| device.transmit(*fifo))
            .collect()
    }

    /// Abort the transmission requested on `fifo`.
    ///
    /// Returns `false` if the FIFO had no pending request.
    pub fn abort(&self, fifo: u8) -> bool {
        self.shared.device.lock().abort(fifo)
    }

    /// Raw transmit-request bitmask, one bit per FIFO.
    pub fn pending_fifos(&self) -> u32 {
        self.shared.device.lock().reg(regs::CAN_TXREQ)
    }

    pub fn set_auto_transmit(&self, auto_transmit: bool) {
        self.shared.device.lock().config.auto_transmit = auto_transmit;
    }

    /// Append an arbitrary record to the transmit-event ring.
    pub fn inject_event(&self, id: u32, flags: u32) {
        self.shared.device.lock().push_event(id, flags);
    }

    /// Records waiting in the transmit-event ring.
    pub fn tef_level(&self) -> usize {
        self.shared.device.lock().tef_level
    }

    /// Read a register without counting it as bus traffic.
    pub fn peek_register(&self, addr: u16) -> u32 {
        self.shared.device.lock().reg(addr)
    }

    /// Read device RAM without counting it as bus traffic.
    pub fn peek_ram(&self, offset: u16, len: usize) -> Vec<u8> {
        let device = self.shared.device.lock();
        let start = offset as usize;
        device
            .ram
            .get(start..start + len)
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    }

    /// Refuse the next `count` asynchronous submissions with [`BusError::Busy`].
    pub fn reject_next_submits(&self, count: usize) {
        self.shared.faults.lock().reject_submits = count;
    }

    /// Accept the next `accepted` submissions, then refuse one with
    /// [`BusError::Busy`].
    pub fn reject_submit_after(&self, accepted: usize) {
        self.shared.faults.lock().reject_after = Some(accepted);
    }

    /// Fail the next `count` accepted transfers without applying them.
    pub fn fail_next_completions(&self, count: usize) {
        self.shared.faults.lock().fail_completions = count;
    }

    /// Block until every queued transfer has run and its callback returned.
    ///
    /// Must not be called from a completion callback.
    pub fn flush(&self) {
        let mut queued = self.shared.queued.lock();
        while *queued > 0 {
            self.shared.drained.wait(&mut queued);
        }
    }

    pub fn counters(&self) -> BusCounters {
        self.shared.device.lock().counters
    }
}

impl SpiBus for SimController {
    fn read(&self, addr: u16, len: usize) -> Result<Bytes> {
        self.shared.device.lock().read(addr, len)
    }

    fn write(&self, addr: u16, data: &[u8]) -> Result<()> {
        self.shared.device.lock().write(addr, data)
    }

    fn submit_async(&self, transfer: Transfer, complete: Completion) -> Result<()> {
        {
            let mut faults = self.shared.faults.lock();
            let reject = if faults.reject_submits > 0 {
                faults.reject_submits -= 1;
                true
            } else {
                match faults.reject_after {
                    Some(0) => {
                        faults.reject_after = None;
                        true
                    }
                    Some(remaining) => {
                        faults.reject_after = Some(remaining - 1);
                        false
                    }
                    None => false,
                }
            };
            if reject {
                self.shared.device.lock().counters.rejected += 1;
                return Err(BusError::Busy);
            }
        }

        match transfer.command() {
            Some((Instruction::Write, _)) => {}
            Some(_) => return Err(BusError::Malformed("only writes can be queued")),
            None => return Err(BusError::Malformed("missing command header")),
        }

        let queue = self.queue.lock();
        let Some(sender) = queue.as_ref() else {
            return Err(BusError::Shutdown);
        };

        *self.shared.queued.lock() += 1;
        if sender.send(Job { transfer, complete }).is_err() {
            finish_one(&self.shared);
            return Err(BusError::Shutdown);
        }
        Ok(())
    }
}

impl Drop for SimController {
    fn drop(&mut self) {
        self.queue.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            // The last handle can be released from inside a completion callback.
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

impl std::fmt::Debug for SimController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimController")
            .field("counters", &self.counters())
            .finish()
    }
}

fn run_worker(shared: Arc<Shared>, rx: mpsc::Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        let inject_failure = {
            let mut faults = shared.faults.lock();
            if faults.fail_completions > 0 {
                faults.fail_completions -= 1;
                true
            } else {
                false
            }
        };

        let result = if inject_failure {
            Err(BusError::TransferFailed("injected completion failure".to_string()))
        } else {
            shared.device.lock().execute(&job.transfer)
        };

        (job.complete)(result);
        finish_one(&shared);
    }
    debug!("simulated bus worker stopped");
}

fn finish_one(shared: &Shared) {
    let mut queued = shared.queued.lock();
    *queued = queued.saturating_sub(1);
    if *queued == 0 {
        shared.drained.notify_all();
    }
}

struct Device {
    config: SimConfig,
    regs: Vec<u8>,
    ram: Vec<u8>,
    tef_head: usize,
    tef_tail: usize,
    tef_level: usize,
    clock: u32,
    counters: BusCounters,
}

/// Timestamp increment per transmitted frame.
const CLOCK_STEP: u32 = 0x100;

impl Device {
    fn new(config: SimConfig) -> Self {
        Self {
            config,
            regs: vec![0; REGISTER_SPACE],
            ram: vec![0; RAM_SIZE],
            tef_head: 0,
            tef_tail: 0,
            tef_level: 0,
            clock: 0,
            counters: BusCounters::default(),
        }
    }

    fn read(&mut self, addr: u16, len: usize) -> Result<Bytes> {
        self.counters.reads += 1;
        let bytes = self.region(addr, len)?;
        Ok(Bytes::copy_from_slice(bytes))
    }

    fn write(&mut self, addr: u16, data: &[u8]) -> Result<()> {
        self.counters.writes += 1;
        self.store(addr, data)
    }

    fn execute(&mut self, transfer: &Transfer) -> Result<()> {
        self.counters.async_transfers += 1;
        match transfer.command() {
            Some((Instruction::Write, addr)) => self.store(addr, transfer.payload()),
            _ => Err(BusError::Malformed("only writes can be queued")),
        }
    }

    fn region(&self, addr: u16, len: usize) -> Result<&[u8]> {
        let start = addr as usize;
        let out_of_range = BusError::AddressOutOfRange { addr, len };
        if start < REGISTER_SPACE {
            return self.regs.get(start..start + len).ok_or(out_of_range);
        }
        let offset = start - RAM_START as usize;
        self.ram.get(offset..offset + len).ok_or(out_of_range)
    }

    fn store(&mut self, addr: u16, data: &[u8]) -> Result<()> {
        let start = addr as usize;
        let len = data.len();
        if start >= RAM_START as usize {
            let offset = start - RAM_START as usize;
            let dst = self
                .ram
                .get_mut(offset..offset + len)
                .ok_or(BusError::AddressOutOfRange { addr, len })?;
            dst.copy_from_slice(data);
            return Ok(());
        }

        let dst = self
            .regs
            .get_mut(start..start + len)
            .ok_or(BusError::AddressOutOfRange { addr, len })?;
        dst.copy_from_slice(data);
        self.after_register_write(addr, len);
        Ok(())
    }

    fn after_register_write(&mut self, addr: u16, len: usize) {
        if touches(addr, len, regs::CAN_TEFCON) {
            let tefcon = self.reg(regs::CAN_TEFCON);
            if tefcon & regs::CAN_TEFCON_UINC != 0 {
                self.set_reg(regs::CAN_TEFCON, tefcon & !regs::CAN_TEFCON_UINC);
                self.consume_event();
            }
        }

        let fifos: Vec<u8> = self.config.fifos.iter().map(|(fifo, _)| *fifo).collect();
        for fifo in fifos {
            if !touches(addr, len, regs::fifocon(fifo)) {
                continue;
            }
            let fifocon = self.reg(regs::fifocon(fifo));
            self.set_reg(regs::fifocon(fifo), fifocon & !regs::CAN_FIFOCON_UINC);
            let txreq = self.reg(regs::CAN_TXREQ);
            if fifocon & regs::CAN_FIFOCON_TXREQ != 0 {
                self.set_reg(regs::CAN_TXREQ, txreq | (1 << fifo));
                debug!(fifo, "simulated fifo armed");
                if self.config.auto_transmit {
                    self.transmit(fifo);
                }
            } else if txreq & (1 << fifo) != 0 {
                // Clearing TXREQ of a pending FIFO requests an abort.
                self.abort(fifo);
            }
        }

        self.refresh();
    }

    fn transmit(&mut self, fifo: u8) -> bool {
        if !self.clear_request(fifo) {
            return false;
        }
        let Some(offset) = self.object_offset(fifo) else {
            return false;
        };

        let id = self.ram_word(offset);
        let flags = self.ram_word(offset + 4);
        self.push_event(id, flags);
        debug!(fifo, id, flags, "simulated transmission complete");
        true
    }

    fn abort(&mut self, fifo: u8) -> bool {
        if !self.clear_request(fifo) {
            return false;
        }
        let fifosta = self.reg(regs::fifosta(fifo));
        self.set_reg(
            regs::fifosta(fifo),
            fifosta | regs::CAN_FIFOSTA_TXABT | regs::CAN_FIFOSTA_TXATIF,
        );
        self.refresh();
        debug!(fifo, "simulated transmission aborted");
        true
    }

    fn clear_request(&mut self, fifo: u8) -> bool {
        let txreq = self.reg(regs::CAN_TXREQ);
        if fifo >= regs::FIFO_COUNT || txreq & (1 << fifo) == 0 {
            return false;
        }
        self.set_reg(regs::CAN_TXREQ, txreq & !(1 << fifo));
        let fifocon = self.reg(regs::fifocon(fifo));
        self.set_reg(regs::fifocon(fifo), fifocon & !regs::CAN_FIFOCON_TXREQ);
        true
    }

    fn push_event(&mut self, id: u32, flags: u32) {
        if self.tef_level >= self.config.tef_count {
            warn!("simulated transmit-event ring overflow, event dropped");
            return;
        }
        self.clock = self.clock.wrapping_add(CLOCK_STEP);
        let record = self.config.tef_offset as usize + self.tef_head * self.config.record_size();
        let mut words = vec![id, flags];
        if self.config.tef_timestamp {
            words.push(self.clock);
        }
        for (i, word) in words.iter().enumerate() {
            let at = record + 4 * i;
            self.ram[at..at + 4].copy_from_slice(&word.to_le_bytes());
        }
        self.tef_head = (self.tef_head + 1) % self.config.tef_count;
        self.tef_level += 1;
        self.refresh();
    }

    fn consume_event(&mut self) {
        if self.tef_level == 0 {
            warn!("transmit-event ring advanced while empty");
            return;
        }
        self.tef_tail = (self.tef_tail + 1) % self.config.tef_count;
        self.tef_level -= 1;
    }

    fn refresh(&mut self) {
        let tef_pending = self.tef_level > 0;
        let tefsta = if tef_pending {
            regs::CAN_TEFSTA_TEFNEIF
        } else {
            0
        };
        self.set_reg(regs::CAN_TEFSTA, tefsta);

        let txatif = (0..regs::FIFO_COUNT)
            .filter(|fifo| self.reg(regs::fifosta(*fifo)) & regs::CAN_FIFOSTA_TXATIF != 0)
            .fold(0u32, |mask, fifo| mask | (1 << fifo));
        self.set_reg(regs::CAN_TXATIF, txatif);

        let mut intf = 0;
        if tef_pending {
            intf |= regs::CAN_INT_TEFIF;
        }
        if txatif != 0 {
            intf |= regs::CAN_INT_TXATIF;
        }
        self.set_reg(regs::CAN_INT, intf);
    }

    fn object_offset(&self, fifo: u8) -> Option<usize> {
        self.config
            .fifos
            .iter()
            .find(|(f, _)| *f == fifo)
            .map(|(_, offset)| *offset as usize)
    }

    fn ram_word(&self, offset: usize) -> u32 {
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.ram[offset..offset + 4]);
        u32::from_le_bytes(word)
    }

    fn reg(&self, addr: u16) -> u32 {
        let start = addr as usize;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.regs[start..start + 4]);
        u32::from_le_bytes(word)
    }

    fn set_reg(&mut self, addr: u16, value: u32) {
        let start = addr as usize;
        self.regs[start..start + 4].copy_from_slice(&value.to_le_bytes());
    }
}

fn touches(addr: u16, len: usize, reg: u16) -> bool {
    let start = addr as usize;
    let reg = reg as usize;
    start < reg + 4 && reg < start + len
}
