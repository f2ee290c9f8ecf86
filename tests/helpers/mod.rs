#![allow(dead_code)]
use std::{cell::RefCell, convert::Infallible, rc::Rc};

use embedded_hal::digital::{ErrorKind, ErrorType, InputPin, PinState};
use usbd_hexloader::*;

pub const FLASH_BASE: u32 = 0x0800_0000;
pub const SECTOR_SIZE: u32 = 16 * 1024;
pub const SECTOR_COUNT: u32 = 12;
pub const APP_FIRST_SECTOR: u32 = 8;
pub const APP_ADDRESS: u32 = FLASH_BASE + APP_FIRST_SECTOR * SECTOR_SIZE;

pub const TYPE_PROGRAM: u16 = 0x2001;
pub const TYPE_TELEMETRY: u16 = 0x2002;
pub const TYPE_ERASE: u16 = 0x2004;
pub const TYPE_ENTER_APP: u16 = 0x1979;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestFlashError {
    Erase,
    Program,
    OutOfRange,
}

/// In-memory flash with uniform sectors and fault injection.
pub struct TestFlash {
    pub memory: Vec<u8>,
    pub locked: bool,
    pub unlocks: usize,
    pub locks: usize,
    pub erased: Vec<u32>,
    pub programmed: Vec<(u32, u8)>,
    pub fail_erase_sector: Option<u32>,
    pub fail_program_at: Option<u32>,
}

impl TestFlash {
    pub fn new() -> Self {
        Self {
            memory: vec![0xff; (SECTOR_SIZE * SECTOR_COUNT) as usize],
            locked: true,
            unlocks: 0,
            locks: 0,
            erased: Vec::new(),
            programmed: Vec::new(),
            fail_erase_sector: None,
            fail_program_at: None,
        }
    }

    fn index(address: u32) -> Option<usize> {
        let offset = address.checked_sub(FLASH_BASE)?;
        if offset < SECTOR_SIZE * SECTOR_COUNT {
            Some(offset as usize)
        } else {
            None
        }
    }

    /// Places `data` at `address` bypassing the controller, as if left by an
    /// earlier session.
    pub fn preload(&mut self, address: u32, data: &[u8]) {
        let start = Self::index(address).unwrap();
        self.memory[start..start + data.len()].copy_from_slice(data);
    }

    pub fn bytes(&self, address: u32, len: usize) -> &[u8] {
        let start = Self::index(address).unwrap();
        &self.memory[start..start + len]
    }
}

impl FlashController for TestFlash {
    type Error = TestFlashError;
    const APPLICATION_FIRST_SECTOR: u32 = APP_FIRST_SECTOR;
    const APPLICATION_SECTOR_COUNT: u32 = SECTOR_COUNT - APP_FIRST_SECTOR;

    fn unlock(&mut self) {
        assert!(self.locked, "double unlock");
        self.locked = false;
        self.unlocks += 1;
    }

    fn lock(&mut self) {
        self.locked = true;
        self.locks += 1;
    }

    fn erase_sector(&mut self, sector: u32) -> Result<(), Self::Error> {
        assert!(!self.locked, "erase while locked");
        if self.fail_erase_sector == Some(sector) || sector >= SECTOR_COUNT {
            return Err(TestFlashError::Erase);
        }
        let start = (sector * SECTOR_SIZE) as usize;
        self.memory[start..start + SECTOR_SIZE as usize].fill(0xff);
        self.erased.push(sector);
        Ok(())
    }

    fn program_byte(&mut self, address: u32, value: u8) -> Result<(), Self::Error> {
        assert!(!self.locked, "program while locked");
        if self.fail_program_at == Some(address) {
            return Err(TestFlashError::Program);
        }
        let index = Self::index(address).ok_or(TestFlashError::OutOfRange)?;
        self.memory[index] = value;
        self.programmed.push((address, value));
        Ok(())
    }

    fn read(&self, address: u32, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = Self::index(address + i as u32).map_or(0xff, |idx| self.memory[idx]);
        }
    }
}

/// Same flash, with the erased check before programming enabled.
pub struct CheckedFlash(pub TestFlash);

impl FlashController for CheckedFlash {
    type Error = TestFlashError;
    const APPLICATION_FIRST_SECTOR: u32 = APP_FIRST_SECTOR;
    const APPLICATION_SECTOR_COUNT: u32 = SECTOR_COUNT - APP_FIRST_SECTOR;
    const CHECK_ERASED: bool = true;

    fn unlock(&mut self) {
        self.0.unlock()
    }
    fn lock(&mut self) {
        self.0.lock()
    }
    fn erase_sector(&mut self, sector: u32) -> Result<(), Self::Error> {
        self.0.erase_sector(sector)
    }
    fn program_byte(&mut self, address: u32, value: u8) -> Result<(), Self::Error> {
        self.0.program_byte(address, value)
    }
    fn read(&self, address: u32, buf: &mut [u8]) {
        self.0.read(address, buf)
    }
}

/// Things observed by the test platform and the test sink, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Sent(FrameBuf),
    Flushed,
    FaultsDisabled,
    Deinit,
    VectorTable(u32),
    Start { initial_sp: u32, reset_vector: u32 },
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

pub struct TestPlatform {
    pub events: EventLog,
}

impl Platform for TestPlatform {
    const APPLICATION_ADDRESS: u32 = APP_ADDRESS;

    fn disable_fault_handlers(&mut self) {
        self.events.borrow_mut().push(Event::FaultsDisabled);
    }

    fn deinit_peripherals(&mut self) {
        self.events.borrow_mut().push(Event::Deinit);
    }

    fn relocate_vector_table(&mut self, address: u32) {
        self.events.borrow_mut().push(Event::VectorTable(address));
    }

    unsafe fn start_application(&mut self, initial_sp: u32, reset_vector: u32) -> ! {
        self.events.borrow_mut().push(Event::Start {
            initial_sp,
            reset_vector,
        });
        panic!("emulate device reset");
    }
}

/// Response sink recording into the shared event log.
pub struct TestSink {
    pub events: EventLog,
    pub fail: bool,
}

impl FrameSink for TestSink {
    type Error = ();

    fn send(&mut self, frame: &FrameBuf) -> Result<(), ()> {
        if self.fail {
            return Err(());
        }
        self.events.borrow_mut().push(Event::Sent(*frame));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ()> {
        self.events.borrow_mut().push(Event::Flushed);
        Ok(())
    }
}

#[derive(Debug)]
pub struct PinFault;

impl embedded_hal::digital::Error for PinFault {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Boot pin with a fixed level, `None` fails every read.
pub struct TestPin {
    pub level: Option<PinState>,
    pub reads: usize,
}

impl TestPin {
    pub fn new(level: Option<PinState>) -> Self {
        Self { level, reads: 0 }
    }
}

impl ErrorType for TestPin {
    type Error = PinFault;
}

impl InputPin for TestPin {
    fn is_high(&mut self) -> Result<bool, PinFault> {
        self.reads += 1;
        self.level.map(|l| l == PinState::High).ok_or(PinFault)
    }

    fn is_low(&mut self) -> Result<bool, PinFault> {
        self.reads += 1;
        self.level.map(|l| l == PinState::Low).ok_or(PinFault)
    }
}

pub struct LowPin;

impl ErrorType for LowPin {
    type Error = Infallible;
}

impl InputPin for LowPin {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(false)
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(true)
    }
}

/// Builds one binary HEX record with a valid checksum.
pub fn record(kind: u8, offset: u16, data: &[u8]) -> Vec<u8> {
    let mut rec = vec![data.len() as u8];
    rec.extend_from_slice(&offset.to_be_bytes());
    rec.push(kind);
    rec.extend_from_slice(data);
    let sum = rec.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    rec.push(sum.wrapping_neg());
    rec
}

pub fn ext_linear(base: u16) -> Vec<u8> {
    record(0x04, 0, &base.to_be_bytes())
}

/// Encoded request frame.
pub fn request(msg_type: u16, payload: &[u8]) -> FrameBuf {
    Frame::request(msg_type, payload).unwrap().encode()
}

/// Vector table head as programmed by a linker: stack pointer, reset vector.
pub fn vector_table(initial_sp: u32, reset_vector: u32) -> Vec<u8> {
    let mut v = initial_sp.to_le_bytes().to_vec();
    v.extend_from_slice(&reset_vector.to_le_bytes());
    v
}

pub fn new_dispatcher(flash: TestFlash) -> (Dispatcher<TestFlash, TestPlatform>, EventLog) {
    let events = EventLog::default();
    let platform = TestPlatform {
        events: events.clone(),
    };
    (
        Dispatcher::new(FlashProgrammer::new(flash), ModeController::new(platform)),
        events,
    )
}

/// Decodes a response and returns its status.
pub fn status_of(response: &FrameBuf) -> Status {
    let frame = Frame::decode(response).unwrap();
    Status::try_from(frame.status()).unwrap()
}
