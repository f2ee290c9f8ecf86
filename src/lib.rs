#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
//!
//! Device side of a small USB bootloader: a framed request/response
//! protocol over a bulk pipe, Intel HEX record flashing, and the hand-off to
//! the application image.
//!
//! ## About
//!
//! The device boots into this code. A single GPIO read decides whether it
//! stays in update mode or jumps straight to the application. In update mode
//! the host sends 64-byte frames over a pair of bulk endpoints; each frame is
//! answered with exactly one frame carrying a status code.
//!
//! Processing is split between two contexts:
//!
//! * the USB interrupt, where [`BulkTransport`] pushes received frames into an
//!   inbound [`TaskQueue`] and writes responses popped from an outbound one;
//! * the main loop, where [`Dispatcher`] pops requests, validates them, and
//!   decodes HEX records into flash writes.
//!
//! The queues are lock-free single-producer/single-consumer ring buffers.
//!
//! Flash access and the register work of the application jump are provided
//! by the user of the library through the [`FlashController`] and
//! [`Platform`] traits. A Cortex-M [`Platform`] is available with the
//! `cortex-m` feature.
//!
//! ### Frame layout
//!
//! | offset | size | field                                      |
//! |--------|------|--------------------------------------------|
//! | 0      | 2    | start marker `FA FB`                       |
//! | 2      | 2    | status code                                |
//! | 4      | 2    | message type, echoed in the response       |
//! | 6      | 2    | payload length, at most 52                 |
//! | 8      | 52   | payload                                    |
//! | 60     | 2    | CRC-16/CCITT-FALSE over the payload bytes  |
//! | 62     | 2    | end marker `FC FD`                         |
//!
//! Multi-byte fields are little-endian.
//!
//! ### Supported requests
//!
//! * Program data - the payload is one binary HEX record
//! * Telemetry - returns a 16-bit counter
//! * Erase - erases the application region and starts a new session
//! * Enter application - answered, then control passes to the application
//!
//! ### Limitations
//!
//! * Partially programmed data is not rolled back when a write fails. The host
//!   must restart the whole transfer, starting with an erase request.
//!
//! * Only extended linear address records change the address. Segment address
//!   and start address records are accepted and ignored.
//!
//! ## Example
//!
//! ```no_run
//! use core::convert::Infallible;
//! use embedded_hal::digital::{ErrorType, InputPin};
//! use usbd_hexloader::*;
//!
//! struct Flash;
//!
//! impl FlashController for Flash {
//!     type Error = ();
//!     const APPLICATION_FIRST_SECTOR: u32 = 5;
//!     const APPLICATION_SECTOR_COUNT: u32 = 7;
//!
//!     fn unlock(&mut self) {}
//!     fn lock(&mut self) {}
//!
//!     fn erase_sector(&mut self, sector: u32) -> Result<(), ()> {
//!         // erase with the vendor HAL
//!         Ok(())
//!     }
//!
//!     fn program_byte(&mut self, address: u32, value: u8) -> Result<(), ()> {
//!         // program with the vendor HAL
//!         Ok(())
//!     }
//!
//!     fn read(&self, address: u32, buf: &mut [u8]) {
//!         for (i, b) in buf.iter_mut().enumerate() {
//!             *b = unsafe { ((address as usize + i) as *const u8).read_volatile() };
//!         }
//!     }
//! }
//!
//! struct Board;
//!
//! impl Platform for Board {
//!     const APPLICATION_ADDRESS: u32 = 0x0802_0000;
//!
//!     fn disable_fault_handlers(&mut self) {}
//!     fn deinit_peripherals(&mut self) {}
//!     fn relocate_vector_table(&mut self, address: u32) {}
//!
//!     unsafe fn start_application(&mut self, initial_sp: u32, reset_vector: u32) -> ! {
//!         loop {}
//!     }
//! }
//!
//! struct BootPin;
//!
//! impl ErrorType for BootPin {
//!     type Error = Infallible;
//! }
//!
//! impl InputPin for BootPin {
//!     fn is_high(&mut self) -> Result<bool, Infallible> {
//!         Ok(false)
//!     }
//!     fn is_low(&mut self) -> Result<bool, Infallible> {
//!         Ok(true)
//!     }
//! }
//!
//! let flash = FlashProgrammer::new(Flash);
//!
//! // Does not return if the application is selected.
//! let mode = ModeController::new(Board).boot(&mut BootPin, &flash);
//!
//! let inbound: &'static mut TaskQueue = Box::leak(Box::new(TaskQueue::new(8).unwrap()));
//! let outbound: &'static mut TaskQueue = Box::leak(Box::new(TaskQueue::new(2).unwrap()));
//! let (rx_producer, mut rx_consumer) = inbound.split();
//! let (mut tx_producer, tx_consumer) = outbound.split();
//!
//! // let transport = BulkTransport::new(&usb_bus_alloc, rx_producer, tx_consumer).unwrap();
//! // `transport` and `usb_dev` then move to the USB interrupt handler.
//!
//! let mut dispatcher = Dispatcher::new(flash, mode);
//! loop {
//!     dispatcher.poll(&mut rx_consumer, &mut tx_producer).ok();
//! }
//! ```
//!

extern crate alloc;

/// Wire format
pub mod frame;

/// Inbound/outbound task queue
pub mod queue;

/// Intel HEX record decoder
pub mod hex;

/// Flash erase/program engine
pub mod flash;

/// Request dispatcher
pub mod dispatch;

/// Boot mode selection and application jump
pub mod mode;

/// USB bulk transport class
pub mod usb;

/// Cortex-M platform
#[cfg(feature = "cortex-m")]
pub mod cortexm;

#[doc(inline)]
pub use crate::dispatch::{Action, Dispatcher, FrameSink};
#[doc(inline)]
pub use crate::flash::{FlashController, FlashError, FlashProgrammer};
#[doc(inline)]
pub use crate::frame::{Frame, FrameBuf, FrameError, MessageType, Status, FRAME_SIZE};
#[doc(inline)]
pub use crate::hex::{DecodeError, HexDecoder, HexRecord, RecordType};
#[doc(inline)]
pub use crate::mode::{Mode, ModeController, Platform, VectorTable};
#[doc(inline)]
pub use crate::queue::{Consumer, Producer, QueueError, TaskQueue};
#[doc(inline)]
pub use crate::usb::BulkTransport;

#[cfg(feature = "cortex-m")]
#[doc(inline)]
pub use crate::cortexm::CortexM;
