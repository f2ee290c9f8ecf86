use log::{debug, warn};

use crate::flash::{FlashController, FlashProgrammer};
use crate::frame::{message_type_of, Frame, FrameBuf, MessageType, Status};
use crate::hex::{DecodeError, HexDecoder};
use crate::mode::{ModeController, Platform};
use crate::queue::{Consumer, Producer, QueueError};

impl From<DecodeError> for Status {
    fn from(_: DecodeError) -> Self {
        Status::OperationFailed
    }
}

/// Outbound side of the transport.
pub trait FrameSink {
    /// Error returned when a frame can not be handed over.
    type Error;

    /// Hands one complete frame to the transport.
    fn send(&mut self, frame: &FrameBuf) -> Result<(), Self::Error>;

    /// Waits until every frame handed over so far has left. Called before the
    /// jump to the application. Default does nothing.
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Outbound queue drained by the transport's interrupt context.
///
/// [`BulkTransport`](crate::usb::BulkTransport) releases a slot only after the
/// host has read the frame in it, so an empty queue means delivered.
impl<'a> FrameSink for Producer<'a, FrameBuf> {
    type Error = QueueError;

    fn send(&mut self, frame: &FrameBuf) -> Result<(), Self::Error> {
        self.enqueue(*frame)
    }

    /// Spins until the transport has released every queued frame.
    fn flush(&mut self) -> Result<(), Self::Error> {
        while !self.is_empty() {
            core::hint::spin_loop();
        }
        Ok(())
    }
}

/// What has to happen after the response is sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Nothing, wait for the next request.
    None,
    /// Transfer control to the application.
    EnterApplication,
}

/// Processes inbound frames and owns all programming session state.
pub struct Dispatcher<C: FlashController, P: Platform> {
    flash: FlashProgrammer<C>,
    decoder: HexDecoder,
    mode: ModeController<P>,
    telemetry: u16,
}

impl<C: FlashController, P: Platform> Dispatcher<C, P> {
    /// Creates a dispatcher with a fresh programming session.
    pub fn new(flash: FlashProgrammer<C>, mode: ModeController<P>) -> Self {
        Self {
            flash,
            decoder: HexDecoder::new(),
            mode,
            telemetry: 0,
        }
    }

    /// Flash engine.
    pub fn flash(&self) -> &FlashProgrammer<C> {
        &self.flash
    }

    /// HEX decoder state.
    pub fn decoder(&self) -> &HexDecoder {
        &self.decoder
    }

    /// Current telemetry counter value, returned by the next telemetry request.
    pub fn telemetry(&self) -> u16 {
        self.telemetry
    }

    /// Validates `raw`, executes the request and builds the response.
    ///
    /// The response always echoes the request's message type, also when the
    /// request itself is malformed.
    pub fn handle(&mut self, raw: &FrameBuf) -> (Frame, Action) {
        let msg_type = message_type_of(raw);

        let request = match Frame::decode(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!("rejected frame {:#06x}: {}", msg_type, e);
                return (Frame::reply(msg_type, e.into(), []), Action::None);
            }
        };

        match MessageType::try_from(msg_type) {
            Ok(MessageType::TelemetryRequest) => {
                let value = self.telemetry;
                self.telemetry = self.telemetry.wrapping_add(1);
                (
                    Frame::reply(msg_type, Status::Success, value.to_le_bytes()),
                    Action::None,
                )
            }
            Ok(MessageType::EnterApplication) => (
                Frame::reply(msg_type, Status::Success, []),
                Action::EnterApplication,
            ),
            Ok(MessageType::ProgramData) => {
                let status = match self
                    .decoder
                    .decode_and_apply(request.payload(), &mut self.flash)
                {
                    Ok(_) => Status::Success,
                    Err(e) => {
                        warn!("record rejected: {}", e);
                        e.into()
                    }
                };
                (Frame::reply(msg_type, status, []), Action::None)
            }
            Ok(MessageType::EraseRequest) => {
                self.decoder.reset();
                let status = match self.flash.erase_application() {
                    Ok(()) => Status::Success,
                    Err(e) => {
                        warn!("{}", e);
                        Status::OperationFailed
                    }
                };
                (Frame::reply(msg_type, status, []), Action::None)
            }
            Err(other) => {
                debug!("unknown message type {:#06x}", other);
                (Frame::reply(msg_type, Status::InvalidRequest, []), Action::None)
            }
        }
    }

    /// Handles one frame and sends the response through `sink`.
    ///
    /// For a mode transfer request the response is sent and flushed, then
    /// control passes to the application and this function does not return.
    /// If the response can not be sent, the error is returned and no transfer
    /// takes place.
    pub fn process<S: FrameSink>(&mut self, raw: &FrameBuf, sink: &mut S) -> Result<(), S::Error> {
        let (response, action) = self.handle(raw);
        sink.send(&response.encode())?;

        if action == Action::EnterApplication {
            sink.flush()?;
            self.mode.enter_application(&self.flash);
        }
        Ok(())
    }

    /// Takes one frame from the inbound queue and processes it. Returns
    /// `Ok(false)` when the queue was empty.
    pub fn poll<S: FrameSink>(
        &mut self,
        inbound: &mut Consumer<'_, FrameBuf>,
        sink: &mut S,
    ) -> Result<bool, S::Error> {
        match inbound.dequeue() {
            Some(raw) => {
                self.process(&raw, sink)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
