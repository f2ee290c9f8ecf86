use log::{trace, warn};
use usb_device::class_prelude::*;
use usb_device::UsbError;

use crate::frame::{FrameBuf, FRAME_SIZE};
use crate::queue::{Consumer, Producer};

const USB_CLASS_VENDOR_SPECIFIC: u8 = 0xFF;
const USB_SUBCLASS_NONE: u8 = 0x00;
const USB_PROTOCOL_NONE: u8 = 0x00;
const DIRECTION_IN: u8 = 0x80;

/// Max packet size of both bulk endpoints. One frame fits into one packet.
pub const BULK_PACKET_SIZE: u16 = 64;

/// Endpoint number used for both bulk endpoints.
pub const BULK_ENDPOINT: u8 = 1;

/// Bulk pipe transport for `usb-device`.
///
/// Exposes one vendor-specific interface with a bulk OUT and a bulk IN
/// endpoint. Every frame travels as exactly one max-size packet. Frames
/// received from the host are pushed into the inbound queue, frames from the
/// outbound queue are written to the host one at a time. Both queue ends belong
/// to the USB context, the other ends are owned by the processing loop.
///
/// An outbound frame stays at the head of its queue until the host has read
/// it, so an empty outbound queue means every response was delivered.
///
/// `usb_dev.poll(&mut [&mut transport])` drives reception and IN completions.
/// [`service`](BulkTransport::service) must also be called periodically from
/// the same context (for example a SOF or timer interrupt), so that responses
/// queued while the bus is idle get written.
pub struct BulkTransport<'a, B: UsbBus> {
    interface: InterfaceNumber,
    read_ep: EndpointOut<'a, B>,
    write_ep: EndpointIn<'a, B>,
    inbound: Producer<'a, FrameBuf>,
    outbound: Consumer<'a, FrameBuf>,
    in_flight: bool,
    dropped: u32,
    discarded: u32,
}

impl<'a, B: UsbBus> BulkTransport<'a, B> {
    /// Allocates the interface and the bulk endpoint pair.
    pub fn new(
        alloc: &'a UsbBusAllocator<B>,
        inbound: Producer<'a, FrameBuf>,
        outbound: Consumer<'a, FrameBuf>,
    ) -> usb_device::Result<Self> {
        let read_ep: EndpointOut<'a, B> = alloc.alloc(
            Some(EndpointAddress::from(BULK_ENDPOINT)),
            EndpointType::Bulk,
            BULK_PACKET_SIZE,
            0,
        )?;
        let write_ep: EndpointIn<'a, B> = alloc.alloc(
            Some(EndpointAddress::from(BULK_ENDPOINT | DIRECTION_IN)),
            EndpointType::Bulk,
            BULK_PACKET_SIZE,
            0,
        )?;

        Ok(Self {
            interface: alloc.interface(),
            read_ep,
            write_ep,
            inbound,
            outbound,
            in_flight: false,
            dropped: 0,
            discarded: 0,
        })
    }

    /// Number of complete frames dropped because the inbound queue was full.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Number of short packets discarded because they can not hold a frame.
    pub fn discarded(&self) -> u32 {
        self.discarded
    }

    /// Whether a frame was written and the host has not read it yet.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Writes the head outbound frame if the IN endpoint is idle.
    ///
    /// The frame is not removed from the queue here. A failed write leaves it
    /// in place for the next call.
    pub fn service(&mut self) {
        if self.in_flight {
            return;
        }

        let Some(frame) = self.outbound.peek() else {
            return;
        };

        match self.write_ep.write(&frame) {
            Ok(n) if n == FRAME_SIZE => {
                trace!("frame sent");
                self.in_flight = true;
            }
            Ok(n) => warn!("short write: {} of {} bytes", n, FRAME_SIZE),
            Err(UsbError::WouldBlock) => {}
            Err(e) => warn!("write failed: {:?}", e),
        }
    }

    fn receive(&mut self) {
        let mut packet = [0u8; BULK_PACKET_SIZE as usize];

        let n = match self.read_ep.read(&mut packet) {
            Ok(n) => n,
            Err(UsbError::WouldBlock) => return,
            Err(e) => {
                warn!("read failed: {:?}", e);
                return;
            }
        };

        // a short packet ends the transfer, so it never holds a whole frame
        if n != FRAME_SIZE {
            self.discarded = self.discarded.wrapping_add(1);
            warn!("short packet discarded: {} bytes", n);
            return;
        }

        if self.inbound.enqueue(packet).is_err() {
            self.dropped = self.dropped.wrapping_add(1);
            warn!("inbound queue full, frame dropped");
        }
    }
}

impl<B: UsbBus> UsbClass<B> for BulkTransport<'_, B> {
    fn get_configuration_descriptors(
        &self,
        writer: &mut DescriptorWriter,
    ) -> usb_device::Result<()> {
        writer.interface(
            self.interface,
            USB_CLASS_VENDOR_SPECIFIC,
            USB_SUBCLASS_NONE,
            USB_PROTOCOL_NONE,
        )?;
        writer.endpoint(&self.read_ep)?;
        writer.endpoint(&self.write_ep)?;
        Ok(())
    }

    fn reset(&mut self) {
        // the head frame is written again after the reset
        self.in_flight = false;
    }

    fn endpoint_out(&mut self, addr: EndpointAddress) {
        if addr == self.read_ep.address() {
            self.receive();
        }
    }

    fn endpoint_in_complete(&mut self, addr: EndpointAddress) {
        if addr == self.write_ep.address() && self.in_flight {
            self.in_flight = false;
            // the host has the frame, release its slot
            self.outbound.dequeue();
            self.service();
        }
    }

    fn poll(&mut self) {
        self.service();
    }
}
