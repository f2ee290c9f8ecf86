#![allow(dead_code)]
use std::{cell::RefCell, cmp::min, rc::Rc};

use usb_device::bus::{PollResult, UsbBusAllocator};
use usb_device::endpoint::{EndpointAddress, EndpointType};
use usb_device::{Result, UsbDirection, UsbError};

const EP_BUF_SIZE: usize = 1024;

struct EP {
    alloc: bool,
    stall: bool,
    read_len: usize,
    read: [u8; EP_BUF_SIZE],
    write_len: usize,
    write: [u8; EP_BUF_SIZE],
    writes: usize,
    blocked_writes: usize,
    max_size: usize,
}

impl EP {
    fn new() -> Self {
        EP {
            alloc: false,
            stall: false,
            read_len: 0,
            read: [0; EP_BUF_SIZE],
            write_len: 0,
            write: [0; EP_BUF_SIZE],
            writes: 0,
            blocked_writes: 0,
            max_size: 0,
        }
    }

    fn set_read(&mut self, data: &[u8]) {
        self.read[..data.len()].copy_from_slice(data);
        self.read_len = data.len();
    }

    fn take_write(&mut self) -> Vec<u8> {
        let res = self.write[..self.write_len].to_vec();
        self.write_len = 0;
        res
    }
}

/// Endpoint buffers shared between the bus and the test body.
pub struct TestBusIO {
    ep_i: [RefCell<EP>; 4],
    ep_o: [RefCell<EP>; 4],
}

impl TestBusIO {
    fn new() -> Self {
        Self {
            ep_i: core::array::from_fn(|_| RefCell::new(EP::new())),
            ep_o: core::array::from_fn(|_| RefCell::new(EP::new())),
        }
    }

    fn epidx(&self, ep_addr: EndpointAddress) -> &RefCell<EP> {
        match ep_addr.direction() {
            UsbDirection::In => &self.ep_i[ep_addr.index()],
            UsbDirection::Out => &self.ep_o[ep_addr.index()],
        }
    }

    /// Makes `data` available for the next read on an OUT endpoint.
    pub fn set_read(&self, ep_addr: EndpointAddress, data: &[u8]) {
        self.epidx(ep_addr).borrow_mut().set_read(data);
    }

    /// Takes everything written to an IN endpoint since the last call.
    pub fn take_write(&self, ep_addr: EndpointAddress) -> Vec<u8> {
        self.epidx(ep_addr).borrow_mut().take_write()
    }

    /// Number of write calls on an endpoint.
    pub fn writes(&self, ep_addr: EndpointAddress) -> usize {
        self.epidx(ep_addr).borrow().writes
    }

    /// Makes the next `count` writes on an endpoint fail with `WouldBlock`.
    pub fn block_writes(&self, ep_addr: EndpointAddress, count: usize) {
        self.epidx(ep_addr).borrow_mut().blocked_writes = count;
    }

    pub fn is_allocated(&self, ep_addr: EndpointAddress) -> bool {
        self.epidx(ep_addr).borrow().alloc
    }

    pub fn max_size(&self, ep_addr: EndpointAddress) -> usize {
        self.epidx(ep_addr).borrow().max_size
    }
}

pub struct TestBus {
    rrio: Rc<TestBusIO>,
}

unsafe impl Sync for TestBus {}

impl TestBus {
    fn io(&self) -> &TestBusIO {
        self.rrio.as_ref()
    }
}

impl usb_device::bus::UsbBus for TestBus {
    fn alloc_ep(
        &mut self,
        _ep_dir: UsbDirection,
        ep_addr: Option<EndpointAddress>,
        _ep_type: EndpointType,
        max_packet_size: u16,
        _interval: u8,
    ) -> Result<EndpointAddress> {
        if let Some(ea) = ep_addr {
            let mut sep = self.io().epidx(ea).borrow_mut();
            assert!(!sep.alloc);
            sep.alloc = true;
            sep.stall = false;
            sep.max_size = max_packet_size as usize;

            Ok(ea)
        } else {
            panic!("ep_addr is required, endpoint allocation is not implemented");
        }
    }
    fn enable(&mut self) {}
    fn force_reset(&self) -> Result<()> {
        Ok(())
    }
    fn poll(&self) -> PollResult {
        PollResult::None
    }
    fn read(&self, ep_addr: EndpointAddress, buf: &mut [u8]) -> Result<usize> {
        let mut ep = self.io().epidx(ep_addr).borrow_mut();
        let len = min(buf.len(), min(ep.read_len, ep.max_size));

        if len == 0 {
            return Err(UsbError::WouldBlock);
        }

        buf[..len].copy_from_slice(&ep.read[..len]);

        ep.read_len -= len;
        ep.read.copy_within(len.., 0);

        Ok(len)
    }
    fn reset(&self) {}
    fn resume(&self) {}
    fn suspend(&self) {}
    fn set_device_address(&self, _addr: u8) {}
    fn is_stalled(&self, ep_addr: EndpointAddress) -> bool {
        self.io().epidx(ep_addr).borrow().stall
    }
    fn set_stalled(&self, ep_addr: EndpointAddress, stalled: bool) {
        self.io().epidx(ep_addr).borrow_mut().stall = stalled;
    }
    fn write(&self, ep_addr: EndpointAddress, buf: &[u8]) -> Result<usize> {
        let mut ep = self.io().epidx(ep_addr).borrow_mut();

        if ep.blocked_writes > 0 {
            ep.blocked_writes -= 1;
            return Err(UsbError::WouldBlock);
        }

        if buf.len() > ep.max_size {
            return Err(UsbError::BufferOverflow);
        }

        let offset = ep.write_len;
        ep.write[offset..offset + buf.len()].copy_from_slice(buf);
        ep.write_len += buf.len();
        ep.writes += 1;
        Ok(buf.len())
    }
}

/// Creates a bus allocator backed by a fresh set of endpoint buffers.
pub fn test_bus() -> (UsbBusAllocator<TestBus>, Rc<TestBusIO>) {
    let io = Rc::new(TestBusIO::new());
    let bus = TestBus { rrio: io.clone() };
    (UsbBusAllocator::new(bus), io)
}
