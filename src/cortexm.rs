use cortex_m::peripheral::{NVIC, SCB, SYST};

use crate::mode::Platform;

const SHCSR_MEMFAULTENA: u32 = 1 << 16;
const SHCSR_BUSFAULTENA: u32 = 1 << 17;
const SHCSR_USGFAULTENA: u32 = 1 << 18;

/// [`Platform`] for Cortex-M parts.
///
/// `deinit` is called during teardown to put vendor clocks and peripherals
/// back into their reset state (the equivalent of a HAL's RCC/peripheral
/// de-init). System tick and NVIC state are reset here.
pub struct CortexM<F: FnMut(), const APP: u32> {
    deinit: F,
}

impl<F: FnMut(), const APP: u32> CortexM<F, APP> {
    /// Platform jumping to an image at `APP`.
    pub fn new(deinit: F) -> Self {
        Self { deinit }
    }
}

impl<F: FnMut(), const APP: u32> Platform for CortexM<F, APP> {
    const APPLICATION_ADDRESS: u32 = APP;

    fn disable_fault_handlers(&mut self) {
        unsafe {
            (*SCB::PTR).shcsr.modify(|r| {
                r & !(SHCSR_USGFAULTENA | SHCSR_BUSFAULTENA | SHCSR_MEMFAULTENA)
            });
        }
    }

    fn deinit_peripherals(&mut self) {
        cortex_m::interrupt::disable();

        (self.deinit)();

        unsafe {
            let syst = &*SYST::PTR;
            syst.csr.write(0);
            syst.rvr.write(0);
            syst.cvr.write(0);

            let nvic = &*NVIC::PTR;
            for icer in nvic.icer.iter() {
                icer.write(0xffff_ffff);
            }
            for icpr in nvic.icpr.iter() {
                icpr.write(0xffff_ffff);
            }
        }
    }

    fn relocate_vector_table(&mut self, address: u32) {
        unsafe {
            (*SCB::PTR).vtor.write(address);
        }
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    unsafe fn start_application(&mut self, initial_sp: u32, reset_vector: u32) -> ! {
        // nothing is enabled in the NVIC any more, the image expects PRIMASK clear
        cortex_m::interrupt::enable();
        cortex_m::asm::bootstrap(initial_sp as *const u32, reset_vector as *const u32)
    }
}
