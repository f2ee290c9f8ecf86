use embedded_hal::digital::{InputPin, PinState};
use log::{debug, warn};

use crate::flash::{FlashController, FlashProgrammer};

/// Operating mode, chosen once at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Stay in the update engine.
    Bootloader,
    /// Run the application image.
    Application,
}

/// First two words of the application's vector table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VectorTable {
    /// Initial main stack pointer.
    pub initial_sp: u32,
    /// Reset handler address.
    pub reset_vector: u32,
}

impl VectorTable {
    /// Reads the table head at `address`.
    pub fn read_from<C: FlashController>(flash: &FlashProgrammer<C>, address: u32) -> Option<Self> {
        let mut words = [0u8; 8];
        flash.read(address, &mut words).ok()?;
        Some(Self {
            initial_sp: u32::from_le_bytes([words[0], words[1], words[2], words[3]]),
            reset_vector: u32::from_le_bytes([words[4], words[5], words[6], words[7]]),
        })
    }
}

/// Register-level operations needed to leave the bootloader.
///
/// The order of the calls is fixed by [`ModeController::enter_application`]:
/// fault handlers, peripherals, vector table, then
/// [`start_application`](Platform::start_application).
pub trait Platform {
    /// Start address of the application image, also its vector table.
    const APPLICATION_ADDRESS: u32;

    /// Level of the boot pin that keeps the device in the bootloader.
    /// Default is [`PinState::Low`].
    const BOOTLOADER_LEVEL: PinState = PinState::Low;

    /// Disable the usage, bus and memory fault handlers.
    fn disable_fault_handlers(&mut self);

    /// Reset clocks and peripherals to their power-on state, stop the system
    /// tick and clear pending interrupts.
    fn deinit_peripherals(&mut self);

    /// Point the vector table base register at `address`.
    fn relocate_vector_table(&mut self, address: u32);

    /// Load the stack pointer and branch to the reset vector.
    ///
    /// # Safety
    ///
    /// Nothing of the bootloader is valid after this call. `reset_vector`
    /// must be the entry of a programmed image.
    unsafe fn start_application(&mut self, initial_sp: u32, reset_vector: u32) -> !;

    /// Whether `table` looks like a programmed image. Used at boot only.
    ///
    /// Default rejects erased flash and an unaligned stack pointer.
    fn is_bootable(&self, table: &VectorTable) -> bool {
        table.initial_sp != 0xffff_ffff
            && table.reset_vector != 0xffff_ffff
            && table.initial_sp & 0x3 == 0
    }
}

/// Boot mode selection and the jump to the application.
pub struct ModeController<P: Platform> {
    platform: P,
}

impl<P: Platform> ModeController<P> {
    /// Wraps a platform.
    pub fn new(platform: P) -> Self {
        Self { platform }
    }

    /// The wrapped platform.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Reads the boot pin once. A pin that can not be read keeps the device
    /// in the bootloader.
    pub fn select<I: InputPin>(&self, pin: &mut I) -> Mode {
        let level = match P::BOOTLOADER_LEVEL {
            PinState::Low => pin.is_low(),
            PinState::High => pin.is_high(),
        };

        match level {
            Ok(true) => Mode::Bootloader,
            Ok(false) => Mode::Application,
            Err(_) => {
                warn!("boot pin read failed");
                Mode::Bootloader
            }
        }
    }

    /// Startup decision. Does not return when the pin selects the application
    /// and the image looks programmed; otherwise hands the controller back for
    /// the update engine.
    pub fn boot<I: InputPin, C: FlashController>(
        mut self,
        pin: &mut I,
        flash: &FlashProgrammer<C>,
    ) -> Self {
        if self.select(pin) == Mode::Application {
            match VectorTable::read_from(flash, P::APPLICATION_ADDRESS) {
                Some(table) if self.platform.is_bootable(&table) => self.enter_application(flash),
                _ => warn!("no application at {:#010x}", P::APPLICATION_ADDRESS),
            }
        }
        debug!("bootloader mode");
        self
    }

    /// Transfers control to the application image. Never returns; all
    /// bootloader state is unreachable afterwards.
    pub fn enter_application<C: FlashController>(&mut self, flash: &FlashProgrammer<C>) -> ! {
        debug!("entering application at {:#010x}", P::APPLICATION_ADDRESS);

        // read before teardown, the flash read path may need the clocks
        let table = VectorTable::read_from(flash, P::APPLICATION_ADDRESS).unwrap_or(VectorTable {
            initial_sp: 0xffff_ffff,
            reset_vector: 0xffff_ffff,
        });

        self.platform.disable_fault_handlers();
        self.platform.deinit_peripherals();
        self.platform.relocate_vector_table(P::APPLICATION_ADDRESS);

        unsafe {
            self.platform
                .start_application(table.initial_sp, table.reset_vector)
        }
    }
}
