use core::fmt::Debug;
use log::{debug, trace, warn};

/// Errors reported by [`FlashProgrammer`]. All of them are reported to the
/// host as "operation failed"; nothing is retried and nothing is rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FlashError {
    /// The controller failed to erase a sector.
    #[error("erase of sector {sector} failed")]
    EraseFailed {
        /// First sector that failed.
        sector: u32,
    },
    /// The controller failed to program a byte. Bytes before `address` are
    /// already programmed.
    #[error("program failed at {address:#010x}")]
    WriteFailed {
        /// Address of the first byte that failed.
        address: u32,
    },
    /// The range is not addressable.
    #[error("invalid address range at {address:#010x} (+{length})")]
    InvalidPointer {
        /// Start of the rejected range.
        address: u32,
        /// Length of the rejected range.
        length: usize,
    },
    /// Target byte is not erased, nothing was written.
    /// Only reported when [`FlashController::CHECK_ERASED`] is set.
    #[error("{address:#010x} is not erased")]
    NotErased {
        /// Address of the first programmed byte found in the target range.
        address: u32,
    },
}

/// Vendor flash primitives.
///
/// [`FlashProgrammer`] drives these to erase and program the application
/// region; it takes care of unlock/lock pairing, byte-wise programming and
/// error classification. Implementations only talk to the flash controller
/// and are assumed to be correct.
pub trait FlashController {
    /// Error type of the controller, logged and then classified as a
    /// [`FlashError`].
    type Error: Debug;

    /// First sector of the application region, erased by
    /// [`FlashProgrammer::erase_application`].
    const APPLICATION_FIRST_SECTOR: u32;

    /// Number of sectors in the application region.
    const APPLICATION_SECTOR_COUNT: u32;

    /// Check that the target bytes are erased before programming. Default is `false`.
    ///
    /// When set, a write to a range holding any byte other than
    /// [`ERASED_VALUE`](FlashController::ERASED_VALUE) fails with
    /// [`FlashError::NotErased`] before anything is programmed.
    const CHECK_ERASED: bool = false;

    /// Value of an erased byte. Default is `0xff`.
    const ERASED_VALUE: u8 = 0xff;

    /// Unlock the controller for erase/program operations.
    fn unlock(&mut self);

    /// Lock the controller again.
    fn lock(&mut self);

    /// Erase one sector. Called only while unlocked.
    fn erase_sector(&mut self, sector: u32) -> Result<(), Self::Error>;

    /// Program one byte, the minimum program granularity. Called only while
    /// unlocked.
    fn program_byte(&mut self, address: u32, value: u8) -> Result<(), Self::Error>;

    /// Copy memory at `address` into `buf`. Must not have side effects.
    fn read(&self, address: u32, buf: &mut [u8]);
}

/// Keeps the controller unlocked while alive.
struct Unlocked<'a, C: FlashController> {
    controller: &'a mut C,
}

impl<'a, C: FlashController> Unlocked<'a, C> {
    fn new(controller: &'a mut C) -> Self {
        controller.unlock();
        Self { controller }
    }
}

impl<C: FlashController> Drop for Unlocked<'_, C> {
    fn drop(&mut self) {
        self.controller.lock();
    }
}

/// Erase/program/read engine on top of a [`FlashController`].
pub struct FlashProgrammer<C: FlashController> {
    controller: C,
}

impl<C: FlashController> FlashProgrammer<C> {
    /// Wraps a controller.
    pub fn new(controller: C) -> Self {
        Self { controller }
    }

    /// The wrapped controller.
    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// The wrapped controller, mutable.
    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.controller
    }

    /// Consumes the engine, returning the controller.
    pub fn into_inner(self) -> C {
        self.controller
    }

    /// Erases `sector_count` sectors starting at `first_sector`. Stops at the
    /// first sector that fails.
    pub fn erase(&mut self, first_sector: u32, sector_count: u32) -> Result<(), FlashError> {
        let last = first_sector
            .checked_add(sector_count)
            .ok_or(FlashError::EraseFailed {
                sector: first_sector,
            })?;

        debug!("erase sectors {}..{}", first_sector, last);

        let flash = Unlocked::new(&mut self.controller);
        for sector in first_sector..last {
            if let Err(e) = flash.controller.erase_sector(sector) {
                warn!("erase sector {} failed: {:?}", sector, e);
                return Err(FlashError::EraseFailed { sector });
            }
        }
        Ok(())
    }

    /// Erases the application region declared by the controller.
    pub fn erase_application(&mut self) -> Result<(), FlashError> {
        self.erase(C::APPLICATION_FIRST_SECTOR, C::APPLICATION_SECTOR_COUNT)
    }

    /// Programs `data` at `address`, one byte at a time.
    ///
    /// The target range must be erased; this is only verified when
    /// [`FlashController::CHECK_ERASED`] is set. Programming stops at the
    /// first failing byte and bytes already programmed stay programmed.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        check_range(address, data.len())?;

        if C::CHECK_ERASED {
            self.check_erased(address, data.len())?;
        }

        trace!("program {} bytes at {:#010x}", data.len(), address);

        let flash = Unlocked::new(&mut self.controller);
        for (offset, value) in data.iter().enumerate() {
            let target = address + offset as u32;
            if let Err(e) = flash.controller.program_byte(target, *value) {
                warn!("program {:#010x} failed: {:?}", target, e);
                return Err(FlashError::WriteFailed { address: target });
            }
        }
        Ok(())
    }

    /// Reads `buf.len()` bytes at `address`.
    pub fn read(&self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        check_range(address, buf.len())?;
        self.controller.read(address, buf);
        Ok(())
    }

    fn check_erased(&self, address: u32, length: usize) -> Result<(), FlashError> {
        let mut chunk = [0u8; 16];
        let mut offset = 0;

        while offset < length {
            let n = core::cmp::min(chunk.len(), length - offset);
            let start = address + offset as u32;
            self.controller.read(start, &mut chunk[..n]);

            if let Some(pos) = chunk[..n].iter().position(|b| *b != C::ERASED_VALUE) {
                return Err(FlashError::NotErased {
                    address: start + pos as u32,
                });
            }
            offset += n;
        }
        Ok(())
    }
}

fn check_range(address: u32, length: usize) -> Result<(), FlashError> {
    let invalid = FlashError::InvalidPointer { address, length };
    let length = u32::try_from(length).map_err(|_| invalid)?;
    // the last byte must be addressable
    if length > 0 && address.checked_add(length - 1).is_none() {
        return Err(invalid);
    }
    Ok(())
}
