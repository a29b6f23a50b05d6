//! BAR probing, sizing, and mapping.
//!
//! Bridge-type (header 1) functions carry exactly two BAR slots; sizing uses
//! the architectural all-ones probe with restore, so a scan leaves every BAR
//! register exactly as it found it.

use crate::error::{FabricError, Result};
use crate::platform::{ConfigSpace, MapPhysical, RegisterWindow};
use crate::topology::PciAddress;
use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsFd;
use std::ptr::NonNull;

/// First BAR slot's config-space byte offset.
const BAR_BASE_OFFSET: u16 = 0x10;

/// Bridges have no BAR2/BAR3.
const BRIDGE_BAR_SLOTS: usize = 2;

/// Address mask for memory BARs.
const MEM_MASK: u32 = 0xFFFF_FFF0;

/// Address mask for I/O BARs.
const IO_MASK: u32 = 0xFFFF_FFFC;

/// Bit 0 set means I/O space.
const BAR_IO_SPACE: u32 = 1;

/// Bit 2 set means the BAR is 64-bit and consumes the next slot.
const BAR_TYPE_64: u32 = 0b100;

/// A sized (and possibly mapped) BAR region.
///
/// Owned by the device handle; the mapping is released when the region
/// drops. Only BAR0 is load-bearing for the register bridge — a region that
/// failed to map is kept with `mapping = None` so callers can still see its
/// geometry.
pub struct BarRegion {
    index: usize,
    base: u64,
    size: u64,
    is_memory: bool,
    is_64bit: bool,
    mapping: Option<Box<dyn RegisterWindow>>,
}

impl std::fmt::Debug for BarRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarRegion")
            .field("index", &self.index)
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &format_args!("{:#x}", self.size))
            .field("is_memory", &self.is_memory)
            .field("is_64bit", &self.is_64bit)
            .field("mapped", &self.mapping.is_some())
            .finish()
    }
}

impl BarRegion {
    /// BAR slot index (0 or 1).
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Masked physical base address.
    #[must_use]
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Decoded size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Memory-space BAR (as opposed to I/O-space).
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// 64-bit BAR (consumed the next slot for its upper address half).
    #[must_use]
    pub fn is_64bit(&self) -> bool {
        self.is_64bit
    }

    /// Whether a process-space mapping exists for this region.
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// Borrow the register window, if mapped.
    #[must_use]
    pub fn window(&self) -> Option<&dyn RegisterWindow> {
        self.mapping.as_deref()
    }

    /// Mutably borrow the register window, if mapped.
    pub fn window_mut(&mut self) -> Option<&mut (dyn RegisterWindow + 'static)> {
        self.mapping.as_deref_mut()
    }
}

/// Decode a size mask read back from an all-ones probe.
fn size_from_mask(mask: u32, type_mask: u32) -> u64 {
    u64::from((!(mask & type_mask)).wrapping_add(1))
}

/// Probe, size, and map the BAR slots of a bridge function.
///
/// Per the sizing protocol: read the raw slot (0 / all-ones means
/// unimplemented), write the all-ones probe, read back the decoded mask,
/// restore the original value, then derive the size. Memory BARs get a
/// process mapping through `mapper`; a single failed mapping is recorded,
/// not fatal. Any failed config access aborts the whole probe with
/// `Failed`.
pub fn probe_bars<C, M>(
    config: &C,
    mapper: &M,
    address: PciAddress,
) -> Result<Vec<BarRegion>>
where
    C: ConfigSpace + ?Sized,
    M: MapPhysical + ?Sized,
{
    let mut regions = Vec::new();
    let mut slot = 0usize;

    while slot < BRIDGE_BAR_SLOTS {
        #[allow(clippy::cast_possible_truncation)]
        let off = BAR_BASE_OFFSET + (slot as u16) * 4;
        let raw = config.read_dword(address, off)?;

        if raw == 0 || raw == 0xFFFF_FFFF {
            slot += 1;
            continue;
        }

        let is_io = raw & BAR_IO_SPACE != 0;
        let type_mask = if is_io { IO_MASK } else { MEM_MASK };

        config.write_dword(address, off, 0xFFFF_FFFF)?;
        let mask = config.read_dword(address, off)?;
        config.write_dword(address, off, raw)?;

        let size = size_from_mask(mask, type_mask);
        if size == 0 {
            // Decoder answered with nothing usable; treat as unimplemented.
            tracing::debug!(%address, slot, mask = %format_args!("{mask:#010x}"), "BAR probe decoded no size");
            slot += 1;
            continue;
        }

        let mut base = u64::from(raw & type_mask);
        let is_64bit = !is_io && raw & BAR_TYPE_64 != 0;
        let index = slot;
        if is_64bit {
            slot += 1;
            if slot < BRIDGE_BAR_SLOTS {
                #[allow(clippy::cast_possible_truncation)]
                let upper_off = BAR_BASE_OFFSET + (slot as u16) * 4;
                let upper = config.read_dword(address, upper_off)?;
                base |= u64::from(upper) << 32;
            }
        }

        let mapping = if is_io {
            None
        } else {
            match mapper.map(base, size) {
                Ok(window) => Some(window),
                Err(e) => {
                    tracing::warn!(
                        %address,
                        bar = index,
                        base = %format_args!("{base:#x}"),
                        error = %e,
                        "BAR mapping failed"
                    );
                    None
                }
            }
        };

        tracing::debug!(
            %address,
            bar = index,
            base = %format_args!("{base:#x}"),
            size = %format_args!("{size:#x}"),
            io = is_io,
            mapped = mapping.is_some(),
            "sized BAR"
        );

        regions.push(BarRegion {
            index,
            base,
            size,
            is_memory: !is_io,
            is_64bit,
            mapping,
        });
        slot += 1;
    }

    Ok(regions)
}

/// A mapped BAR backed by `/dev/mem`.
///
/// The raw volatile pointer arithmetic for hardware registers lives here and
/// nowhere else; everything above goes through the bounds-checked
/// [`RegisterWindow`] methods.
pub struct MappedBar {
    ptr: NonNull<u8>,
    size: usize,
    _file: File,
}

impl std::fmt::Debug for MappedBar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedBar")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("size", &self.size)
            .finish()
    }
}

// SAFETY: MappedBar owns its mapping exclusively; mmap'd memory is
// process-wide and moving the owner between threads does not invalidate it.
unsafe impl Send for MappedBar {}

impl MappedBar {
    /// Map `size` bytes of physical address space at `base` through
    /// `/dev/mem`.
    ///
    /// # Errors
    ///
    /// `Io` if `/dev/mem` cannot be opened, `NoMemory` if the mapping
    /// itself fails.
    pub fn map_devmem(base: u64, size: u64) -> Result<Self> {
        // Volatile register semantics need an uncached, synchronous mapping.
        #[allow(clippy::cast_possible_wrap)]
        let sync_flag = OFlags::SYNC.bits() as i32;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(sync_flag)
            .open("/dev/mem")?;

        let len = usize::try_from(size)
            .map_err(|_| FabricError::invalid_parameter(format!("BAR size {size:#x}")))?;

        // SAFETY: mmap of a freshly-opened /dev/mem fd. len is non-zero
        // (probe_bars skips zero-sized regions), base is the page-aligned
        // physical BAR base, and the fd stays open for the mapping's
        // lifetime via _file. Errors surface as Err, never as a bad pointer.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                base,
            )
            .map_err(|_| FabricError::NoMemory { size })?
        };

        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or(FabricError::NoMemory { size })?;

        tracing::info!(
            base = %format_args!("{base:#x}"),
            size = %format_args!("{size:#x}"),
            "mapped BAR via /dev/mem"
        );

        Ok(Self {
            ptr,
            size: len,
            _file: file,
        })
    }
}

impl RegisterWindow for MappedBar {
    fn len(&self) -> usize {
        self.size
    }

    fn read32(&self, offset: usize) -> Result<u32> {
        if offset % 4 != 0 || offset + 4 > self.size {
            return Err(FabricError::failed(format!(
                "register read out of window: offset={offset:#x}, limit={:#x}",
                self.size
            )));
        }
        // SAFETY: bounds and alignment checked above; ptr is valid for
        // self.size bytes from the successful mmap. read_volatile because
        // hardware can change the value between reads.
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };
        tracing::trace!("bar read32 @ {offset:#x} = {value:#010x}");
        Ok(value)
    }

    fn write32(&mut self, offset: usize, value: u32) -> Result<()> {
        if offset % 4 != 0 || offset + 4 > self.size {
            return Err(FabricError::failed(format!(
                "register write out of window: offset={offset:#x}, limit={:#x}",
                self.size
            )));
        }
        tracing::trace!("bar write32 @ {offset:#x} = {value:#010x}");
        // SAFETY: bounds and alignment checked above; write_volatile because
        // register writes trigger hardware side effects and must not be
        // reordered or elided.
        unsafe {
            self.ptr
                .as_ptr()
                .add(offset)
                .cast::<u32>()
                .write_volatile(value);
        }
        Ok(())
    }
}

impl Drop for MappedBar {
    fn drop(&mut self) {
        // SAFETY: ptr/size are exactly what mmap returned in map_devmem and
        // Drop runs at most once.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}
