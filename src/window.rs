/*
 * Copyright (c) 2022 xvanc and contributors
 *
 * Redistribution and use in source and binary forms, with or without modification,
 * are permitted provided that the following conditions are met:
 *
 * 1. Redistributions of source code must retain the above copyright notice,
 *    this list of conditions and the following disclaimer.
 *
 * 2. Redistributions in binary form must reproduce the above copyright notice,
 *    this list of conditions and the following disclaimer in the documentation
 *    and/or other materials provided with the distribution.
 *
 * 3. Neither the name of the copyright holder nor the names of its contributors
 *    may be used to endorse or promote products derived from this software without
 *    specific prior written permission.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY
 * EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES
 * OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE DISCLAIMED.
 * IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT,
 * INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
 * PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS
 * INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT
 * LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
 * OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
 *
 * SPDX-License-Identifier: BSD-3-Clause
 */

//! ECAM configuration windows
//!
//! Each bus number decodes 1 MiB of the window: 32 devices, 8 functions per device and
//! 4 KiB of configuration space per function.

use crate::Error;
use alloc::sync::Arc;
use core::{fmt, ops::RangeInclusive, ptr::NonNull};

pub const BUS_SHIFT: u32 = 20;
pub const DEVFN_SHIFT: u32 = 12;

/// Bytes of window decoded per bus number
pub const WINDOW_UNIT_SIZE: u64 = 1 << BUS_SHIFT;

/// Size of the configuration space of a single function
pub const CONFIG_SPACE_SIZE: u16 = 4096;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MapError {
    /// No virtual address space is left for the mapping.
    NoSpace,
    /// The physical range is not addressable.
    InvalidRange,
    /// The range conflicts with memory already claimed by someone else.
    Busy,
}

/// Memory mapping primitive used to bring ECAM regions into the address space
///
/// # Safety
///
/// A pointer returned by [`Mapper::map`] must be valid for volatile reads and writes
/// of `size` bytes until it is passed to [`Mapper::unmap`].
pub unsafe trait Mapper: Send + Sync {
    /// Map `size` bytes of device memory starting at physical address `phys`
    fn map(&self, phys: u64, size: usize) -> Result<NonNull<u8>, MapError>;

    /// Release a mapping created by [`Mapper::map`]
    ///
    /// # Safety
    ///
    /// `virt` and `size` must describe a live mapping returned by this mapper, and the
    /// mapping must not be accessed afterwards.
    unsafe fn unmap(&self, virt: NonNull<u8>, size: usize);
}

/// An owned device memory mapping
///
/// The mapping is released when the region is dropped.
pub struct MappedRegion {
    mapper: Arc<dyn Mapper>,
    phys: u64,
    virt: NonNull<u8>,
    size: usize,
}

// SAFETY: The region only hands out raw pointers into device memory, all accesses
// through it are volatile.
unsafe impl Send for MappedRegion {}
// SAFETY: See above.
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map `size` bytes at physical address `phys`
    ///
    /// # Errors
    ///
    /// Returns the mapper's error if the mapping cannot be established.
    pub fn new(mapper: &Arc<dyn Mapper>, phys: u64, size: usize) -> Result<MappedRegion, MapError> {
        let virt = mapper.map(phys, size)?;

        Ok(Self {
            mapper: Arc::clone(mapper),
            phys,
            virt,
            size,
        })
    }

    pub fn phys(&self) -> u64 {
        self.phys
    }

    pub fn virt(&self) -> NonNull<u8> {
        self.virt
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: The mapping was created by this mapper and nothing can reach it once
        // the region is gone.
        unsafe { self.mapper.unmap(self.virt, self.size) };
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegion")
            .field("phys", &format_args!("{:#x}", self.phys))
            .field("virt", &self.virt)
            .field("size", &format_args!("{:#x}", self.size))
            .finish()
    }
}

/// Width of a configuration space access
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessWidth {
    Byte = 1,
    Word = 2,
    Dword = 4,
}

impl AccessWidth {
    pub const fn bytes(self) -> u16 {
        self as u16
    }
}

impl TryFrom<usize> for AccessWidth {
    type Error = Error;

    fn try_from(len: usize) -> Result<Self, Error> {
        match len {
            1 => Ok(Self::Byte),
            2 => Ok(Self::Word),
            4 => Ok(Self::Dword),
            _ => Err(Error::BadRegister),
        }
    }
}

/// Physical byte range decoded by buses `bus_start..=bus_end` of an ECAM region at `base`
///
/// Returns `None` if the range does not fit in the physical address space.
pub fn window_extent(base: u64, bus_start: u8, bus_end: u8) -> Option<RangeInclusive<u64>> {
    let start = base.checked_add(u64::from(bus_start) << BUS_SHIFT)?;
    let end = base
        .checked_add((u64::from(bus_end) + 1) << BUS_SHIFT)?
        .checked_sub(1)?;
    Some(start..=end)
}

/// A mapped ECAM window for a contiguous range of buses in one segment
pub struct ConfigWindow {
    segment: u16,
    bus_range: RangeInclusive<u8>,
    base_address: u64,
    region: MappedRegion,
}

impl ConfigWindow {
    /// Create a window over `region`
    ///
    /// `region` must cover exactly the extent of `bus_start..=bus_end` relative to
    /// `base_address`.
    pub(crate) fn new(
        segment: u16,
        bus_start: u8,
        bus_end: u8,
        base_address: u64,
        region: MappedRegion,
    ) -> ConfigWindow {
        debug_assert_eq!(
            region.size() as u64,
            (u64::from(bus_end - bus_start) + 1) * WINDOW_UNIT_SIZE
        );

        Self {
            segment,
            bus_range: bus_start..=bus_end,
            base_address,
            region,
        }
    }

    pub fn segment(&self) -> u16 {
        self.segment
    }

    pub fn bus_start(&self) -> u8 {
        *self.bus_range.start()
    }

    pub fn bus_end(&self) -> u8 {
        *self.bus_range.end()
    }

    pub fn bus_range(&self) -> RangeInclusive<u8> {
        self.bus_range.clone()
    }

    /// Base address of the ECAM region, i.e. the address of bus 0
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    /// Physical byte range covered by the mapping
    pub fn extent(&self) -> RangeInclusive<u64> {
        let start = self.region.phys();
        start..=start + (self.region.size() as u64 - 1)
    }

    pub fn region(&self) -> &MappedRegion {
        &self.region
    }

    pub fn contains_bus(&self, bus: u8) -> bool {
        self.bus_range.contains(&bus)
    }

    pub fn overlaps(&self, bus_start: u8, bus_end: u8) -> bool {
        bus_start <= self.bus_end() && self.bus_start() <= bus_end
    }

    /// Compute the address of register `reg` of function `devfn` on `bus`
    ///
    /// Returns `None` if the bus is not decoded by this window.
    pub fn map_bus(&self, bus: u8, devfn: u8, reg: u16) -> Option<NonNull<u8>> {
        if !self.contains_bus(bus) || reg >= CONFIG_SPACE_SIZE {
            return None;
        }

        let offset = (((bus - self.bus_start()) as usize) << BUS_SHIFT)
            | ((devfn as usize) << DEVFN_SHIFT)
            | reg as usize;

        // SAFETY: The offset of any decoded bus, device, function and register lies
        // within the mapped region.
        Some(unsafe { NonNull::new_unchecked(self.region.virt().as_ptr().add(offset)) })
    }

    fn access(&self, bus: u8, devfn: u8, reg: u16, width: AccessWidth) -> Result<NonNull<u8>, Error> {
        let end = u32::from(reg) + u32::from(width.bytes());
        if reg % width.bytes() != 0 || end > u32::from(CONFIG_SPACE_SIZE) {
            return Err(Error::BadRegister);
        }
        self.map_bus(bus, devfn, reg).ok_or(Error::DeviceNotFound)
    }

    /// Read a configuration space register
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRegister`] for a misaligned or out of bounds register, and
    /// [`Error::DeviceNotFound`] if `bus` is not decoded by this window.
    pub fn read(&self, bus: u8, devfn: u8, reg: u16, width: AccessWidth) -> Result<u32, Error> {
        let ptr = self.access(bus, devfn, reg, width)?;

        // SAFETY: `access` checked the register is naturally aligned and inside the
        // function's configuration space.
        let value = unsafe {
            match width {
                AccessWidth::Byte => ptr.as_ptr().read_volatile() as u32,
                AccessWidth::Word => u16::from_le(ptr.cast::<u16>().as_ptr().read_volatile()) as u32,
                AccessWidth::Dword => u32::from_le(ptr.cast::<u32>().as_ptr().read_volatile()),
            }
        };

        Ok(value)
    }

    /// Write a configuration space register
    ///
    /// Only the low `width` bytes of `value` are written.
    ///
    /// # Errors
    ///
    /// See [`ConfigWindow::read`].
    pub fn write(
        &self,
        bus: u8,
        devfn: u8,
        reg: u16,
        width: AccessWidth,
        value: u32,
    ) -> Result<(), Error> {
        let ptr = self.access(bus, devfn, reg, width)?;

        // SAFETY: See `read`.
        unsafe {
            match width {
                AccessWidth::Byte => ptr.as_ptr().write_volatile(value as u8),
                AccessWidth::Word => ptr.cast::<u16>().as_ptr().write_volatile((value as u16).to_le()),
                AccessWidth::Dword => ptr.cast::<u32>().as_ptr().write_volatile(value.to_le()),
            }
        }

        Ok(())
    }
}

impl fmt::Debug for ConfigWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:04x}:{:02x}-{:02x}] @ {:#x}",
            self.segment,
            self.bus_start(),
            self.bus_end(),
            self.base_address
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestMapper;

    fn window(mapper: &Arc<TestMapper>, bus_start: u8, bus_end: u8) -> ConfigWindow {
        let base = 0x4000_0000;
        let extent = window_extent(base, bus_start, bus_end).unwrap();
        let size = (extent.end() - extent.start() + 1) as usize;
        let mapper: Arc<dyn Mapper> = mapper.clone();
        let region = MappedRegion::new(&mapper, *extent.start(), size).unwrap();
        ConfigWindow::new(0, bus_start, bus_end, base, region)
    }

    #[test]
    fn extent_of_first_32_buses() {
        assert_eq!(
            window_extent(0x4000_0000, 0, 0x1f),
            Some(0x4000_0000..=0x4000_0000 + 0x20 * 0x10_0000 - 1)
        );
        assert_eq!(
            window_extent(0x4000_0000, 0x10, 0x10),
            Some(0x4100_0000..=0x410f_ffff)
        );
        assert_eq!(window_extent(u64::MAX - 0xfffff, 0, 1), None);
    }

    #[test]
    fn region_is_unmapped_on_drop() {
        let mapper = TestMapper::new();
        let window = window(&mapper, 2, 2);
        assert_eq!(mapper.live(), 1);
        assert_eq!(window.extent(), 0x4020_0000..=0x402f_ffff);

        drop(window);
        assert_eq!(mapper.live(), 0);
        assert_eq!(mapper.unmapped(), 1);
    }

    #[test]
    fn map_bus_offsets() {
        let mapper = TestMapper::new();
        let window = window(&mapper, 4, 4);
        let base = window.region().virt().as_ptr() as usize;

        let addr = window.map_bus(4, (3 << 3) | 1, 0x10).unwrap().as_ptr() as usize;
        assert_eq!(addr - base, (3 << 15) | (1 << 12) | 0x10);

        assert!(window.map_bus(3, 0, 0).is_none());
        assert!(window.map_bus(5, 0, 0).is_none());
        assert!(window.map_bus(4, 0, CONFIG_SPACE_SIZE).is_none());
    }

    #[test]
    fn read_write_widths() {
        let mapper = TestMapper::new();
        let window = window(&mapper, 1, 1);

        window.write(1, 8, 0x40, AccessWidth::Dword, 0x1234_5678).unwrap();
        assert_eq!(window.read(1, 8, 0x40, AccessWidth::Dword), Ok(0x1234_5678));
        assert_eq!(window.read(1, 8, 0x40, AccessWidth::Word), Ok(0x5678));
        assert_eq!(window.read(1, 8, 0x42, AccessWidth::Word), Ok(0x1234));
        assert_eq!(window.read(1, 8, 0x43, AccessWidth::Byte), Ok(0x12));

        window.write(1, 8, 0x41, AccessWidth::Byte, 0xffff_ffab).unwrap();
        assert_eq!(window.read(1, 8, 0x40, AccessWidth::Dword), Ok(0x1234_ab78));

        // A different function sees its own configuration space.
        assert_eq!(window.read(1, 9, 0x40, AccessWidth::Dword), Ok(0));
    }

    #[test]
    fn rejects_bad_registers() {
        let mapper = TestMapper::new();
        let window = window(&mapper, 0, 0);

        assert_eq!(window.read(0, 0, 0x41, AccessWidth::Word), Err(Error::BadRegister));
        assert_eq!(window.read(0, 0, 0x42, AccessWidth::Dword), Err(Error::BadRegister));
        assert_eq!(window.read(0, 0, 0xffc, AccessWidth::Dword), Ok(0));
        assert_eq!(window.read(0, 0, 0x1000, AccessWidth::Byte), Err(Error::BadRegister));
        assert_eq!(window.read(1, 0, 0, AccessWidth::Dword), Err(Error::DeviceNotFound));
        assert_eq!(AccessWidth::try_from(3), Err(Error::BadRegister));
    }
}
