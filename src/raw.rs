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

//! Raw configuration space access
//!
//! Accesses are routed through the bus objects the enumeration code already created,
//! never through the window registry. Windows are not created on demand, so an access
//! to a bus nobody has scanned yet fails with [`Error::DeviceNotFound`]; early boot code
//! probing for devices should expect that.

use crate::{bus::BusIndex, window::AccessWidth, Error};

/// Read `len` bytes of configuration space from `segment:bus`, function `devfn`
///
/// # Errors
///
/// Returns [`Error::DeviceNotFound`] if no such bus exists, and [`Error::BadRegister`]
/// for an unsupported access width or misaligned register.
pub fn read<I: BusIndex + ?Sized>(
    index: &I,
    segment: u16,
    bus: u8,
    devfn: u8,
    reg: u16,
    len: usize,
) -> Result<u32, Error> {
    let Some(bus) = index.find_bus(segment, bus) else {
        return Err(Error::DeviceNotFound);
    };
    bus.read(devfn, reg, AccessWidth::try_from(len)?)
}

/// Write `len` bytes of configuration space on `segment:bus`, function `devfn`
///
/// # Errors
///
/// See [`read`].
pub fn write<I: BusIndex + ?Sized>(
    index: &I,
    segment: u16,
    bus: u8,
    devfn: u8,
    reg: u16,
    len: usize,
    value: u32,
) -> Result<(), Error> {
    let Some(bus) = index.find_bus(segment, bus) else {
        return Err(Error::DeviceNotFound);
    };
    bus.write(devfn, reg, AccessWidth::try_from(len)?, value)
}
