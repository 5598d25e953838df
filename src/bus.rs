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

//! Bus objects and the bus enumeration subsystem
//!
//! Walking the hierarchy, sizing and assigning resources and binding drivers is done
//! elsewhere. This module only defines the seam: the configuration accessors a root bus
//! is created with, and the operations the root bridge code drives.

use crate::{window::AccessWidth, ConfigWindow, Error};
use alloc::{sync::Arc, vec::Vec};
use core::{fmt, ops::RangeInclusive};

/// Configuration space accessors bound to a bus
pub trait ConfigOps: Send + Sync {
    /// The PCI segment (domain) the accessors decode
    fn segment(&self) -> u16;

    fn read(&self, bus: u8, devfn: u8, reg: u16, width: AccessWidth) -> Result<u32, Error>;

    fn write(&self, bus: u8, devfn: u8, reg: u16, width: AccessWidth, value: u32) -> Result<(), Error>;
}

impl ConfigOps for ConfigWindow {
    fn segment(&self) -> u16 {
        ConfigWindow::segment(self)
    }

    fn read(&self, bus: u8, devfn: u8, reg: u16, width: AccessWidth) -> Result<u32, Error> {
        ConfigWindow::read(self, bus, devfn, reg, width)
    }

    fn write(&self, bus: u8, devfn: u8, reg: u16, width: AccessWidth, value: u32) -> Result<(), Error> {
        ConfigWindow::write(self, bus, devfn, reg, width, value)
    }
}

/// A PCI bus
///
/// Every bus below a root bridge shares the root's accessors.
pub struct Bus {
    number: u8,
    ops: Arc<dyn ConfigOps>,
}

impl Bus {
    pub fn new(number: u8, ops: Arc<dyn ConfigOps>) -> Bus {
        Self { number, ops }
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    /// The segment this bus lives in, as reported by its accessors
    pub fn segment(&self) -> u16 {
        self.ops.segment()
    }

    pub fn ops(&self) -> &Arc<dyn ConfigOps> {
        &self.ops
    }

    /// Read a configuration register of function `devfn` on this bus
    ///
    /// # Errors
    ///
    /// Propagates the accessor's error.
    pub fn read(&self, devfn: u8, reg: u16, width: AccessWidth) -> Result<u32, Error> {
        self.ops.read(self.number, devfn, reg, width)
    }

    /// Write a configuration register of function `devfn` on this bus
    ///
    /// # Errors
    ///
    /// Propagates the accessor's error.
    pub fn write(&self, devfn: u8, reg: u16, width: AccessWidth, value: u32) -> Result<(), Error> {
        self.ops.write(self.number, devfn, reg, width, value)
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:04x}:{:02x}]", self.segment(), self.number)
    }
}

/// Index of the buses known to the system, by segment and bus number
pub trait BusIndex: Send + Sync {
    fn find_bus(&self, segment: u16, bus: u8) -> Option<Arc<Bus>>;
}

/// The bus enumeration subsystem
pub trait BusTree: BusIndex {
    /// Create the root bus of a host bridge decoding `bus_range` and scan the hierarchy
    /// below it using `ops`
    ///
    /// Returns `None` if the root bus could not be created. In that case no bus may
    /// retain a reference to `ops`.
    fn create_root(
        &self,
        segment: u16,
        bus_range: RangeInclusive<u8>,
        ops: Arc<dyn ConfigOps>,
    ) -> Option<Arc<Bus>>;

    /// Size the windows of every bridge below `bus`
    fn size_bridges(&self, bus: &Bus);

    /// Assign resources to every device below `bus`
    fn assign_resources(&self, bus: &Bus);

    /// The buses directly behind `bus`
    fn children(&self, bus: &Bus) -> Vec<Arc<Bus>>;

    /// Propagate bus settings (MPS, MRRS) to the devices on `bus`
    fn configure_settings(&self, bus: &Bus);

    /// Remove a root bus and the hierarchy below it
    fn remove_root(&self, bus: &Bus);
}
