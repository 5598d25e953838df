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

//! PCI Express ECAM window discovery.
//!
//! Configuration windows are described by two independent sources: the ACPI MCFG table,
//! parsed once at boot by [`PciHost::late_init`], and the per-root-bridge descriptors
//! handed to [`PciHost::scan_root`] as each host bridge is discovered. The two are
//! reconciled into mapped [`ConfigWindow`]s which then serve every configuration space
//! access for the buses behind that bridge.

#![cfg_attr(not(test), no_std)]
#![warn(clippy::cargo, clippy::pedantic)]
#![deny(
    clippy::semicolon_if_nothing_returned,
    clippy::debug_assert_with_mut_call
)]
#![allow(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::unreadable_literal
)]

extern crate alloc;

pub mod bus;
pub mod factory;
pub mod mcfg;
pub mod raw;
pub mod registry;
pub mod root;
pub mod window;

#[cfg(test)]
mod testing;

pub use anyhow::Result;
pub use bus::{Bus, BusIndex, BusTree, ConfigOps};
pub use factory::{Created, RootBridge, WindowFactory, Warnings};
pub use mcfg::AllocationEntry;
pub use registry::{Lookup, WindowRegistry};
pub use root::RootBus;
pub use window::{AccessWidth, ConfigWindow, MapError, MappedRegion, Mapper};

use alloc::{sync::Arc, vec::Vec};
use core::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// The MCFG table length does not describe between 1 and 255 whole entries.
    MalformedTable,
    /// Neither the MCFG table nor the root bridge provide an ECAM base address.
    MissingAddress,
    /// The requested bus range straddles or spills past an MCFG entry.
    RangeConflict,
    /// The root bridge's first bus does not match the MCFG entry it falls in.
    RangeMismatch,
    /// The root bridge's bus range is empty.
    BadBusRange,
    /// A window for an overlapping bus range is already registered.
    Overlap,
    Mapping(MapError),
    DeviceNotFound,
    BadRegister,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<Error> for anyhow::Error {
    fn from(value: Error) -> Self {
        anyhow::anyhow!("{value}")
    }
}

impl From<MapError> for Error {
    fn from(value: MapError) -> Self {
        Self::Mapping(value)
    }
}

/// Process-wide PCI host state
///
/// One instance is created during platform bring-up and shared by every root bridge
/// discovery event. It owns the MCFG table copy and the window registry, and holds the
/// collaborators used to map windows and to build the bus hierarchy.
pub struct PciHost {
    registry: WindowRegistry,
    mapper: Arc<dyn Mapper>,
    tree: Arc<dyn BusTree>,
}

impl PciHost {
    pub fn new(mapper: Arc<dyn Mapper>, tree: Arc<dyn BusTree>) -> PciHost {
        Self {
            registry: WindowRegistry::new(),
            mapper,
            tree,
        }
    }

    /// Parse and install the MCFG table
    ///
    /// `table` is the complete table as handed over by the firmware table loader, or
    /// `None` if the firmware does not provide one. A missing or malformed table leaves
    /// the host with zero entries: only root bridges that carry their own base address
    /// can be brought up in that case.
    ///
    /// The table is installed once. Later calls are ignored.
    ///
    /// Returns the number of entries available for lookups.
    pub fn late_init(&self, table: Option<&[u8]>) -> usize {
        if self.registry.is_installed() {
            log::warn!("ACPI: MCFG table already loaded, ignoring");
            return self.registry.entries().len();
        }

        let Some(table) = table else {
            log::error!("ACPI: failed to parse MCFG, no table present");
            self.registry.install(Vec::new());
            return 0;
        };

        match mcfg::parse(table) {
            Ok(entries) => {
                let count = entries.len();
                self.registry.install(entries);
                log::info!("ACPI: MCFG table loaded, {count} entries");
                count
            }
            Err(error) => {
                log::error!("ACPI: failed to parse MCFG: {error}");
                self.registry.install(Vec::new());
                0
            }
        }
    }

    pub fn registry(&self) -> &WindowRegistry {
        &self.registry
    }

    pub fn factory(&self) -> WindowFactory<'_> {
        WindowFactory::new(&self.registry, &self.mapper)
    }

    pub fn bus_tree(&self) -> &dyn BusTree {
        &*self.tree
    }

    /// Read from configuration space through an existing bus object
    pub fn raw_read(
        &self,
        segment: u16,
        bus: u8,
        devfn: u8,
        reg: u16,
        len: usize,
    ) -> core::result::Result<u32, Error> {
        raw::read(self.bus_tree(), segment, bus, devfn, reg, len)
    }

    /// Write to configuration space through an existing bus object
    pub fn raw_write(
        &self,
        segment: u16,
        bus: u8,
        devfn: u8,
        reg: u16,
        len: usize,
        value: u32,
    ) -> core::result::Result<(), Error> {
        raw::write(self.bus_tree(), segment, bus, devfn, reg, len, value)
    }
}
