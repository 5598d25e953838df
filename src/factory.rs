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

//! Construction of configuration windows for root bridges
//!
//! A root bridge's descriptor and the MCFG table are two independent descriptions of the
//! same ECAM region and firmware does not always keep them consistent. The rules are:
//!
//! - A range that touches an MCFG entry without being contained in it is an error.
//! - If no entry matches, the bridge must supply its own base address.
//! - The bridge's first bus must equal the entry's first bus.
//! - A base address supplied by the bridge wins over the entry's.
//! - Otherwise, the bus range is clipped to the entry.

use crate::{
    registry::Lookup,
    window::{window_extent, MapError, MappedRegion, Mapper},
    ConfigWindow, Error, WindowRegistry,
};
use alloc::sync::Arc;
use core::fmt;

/// Root bridge descriptor, as supplied by ACPI
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RootBridge {
    pub segment: u16,
    pub bus_start: u8,
    pub bus_end: u8,
    /// ECAM base address provided by the bridge itself (`_CBA`)
    pub base_address: Option<u64>,
}

impl RootBridge {
    pub(crate) fn tag(&self) -> Tag {
        Tag(self.segment, self.bus_start, self.bus_end)
    }
}

/// `SSSS:BB-BB` prefix for diagnostics
#[derive(Clone, Copy)]
pub(crate) struct Tag(u16, u8, u8);

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:02x}-{:02x}", self.0, self.1, self.2)
    }
}

bitflags::bitflags! {
    /// Inconsistencies between the bridge and the MCFG table that were worked around
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Warnings : u8 {
        /// The bridge's base address differs from the MCFG entry's; the bridge's was used.
        const ADDRESS_MISMATCH  = 1 << 0;
        /// The bridge's last bus differs from the MCFG entry's; the narrower range was used.
        const END_MISMATCH      = 1 << 1;
    }
}

/// A window that was created and registered
#[derive(Debug)]
pub struct Created {
    pub window: Arc<ConfigWindow>,
    pub warnings: Warnings,
}

/// The parameters a window is built with, once the bridge and table are reconciled
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Resolved {
    base_address: u64,
    bus_end: u8,
    warnings: Warnings,
}

fn resolve(bridge: &RootBridge, lookup: Lookup) -> Result<Resolved, Error> {
    let tag = bridge.tag();

    let entry = match lookup {
        Lookup::Found(entry) => entry,
        Lookup::NotFound => {
            return match bridge.base_address {
                Some(base_address) => Ok(Resolved {
                    base_address,
                    bus_end: bridge.bus_end,
                    warnings: Warnings::empty(),
                }),
                None => {
                    log::error!("{tag} MCFG lookup failed");
                    Err(Error::MissingAddress)
                }
            };
        }
        Lookup::RangeConflict => {
            log::error!("{tag} bus range error");
            return Err(Error::RangeConflict);
        }
    };

    if bridge.bus_start != entry.bus_start {
        log::error!("{tag} bus range mismatch {:02x}", entry.bus_start);
        return Err(Error::RangeMismatch);
    }

    let mut resolved = Resolved {
        base_address: bridge.base_address.unwrap_or(entry.base_address),
        bus_end: bridge.bus_end,
        warnings: Warnings::empty(),
    };

    if resolved.base_address != entry.base_address {
        log::warn!(
            "{tag} CBA {:#x} != MCFG {:#x}, using CBA",
            resolved.base_address,
            entry.base_address
        );
        resolved.warnings |= Warnings::ADDRESS_MISMATCH;
    } else if bridge.bus_end != entry.bus_end {
        resolved.bus_end = bridge.bus_end.min(entry.bus_end);
        log::warn!("{tag} bus end mismatch, using {:02x}", resolved.bus_end);
        resolved.warnings |= Warnings::END_MISMATCH;
    }

    Ok(resolved)
}

pub struct WindowFactory<'a> {
    registry: &'a WindowRegistry,
    mapper: &'a Arc<dyn Mapper>,
}

impl<'a> WindowFactory<'a> {
    pub fn new(registry: &'a WindowRegistry, mapper: &'a Arc<dyn Mapper>) -> WindowFactory<'a> {
        Self { registry, mapper }
    }

    /// Create, map and register the configuration window for `bridge`
    ///
    /// The registry stays locked from the table lookup until the window is registered.
    /// On failure nothing stays mapped.
    ///
    /// # Errors
    ///
    /// - [`Error::BadBusRange`] if the bridge's bus range is empty.
    /// - [`Error::RangeConflict`], [`Error::RangeMismatch`] or [`Error::MissingAddress`]
    ///   if the bridge cannot be reconciled with the MCFG table.
    /// - [`Error::Mapping`] if the region cannot be mapped.
    /// - [`Error::Overlap`] if a window for an overlapping range is already registered.
    pub fn create(&self, bridge: &RootBridge) -> Result<Created, Error> {
        let tag = bridge.tag();

        if bridge.bus_start > bridge.bus_end {
            log::error!("{tag} empty bus range");
            return Err(Error::BadBusRange);
        }

        let mut registry = self.registry.lock();

        let resolved = resolve(bridge, registry.lookup(bridge.segment, bridge.bus_start, bridge.bus_end))?;

        let extent = window_extent(resolved.base_address, bridge.bus_start, resolved.bus_end)
            .ok_or(Error::Mapping(MapError::InvalidRange))?;
        let size = usize::try_from(extent.end() - extent.start() + 1)
            .map_err(|_| Error::Mapping(MapError::InvalidRange))?;

        let region = MappedRegion::new(self.mapper, *extent.start(), size).map_err(|error| {
            log::error!("{tag} error {error:?} mapping ECAM");
            Error::Mapping(error)
        })?;

        let window = Arc::new(ConfigWindow::new(
            bridge.segment,
            bridge.bus_start,
            resolved.bus_end,
            resolved.base_address,
            region,
        ));

        // A rejected window is dropped here, which unmaps it.
        registry.insert(Arc::clone(&window))?;

        log::debug!("{tag} ECAM at [mem {:#x}-{:#x}]", extent.start(), extent.end());

        Ok(Created {
            window,
            warnings: resolved.warnings,
        })
    }
}
