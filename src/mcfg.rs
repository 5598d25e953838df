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

//! ACPI MCFG table
//!
//! The table is an SDT header followed by 8 reserved bytes and an array of
//! configuration space allocation entries:
//!
//! ```text
//! offset  size
//!      0     8  base address of the ECAM region (little-endian)
//!      8     2  PCI segment group
//!     10     1  start bus number
//!     11     1  end bus number
//!     12     4  reserved
//! ```

use crate::Error;
use alloc::vec::Vec;

pub const MCFG_SIGNATURE: [u8; 4] = *b"MCFG";

/// Size of the standard SDT header
pub const SDT_HEADER_SIZE: usize = 36;

/// Offset of the first allocation entry, past the SDT header and the reserved field
pub const HEADER_SIZE: usize = SDT_HEADER_SIZE + 8;

pub const ENTRY_SIZE: usize = 16;

/// Upper bound on the number of entries a table may carry
pub const MAX_ENTRIES: usize = 255;

/// A single MCFG configuration space allocation
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct AllocationEntry {
    pub segment: u16,
    pub base_address: u64,
    pub bus_start: u8,
    pub bus_end: u8,
}

impl AllocationEntry {
    fn from_bytes(bytes: &[u8; ENTRY_SIZE]) -> AllocationEntry {
        let mut base = [0; 8];
        base.copy_from_slice(&bytes[0..8]);

        Self {
            base_address: u64::from_le_bytes(base),
            segment: u16::from_le_bytes([bytes[8], bytes[9]]),
            bus_start: bytes[10],
            bus_end: bytes[11],
        }
    }

    pub fn contains(&self, bus: u8) -> bool {
        (self.bus_start..=self.bus_end).contains(&bus)
    }
}

/// Returns the `length` field of the SDT header
fn table_length(table: &[u8]) -> Option<usize> {
    let bytes = table.get(4..8)?;
    let length = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    usize::try_from(length).ok()
}

/// Parse the allocation entries out of an MCFG table
///
/// The entries are copied verbatim and kept in table order. Overlapping entries are
/// not rejected here, conflicts are only detected when a bus range is looked up.
///
/// # Errors
///
/// Returns [`Error::MalformedTable`] if the header's `length` exceeds the provided
/// bytes, or if it does not describe a whole number of entries between 1 and
/// [`MAX_ENTRIES`].
pub fn parse(table: &[u8]) -> Result<Vec<AllocationEntry>, Error> {
    let length = table_length(table).ok_or(Error::MalformedTable)?;
    if length > table.len() {
        log::error!("ACPI: MCFG length {length:#x} exceeds table size {:#x}", table.len());
        return Err(Error::MalformedTable);
    }

    let entries_len = length.checked_sub(HEADER_SIZE).ok_or(Error::MalformedTable)?;
    let count = entries_len / ENTRY_SIZE;
    if entries_len % ENTRY_SIZE != 0 || count == 0 || count > MAX_ENTRIES {
        log::error!("ACPI: MCFG has incorrect entries ({count})");
        return Err(Error::MalformedTable);
    }

    let entries = table[HEADER_SIZE..length]
        .chunks_exact(ENTRY_SIZE)
        .map(|chunk| {
            let mut bytes = [0; ENTRY_SIZE];
            bytes.copy_from_slice(chunk);
            AllocationEntry::from_bytes(&bytes)
        })
        .collect::<Vec<_>>();

    for entry in &entries {
        log::debug!(
            "  MCFG {:04x}:{:02x}-{:02x} @ {:#018x}",
            entry.segment,
            entry.bus_start,
            entry.bus_end,
            entry.base_address
        );
    }

    Ok(entries)
}
