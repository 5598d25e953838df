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

//! Registry of live configuration windows
//!
//! The registry owns the copy of the MCFG table and every window created from it.
//! Lookups, insertions and removals all happen under a single lock so a window that is
//! being torn down can never be observed half removed by a concurrent lookup.

use crate::{AllocationEntry, ConfigWindow, Error};
use alloc::{boxed::Box, collections::BTreeMap, sync::Arc, vec::Vec};
use spin::{Mutex, MutexGuard, Once};

/// Result of matching a bus range against the MCFG table
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Lookup {
    Found(AllocationEntry),
    NotFound,
    /// The range starts inside an entry but extends past its end, or ends inside an
    /// entry it does not start in.
    RangeConflict,
}

/// Match `bus_start..=bus_end` in `segment` against `entries`
///
/// Entries are scanned in table order and the first entry the range touches decides the
/// outcome. Overlapping entries are therefore resolved by their position in the table.
pub fn lookup(entries: &[AllocationEntry], segment: u16, bus_start: u8, bus_end: u8) -> Lookup {
    for entry in entries.iter().filter(|entry| entry.segment == segment) {
        if entry.contains(bus_start) {
            return if bus_end <= entry.bus_end {
                Lookup::Found(*entry)
            } else {
                Lookup::RangeConflict
            };
        } else if entry.contains(bus_end) {
            return Lookup::RangeConflict;
        }
    }
    Lookup::NotFound
}

type Windows = BTreeMap<u16, Vec<Arc<ConfigWindow>>>;

pub struct WindowRegistry {
    table: Once<Box<[AllocationEntry]>>,
    windows: Mutex<Windows>,
}

impl Default for WindowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowRegistry {
    pub const fn new() -> WindowRegistry {
        Self {
            table: Once::new(),
            windows: Mutex::new(BTreeMap::new()),
        }
    }

    /// Install the MCFG entries
    ///
    /// Returns `false` if a table was already installed, in which case `entries` is
    /// discarded.
    pub fn install(&self, entries: Vec<AllocationEntry>) -> bool {
        let mut installed = false;
        self.table.call_once(|| {
            installed = true;
            entries.into_boxed_slice()
        });
        installed
    }

    pub fn is_installed(&self) -> bool {
        self.table.is_completed()
    }

    /// The installed MCFG entries, in table order
    pub fn entries(&self) -> &[AllocationEntry] {
        match self.table.get() {
            Some(table) => &table[..],
            None => &[],
        }
    }

    /// Take the registry lock
    pub fn lock(&self) -> Locked<'_> {
        Locked {
            table: self.entries(),
            windows: self.windows.lock(),
        }
    }

    pub fn lookup(&self, segment: u16, bus_start: u8, bus_end: u8) -> Lookup {
        self.lock().lookup(segment, bus_start, bus_end)
    }

    /// Register a window
    ///
    /// # Errors
    ///
    /// Returns [`Error::Overlap`] if a window overlapping its bus range is already
    /// registered in the same segment. The rejected window is dropped.
    pub fn insert(&self, window: Arc<ConfigWindow>) -> Result<(), Error> {
        self.lock().insert(window)
    }

    pub fn remove(&self, segment: u16, bus_start: u8) -> Option<Arc<ConfigWindow>> {
        self.lock().remove(segment, bus_start)
    }

    /// Find the window decoding `bus` in `segment`
    pub fn find(&self, segment: u16, bus: u8) -> Option<Arc<ConfigWindow>> {
        self.lock().find(segment, bus)
    }

    /// The windows registered in `segment`, ordered by first bus
    pub fn windows(&self, segment: u16) -> Vec<Arc<ConfigWindow>> {
        self.lock()
            .windows
            .get(&segment)
            .map_or_else(Vec::new, Clone::clone)
    }

    /// Total number of registered windows
    pub fn len(&self) -> usize {
        self.lock().windows.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The registry, locked
pub struct Locked<'a> {
    table: &'a [AllocationEntry],
    windows: MutexGuard<'a, Windows>,
}

impl Locked<'_> {
    pub fn lookup(&self, segment: u16, bus_start: u8, bus_end: u8) -> Lookup {
        lookup(self.table, segment, bus_start, bus_end)
    }

    /// See [`WindowRegistry::insert`]
    ///
    /// # Errors
    ///
    /// Returns [`Error::Overlap`] if the window overlaps a registered one.
    pub fn insert(&mut self, window: Arc<ConfigWindow>) -> Result<(), Error> {
        let windows = self.windows.entry(window.segment()).or_default();

        if let Some(existing) = windows
            .iter()
            .find(|w| w.overlaps(window.bus_start(), window.bus_end()))
        {
            log::error!("{window:?} overlaps registered window {existing:?}");
            return Err(Error::Overlap);
        }

        let index = windows.partition_point(|w| w.bus_start() < window.bus_start());
        windows.insert(index, window);
        Ok(())
    }

    pub fn remove(&mut self, segment: u16, bus_start: u8) -> Option<Arc<ConfigWindow>> {
        let windows = self.windows.get_mut(&segment)?;
        let index = windows.iter().position(|w| w.bus_start() == bus_start)?;
        let window = windows.remove(index);

        if windows.is_empty() {
            self.windows.remove(&segment);
        }

        Some(window)
    }

    pub fn find(&self, segment: u16, bus: u8) -> Option<Arc<ConfigWindow>> {
        self.windows
            .get(&segment)?
            .iter()
            .find(|w| w.contains_bus(bus))
            .cloned()
    }
}
