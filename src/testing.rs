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

//! Test doubles for the mapping and bus enumeration collaborators.

use crate::{
    bus::{Bus, BusIndex, BusTree, ConfigOps},
    window::{window_extent, MapError, MappedRegion, Mapper},
    ConfigWindow,
};
use std::{
    ops::RangeInclusive,
    ptr::{self, NonNull},
    string::String,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    vec::Vec,
};

/// A mapper backed by heap memory
///
/// An unbacked mapper hands out dangling pointers, for tests that never touch the
/// windows they create.
pub struct TestMapper {
    backed: bool,
    fail: Mutex<Option<MapError>>,
    requests: Mutex<Vec<(u64, usize)>>,
    live: AtomicUsize,
    unmapped: AtomicUsize,
}

impl TestMapper {
    fn with_backing(backed: bool) -> Arc<TestMapper> {
        Arc::new(Self {
            backed,
            fail: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            live: AtomicUsize::new(0),
            unmapped: AtomicUsize::new(0),
        })
    }

    pub fn new() -> Arc<TestMapper> {
        Self::with_backing(true)
    }

    pub fn unbacked() -> Arc<TestMapper> {
        Self::with_backing(false)
    }

    /// Make every following `map` call fail with `error`
    pub fn fail_with(&self, error: MapError) {
        *self.fail.lock().unwrap() = Some(error);
    }

    /// Mappings not yet released
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn unmapped(&self) -> usize {
        self.unmapped.load(Ordering::SeqCst)
    }

    /// Every successful `(phys, size)` request, in order
    pub fn requests(&self) -> Vec<(u64, usize)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn as_dyn(self: &Arc<Self>) -> Arc<dyn Mapper> {
        self.clone()
    }
}

unsafe impl Mapper for TestMapper {
    fn map(&self, phys: u64, size: usize) -> Result<NonNull<u8>, MapError> {
        if let Some(error) = *self.fail.lock().unwrap() {
            return Err(error);
        }

        let virt = if self.backed {
            let memory = vec![0u8; size].into_boxed_slice();
            NonNull::new(Box::into_raw(memory).cast::<u8>()).unwrap()
        } else {
            NonNull::dangling()
        };

        self.requests.lock().unwrap().push((phys, size));
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(virt)
    }

    unsafe fn unmap(&self, virt: NonNull<u8>, size: usize) {
        if self.backed {
            drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(virt.as_ptr(), size)) });
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.unmapped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Map a window for `bus_start..=bus_end` at a fixed base address
pub fn test_window(mapper: &Arc<TestMapper>, segment: u16, bus_start: u8, bus_end: u8) -> Arc<ConfigWindow> {
    let base = 0x4000_0000;
    let extent = window_extent(base, bus_start, bus_end).unwrap();
    let size = (extent.end() - extent.start() + 1) as usize;
    let region = MappedRegion::new(&mapper.as_dyn(), *extent.start(), size).unwrap();
    Arc::new(ConfigWindow::new(segment, bus_start, bus_end, base, region))
}

struct RootEntry {
    root: Arc<Bus>,
    children: Vec<Arc<Bus>>,
}

/// A bus tree that creates a fixed number of child buses below every root
pub struct TestTree {
    child_buses: u8,
    fail_create: AtomicBool,
    roots: Mutex<Vec<RootEntry>>,
    events: Mutex<Vec<String>>,
}

impl TestTree {
    pub fn new(child_buses: u8) -> Arc<TestTree> {
        Arc::new(Self {
            child_buses,
            fail_create: AtomicBool::new(false),
            roots: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn root_count(&self) -> usize {
        self.roots.lock().unwrap().len()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl BusIndex for TestTree {
    fn find_bus(&self, segment: u16, bus: u8) -> Option<Arc<Bus>> {
        self.roots
            .lock()
            .unwrap()
            .iter()
            .flat_map(|entry| core::iter::once(&entry.root).chain(&entry.children))
            .find(|b| b.segment() == segment && b.number() == bus)
            .cloned()
    }
}

impl BusTree for TestTree {
    fn create_root(
        &self,
        segment: u16,
        bus_range: RangeInclusive<u8>,
        ops: Arc<dyn ConfigOps>,
    ) -> Option<Arc<Bus>> {
        self.record(format!("create {segment:04x}:{:02x}-{:02x}", bus_range.start(), bus_range.end()));
        if self.fail_create.load(Ordering::SeqCst) {
            return None;
        }

        let first = *bus_range.start();
        let root = Arc::new(Bus::new(first, Arc::clone(&ops)));
        let children = (1..=self.child_buses)
            .filter_map(|n| first.checked_add(n))
            .filter(|bus| bus_range.contains(bus))
            .map(|bus| Arc::new(Bus::new(bus, Arc::clone(&ops))))
            .collect();

        self.roots.lock().unwrap().push(RootEntry {
            root: Arc::clone(&root),
            children,
        });
        Some(root)
    }

    fn size_bridges(&self, bus: &Bus) {
        self.record(format!("size {:02x}", bus.number()));
    }

    fn assign_resources(&self, bus: &Bus) {
        self.record(format!("assign {:02x}", bus.number()));
    }

    fn children(&self, bus: &Bus) -> Vec<Arc<Bus>> {
        self.roots
            .lock()
            .unwrap()
            .iter()
            .find(|entry| ptr::eq(&*entry.root, bus))
            .map_or_else(Vec::new, |entry| entry.children.clone())
    }

    fn configure_settings(&self, bus: &Bus) {
        self.record(format!("configure {:02x}", bus.number()));
    }

    fn remove_root(&self, bus: &Bus) {
        self.record(format!("remove {:02x}", bus.number()));
        self.roots
            .lock()
            .unwrap()
            .retain(|entry| !ptr::eq(&*entry.root, bus));
    }
}
