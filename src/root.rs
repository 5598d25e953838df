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

//! Root bridge binding

use crate::{
    bus::{Bus, ConfigOps},
    factory::{Created, RootBridge, Warnings},
    ConfigWindow, PciHost, WindowRegistry,
};
use alloc::sync::Arc;
use anyhow::anyhow;
use core::fmt;

/// A root bus bound to the configuration window it was scanned through
///
/// Pass it back to [`PciHost::release_root`] to tear the bridge down.
pub struct RootBus {
    bus: Arc<Bus>,
    window: Arc<ConfigWindow>,
    warnings: Warnings,
}

impl RootBus {
    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    pub fn window(&self) -> &Arc<ConfigWindow> {
        &self.window
    }

    /// Inconsistencies worked around while the window was set up
    pub fn warnings(&self) -> Warnings {
        self.warnings
    }

    pub fn segment(&self) -> u16 {
        self.window.segment()
    }
}

impl fmt::Debug for RootBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootBus")
            .field("bus", &self.bus)
            .field("window", &self.window)
            .field("warnings", &self.warnings)
            .finish()
    }
}

/// Keeps a new window registered only if binding it to a bus succeeds
struct Registration<'a> {
    registry: &'a WindowRegistry,
    window: Arc<ConfigWindow>,
    armed: bool,
}

impl<'a> Registration<'a> {
    fn new(registry: &'a WindowRegistry, window: Arc<ConfigWindow>) -> Registration<'a> {
        Self {
            registry,
            window,
            armed: true,
        }
    }

    fn commit(mut self) -> Arc<ConfigWindow> {
        self.armed = false;
        Arc::clone(&self.window)
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.armed {
            log::debug!("dropping unbound window {:?}", self.window);
            drop(self.registry.remove(self.window.segment(), self.window.bus_start()));
        }
    }
}

impl PciHost {
    /// Set up a newly discovered root bridge
    ///
    /// Creates the bridge's configuration window, builds the root bus on top of it and
    /// sizes and assigns the resources of the hierarchy below. Returns `None` if the
    /// bridge could not be set up, in which case no window is left mapped for it.
    pub fn scan_root(&self, bridge: &RootBridge) -> Option<RootBus> {
        match self.bind_root(bridge) {
            Ok(root) => Some(root),
            Err(error) => {
                log::error!("{}: {error}", bridge.tag());
                None
            }
        }
    }

    fn bind_root(&self, bridge: &RootBridge) -> crate::Result<RootBus> {
        let Created { window, warnings } = self
            .factory()
            .create(bridge)
            .map_err(|error| anyhow!("failed to set up ECAM window: {error}"))?;
        let registration = Registration::new(self.registry(), window);

        let ops: Arc<dyn ConfigOps> = registration.window.clone();
        let bus = self
            .bus_tree()
            .create_root(bridge.segment, registration.window.bus_range(), ops)
            .ok_or_else(|| anyhow!("failed to create root bus"))?;

        let tree = self.bus_tree();
        tree.size_bridges(&bus);
        tree.assign_resources(&bus);
        for child in tree.children(&bus) {
            tree.configure_settings(&child);
        }

        log::info!("{}: root bus {:?} bound to {:?}", bridge.tag(), bus, registration.window);

        Ok(RootBus {
            bus,
            window: registration.commit(),
            warnings,
        })
    }

    /// Tear down a root bridge set up by [`PciHost::scan_root`]
    ///
    /// The window is unregistered, and unmapped once the last bus using it is gone.
    pub fn release_root(&self, root: RootBus) {
        let RootBus { bus, window, .. } = root;

        self.bus_tree().remove_root(&bus);
        drop(bus);

        if self
            .registry()
            .remove(window.segment(), window.bus_start())
            .is_none()
        {
            log::warn!("{window:?} was not registered");
        }
    }
}
