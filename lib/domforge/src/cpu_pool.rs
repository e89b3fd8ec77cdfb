// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Dedicated physical CPU placement.
//!
//! The pool is an ordered list of physical CPU IDs consumed front to back.
//! vCPUs are fitted first; whatever is left over is available for the
//! emulator thread. The two steps are separate types so an emulator
//! reservation can only be made against a pool whose vCPUs are placed.

use std::collections::BTreeSet;

use domforge_types::CpuSet;

use crate::context::NumaTopology;
use crate::error::{ConvertError, Result};

/// Physical CPUs available to a guest, in placement order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuPool {
    cpus: Vec<u32>,
}

impl CpuPool {
    pub fn new(cpus: Vec<u32>) -> Self {
        Self { cpus }
    }

    /// Orders the allowed CPUs by NUMA cell so that consecutive vCPUs land
    /// on the same cell. Allowed CPUs no cell claims come last, ascending.
    pub fn from_host(allowed: &CpuSet, numa: Option<&NumaTopology>) -> Self {
        let mut seen = BTreeSet::new();
        let mut cpus = Vec::with_capacity(allowed.len());
        for cell in numa.map(|n| n.cells.as_slice()).unwrap_or_default() {
            for cpu in &cell.cpus {
                if allowed.contains(*cpu) && seen.insert(*cpu) {
                    cpus.push(*cpu);
                }
            }
        }
        cpus.extend(allowed.iter().filter(|cpu| !seen.contains(cpu)));
        Self { cpus }
    }

    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    /// Pins each of `vcpus` vCPUs to its own physical CPU, in pool order.
    pub fn fit_cores(self, vcpus: u32) -> Result<CpuPlacement> {
        let vcpus = vcpus as usize;
        if self.cpus.len() < vcpus {
            return Err(ConvertError::InsufficientCpus {
                vcpus,
                available: self.cpus.len(),
            });
        }
        Ok(CpuPlacement { cpus: self.cpus, cursor: vcpus, emulator: vec![] })
    }
}

/// A pool whose vCPUs have been pinned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuPlacement {
    cpus: Vec<u32>,
    cursor: usize,
    emulator: Vec<u32>,
}

impl CpuPlacement {
    /// The physical CPU for each vCPU, indexed by vCPU ID.
    pub fn vcpu_pins(&self) -> &[u32] {
        &self.cpus[..self.vcpu_count()]
    }

    pub fn vcpu_count(&self) -> usize {
        self.cursor - self.emulator.len()
    }

    /// The pinned vCPU CPUs as a set.
    pub fn vcpu_cpus(&self) -> CpuSet {
        self.vcpu_pins().iter().copied().collect()
    }

    pub fn emulator_cpus(&self) -> CpuSet {
        self.emulator.iter().copied().collect()
    }

    pub fn remaining(&self) -> &[u32] {
        &self.cpus[self.cursor..]
    }

    /// Reserves physical CPUs for the emulator thread.
    ///
    /// One CPU is reserved, unless `even_parity` is set and the vCPU count is
    /// even, in which case two are reserved so that the total number of
    /// dedicated CPUs stays even.
    pub fn reserve_emulator_thread(
        &mut self,
        even_parity: bool,
    ) -> Result<&[u32]> {
        let even_vcpus = self.vcpu_count() % 2 == 0;
        let wanted = if even_parity && even_vcpus { 2 } else { 1 };
        match self.remaining().len() {
            0 => return Err(ConvertError::NoEmulatorThreadCpu),
            1 if wanted == 2 => {
                return Err(ConvertError::NoSecondEmulatorThreadCpu)
            }
            _ => {}
        }
        let start = self.cursor;
        self.emulator.extend_from_slice(&self.cpus[start..start + wanted]);
        self.cursor += wanted;
        Ok(&self.cpus[start..start + wanted])
    }
}
