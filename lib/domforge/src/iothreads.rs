// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IOThread sizing, disk assignment, and CPU pinning.

use domforge_api_types::IoThreadsPolicy;
use domforge_types::CpuSet;

use crate::error::{ConvertError, Result};

/// Default upper bound on the number of IOThreads the `auto` policy creates.
pub const DEFAULT_AUTO_IO_THREADS_CAP: u32 = 7;

/// What the planner needs to know about one disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiskThreading {
    /// Only virtio disks can be driven by an IOThread.
    pub virtio: bool,
    pub dedicated: bool,
}

/// The IOThread(s) a disk is serviced by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IoThreadAssignment {
    Single(u32),
    /// Every thread of the supplemental pool, in ID order.
    Pool(Vec<u32>),
}

/// An IOThread and the physical CPUs it may run on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IoThreadPin {
    pub id: u32,
    pub cpus: CpuSet,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IoThreadPlan {
    count: u32,
    assignments: Vec<Option<IoThreadAssignment>>,
}

impl IoThreadPlan {
    /// Plans IOThreads for `disks`, in disk order.
    ///
    /// Returns `None` when the guest uses no IOThreads at all: no policy was
    /// set and no disk asked for a dedicated thread.
    pub fn plan(
        policy: Option<IoThreadsPolicy>,
        pool_size: Option<u32>,
        disks: &[DiskThreading],
        vcpus: u32,
        auto_cap: u32,
    ) -> Result<Option<Self>> {
        let any_dedicated = disks.iter().any(|d| d.dedicated);
        if policy.is_none() && !any_dedicated {
            return Ok(None);
        }

        if policy == Some(IoThreadsPolicy::SupplementalPool) {
            let count = pool_size
                .filter(|n| *n > 0)
                .ok_or(ConvertError::SupplementalPoolSizeMissing)?;
            let pool: Vec<u32> = (1..=count).collect();
            let assignments = disks
                .iter()
                .map(|d| {
                    d.virtio.then(|| IoThreadAssignment::Pool(pool.clone()))
                })
                .collect();
            return Ok(Some(Self { count, assignments }));
        }

        let limit = match policy {
            Some(IoThreadsPolicy::Auto) => {
                vcpus.saturating_mul(2).min(auto_cap)
            }
            _ => 1,
        };
        let dedicated =
            disks.iter().filter(|d| d.virtio && d.dedicated).count() as u32;
        let shared =
            disks.iter().filter(|d| d.virtio && !d.dedicated).count() as u32;
        let shared_threads = shared.min(limit.saturating_sub(dedicated).max(1));
        let count = (dedicated + shared_threads).max(1);

        let mut next_dedicated = count;
        let mut next_shared = 0;
        let assignments = disks
            .iter()
            .map(|d| {
                if !d.virtio {
                    None
                } else if d.dedicated {
                    let id = next_dedicated;
                    next_dedicated -= 1;
                    Some(IoThreadAssignment::Single(id))
                } else {
                    let id = next_shared % shared_threads + 1;
                    next_shared += 1;
                    Some(IoThreadAssignment::Single(id))
                }
            })
            .collect();

        Ok(Some(Self { count, assignments }))
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// The assignment for the disk at `index` in the planned disk list.
    pub fn assignment(&self, index: usize) -> Option<&IoThreadAssignment> {
        self.assignments.get(index).and_then(Option::as_ref)
    }

    /// Pins every IOThread to a subset of `cpus`.
    ///
    /// With at least as many CPUs as threads, `cpus` is cut in order into
    /// one contiguous chunk per thread, the earliest chunks taking one extra
    /// CPU each until the remainder is used up. With fewer CPUs than
    /// threads, each thread gets a single CPU, walking `cpus` backwards and
    /// wrapping around.
    pub fn pin_threads(&self, cpus: &[u32]) -> Vec<IoThreadPin> {
        if cpus.is_empty() {
            return vec![];
        }
        let threads = self.count as usize;
        if cpus.len() >= threads {
            let base = cpus.len() / threads;
            let extra = cpus.len() % threads;
            let mut start = 0;
            (0..threads)
                .map(|i| {
                    let len = base + usize::from(i < extra);
                    let chunk = &cpus[start..start + len];
                    start += len;
                    IoThreadPin {
                        id: i as u32 + 1,
                        cpus: chunk.iter().copied().collect(),
                    }
                })
                .collect()
        } else {
            (0..threads)
                .map(|i| {
                    let cpu = cpus[cpus.len() - 1 - (i % cpus.len())];
                    IoThreadPin {
                        id: i as u32 + 1,
                        cpus: std::iter::once(cpu).collect(),
                    }
                })
                .collect()
        }
    }

    /// Pins every IOThread to the whole of `cpus`.
    pub fn pin_all_to(&self, cpus: &CpuSet) -> Vec<IoThreadPin> {
        (1..=self.count)
            .map(|id| IoThreadPin { id, cpus: cpus.clone() })
            .collect()
    }
}
