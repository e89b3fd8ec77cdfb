// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Guest CPU topology resolution.

use domforge_api_types::{Cpu, ResourceRequirements};

use crate::arch::Arch;
use crate::error::{ConvertError, Result};

/// One vCPU slot in a hotplug-capable topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VcpuSlot {
    pub id: u32,
    pub enabled: bool,
    pub hotpluggable: bool,
}

/// The resolved guest CPU layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuTopology {
    pub sockets: u32,
    pub cores: u32,
    pub threads: u32,

    /// Sockets the guest sees. Equal to `sockets` unless hotplug slots were
    /// generated, in which case it is the hotplug maximum.
    pub max_sockets: u32,

    /// Present when vCPU hotplug is in effect.
    pub hotplug_slots: Option<Vec<VcpuSlot>>,

    vcpus: u32,
    max_vcpus: u32,
}

/// `sockets * cores * threads`, or an error when it does not fit a `u32`.
fn vcpu_count(sockets: u32, cores: u32, threads: u32) -> Result<u32> {
    sockets
        .checked_mul(cores)
        .and_then(|n| n.checked_mul(threads))
        .ok_or(ConvertError::VcpuCountOverflow { sockets, cores, threads })
}

impl CpuTopology {
    /// vCPUs online at boot.
    pub fn vcpus(&self) -> u32 {
        self.vcpus
    }

    /// Every vCPU slot, including ones reserved for hotplug.
    pub fn max_vcpus(&self) -> u32 {
        self.max_vcpus
    }

    /// Resolves the topology for a guest.
    ///
    /// An explicit topology always wins. Without one, a CPU request (or,
    /// failing that, a CPU limit) is rounded up into whole single-core
    /// sockets. With neither, the guest gets a single vCPU.
    pub fn resolve(
        cpu: Option<&Cpu>,
        resources: &ResourceRequirements,
        arch: Arch,
    ) -> Result<Self> {
        let set = |v: Option<u32>| v.filter(|n| *n > 0);
        let cores = set(cpu.and_then(|c| c.cores));
        let sockets = set(cpu.and_then(|c| c.sockets));
        let threads = set(cpu.and_then(|c| c.threads));

        let explicit =
            cores.is_some() || sockets.is_some() || threads.is_some();
        let cores = cores.unwrap_or(1);
        let threads = threads.unwrap_or(1);
        let per_socket = vcpu_count(1, cores, threads)?;

        let sockets = match sockets {
            Some(sockets) => sockets,
            None if explicit => 1,
            None => {
                let quantity = resources
                    .requests
                    .cpu
                    .as_ref()
                    .map(|q| ("cpu request", q))
                    .or_else(|| {
                        resources.limits.cpu.as_ref().map(|q| ("cpu limit", q))
                    });
                match quantity {
                    Some((field, q)) => q
                        .div_ceil(per_socket)
                        .map_err(|e| ConvertError::quantity(field, e))?
                        .max(1),
                    None => 1,
                }
            }
        };

        let vcpus = vcpu_count(sockets, cores, threads)?;
        let mut topology = Self {
            sockets,
            cores,
            threads,
            max_sockets: sockets,
            hotplug_slots: None,
            vcpus,
            max_vcpus: vcpus,
        };

        let requested_max = set(cpu.and_then(|c| c.max_sockets));
        if let Some(max_sockets) = requested_max {
            if max_sockets > sockets && arch.supports_vcpu_hotplug() {
                topology.max_sockets = max_sockets;
                topology.max_vcpus = vcpu_count(max_sockets, cores, threads)?;
                topology.hotplug_slots = Some(topology.slots());
            }
        }

        Ok(topology)
    }

    fn slots(&self) -> Vec<VcpuSlot> {
        let online = self.vcpus();
        (0..self.max_vcpus())
            .map(|id| VcpuSlot {
                id,
                enabled: id < online,
                hotpluggable: id >= online,
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use domforge_api_types::ResourceList;

    fn cpu(cores: u32, sockets: u32, threads: u32) -> Cpu {
        Cpu {
            cores: Some(cores),
            sockets: Some(sockets),
            threads: Some(threads),
            ..Default::default()
        }
    }

    fn requests(cpu: &str) -> ResourceRequirements {
        ResourceRequirements {
            requests: ResourceList {
                cpu: Some(cpu.parse().unwrap()),
                memory: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn explicit_topology() {
        let topo = CpuTopology::resolve(
            Some(&cpu(3, 2, 2)),
            &ResourceRequirements::default(),
            Arch::Amd64,
        )
        .unwrap();
        assert_eq!((topo.sockets, topo.cores, topo.threads), (2, 3, 2));
        assert_eq!(topo.vcpus(), 12);
        assert!(topo.hotplug_slots.is_none());
    }

    #[test]
    fn explicit_topology_beats_requests() {
        let topo = CpuTopology::resolve(
            Some(&cpu(2, 1, 1)),
            &requests("8"),
            Arch::Amd64,
        )
        .unwrap();
        assert_eq!(topo.vcpus(), 2);
    }

    #[test]
    fn sockets_from_request_or_limit() {
        let topo =
            CpuTopology::resolve(None, &requests("2200m"), Arch::Amd64)
                .unwrap();
        assert_eq!((topo.sockets, topo.cores, topo.threads), (3, 1, 1));

        let limits = ResourceRequirements {
            limits: ResourceList {
                cpu: Some("2.3".parse().unwrap()),
                memory: None,
            },
            ..Default::default()
        };
        let topo = CpuTopology::resolve(None, &limits, Arch::Amd64).unwrap();
        assert_eq!(topo.sockets, 3);
    }

    #[test]
    fn defaults_to_one_vcpu() {
        let topo = CpuTopology::resolve(
            None,
            &ResourceRequirements::default(),
            Arch::Amd64,
        )
        .unwrap();
        assert_eq!(topo.vcpus(), 1);
        let topo = CpuTopology::resolve(
            Some(&Cpu::default()),
            &ResourceRequirements::default(),
            Arch::S390x,
        )
        .unwrap();
        assert_eq!(topo.vcpus(), 1);
    }

    #[test]
    fn negative_request_is_rejected() {
        let err = CpuTopology::resolve(None, &requests("-2"), Arch::Amd64)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::QuantityParsing);
    }

    #[test]
    fn hotplug_slots() {
        let mut spec = cpu(2, 2, 1);
        spec.max_sockets = Some(3);
        let topo = CpuTopology::resolve(
            Some(&spec),
            &ResourceRequirements::default(),
            Arch::Amd64,
        )
        .unwrap();
        assert_eq!(topo.max_sockets, 3);
        assert_eq!(topo.vcpus(), 4);
        assert_eq!(topo.max_vcpus(), 6);

        let slots = topo.hotplug_slots.unwrap();
        assert_eq!(slots.len(), 6);
        for slot in &slots[..4] {
            assert!(slot.enabled && !slot.hotpluggable);
        }
        for slot in &slots[4..] {
            assert!(!slot.enabled && slot.hotpluggable);
        }
    }

    #[test]
    fn vcpu_count_overflow_is_rejected() {
        let huge = Cpu {
            cores: Some(70_000),
            threads: Some(70_000),
            ..Default::default()
        };
        let err = CpuTopology::resolve(
            Some(&huge),
            &ResourceRequirements::default(),
            Arch::Amd64,
        )
        .unwrap_err();
        assert!(matches!(err, ConvertError::VcpuCountOverflow { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::QuantityParsing);

        let mut hotplug = cpu(65_536, 1, 1);
        hotplug.max_sockets = Some(65_536);
        let err = CpuTopology::resolve(
            Some(&hotplug),
            &ResourceRequirements::default(),
            Arch::Amd64,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConvertError::VcpuCountOverflow { sockets: 65_536, .. }
        ));

        let err = CpuTopology::resolve(
            Some(&Cpu {
                cores: Some(u32::MAX),
                threads: Some(2),
                ..Default::default()
            }),
            &requests("4"),
            Arch::Amd64,
        )
        .unwrap_err();
        assert!(matches!(err, ConvertError::VcpuCountOverflow { .. }));
    }

    #[test]
    fn no_hotplug_on_arm64() {
        let mut spec = cpu(2, 2, 1);
        spec.max_sockets = Some(3);
        let topo = CpuTopology::resolve(
            Some(&spec),
            &ResourceRequirements::default(),
            Arch::Arm64,
        )
        .unwrap();
        assert_eq!(topo.max_sockets, 2);
        assert_eq!(topo.max_vcpus(), 4);
        assert!(topo.hotplug_slots.is_none());
    }
}
