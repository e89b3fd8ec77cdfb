// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! vCPU topology, CPU model, and pinning.

use slog::{debug, info};

use domforge_api_types::EMULATOR_THREAD_EVEN_PARITY_ANNOTATION;

use super::{Conversion, DomainBuilder};
use crate::cpu_pool::{CpuPlacement, CpuPool};
use crate::descriptor::{
    Cpu, CpuFeature, CpuTopology as TopologyElement, CpuTune, EmulatorPin,
    HotplugVcpu, IoThreadPin, Vcpu, VcpuPin,
};
use crate::error::Result;
use crate::iothreads::IoThreadPlan;
use crate::topology::CpuTopology;

const HOST_MODEL: &str = "host-model";
const HOST_PASSTHROUGH: &str = "host-passthrough";

pub(super) fn resolve_topology(conv: &Conversion<'_>) -> Result<CpuTopology> {
    let topology = CpuTopology::resolve(
        conv.spec.domain.cpu.as_ref(),
        &conv.spec.domain.resources,
        conv.arch(),
    )?;
    debug!(conv.log, "resolved cpu topology";
        "sockets" => topology.sockets,
        "cores" => topology.cores,
        "threads" => topology.threads,
        "max_sockets" => topology.max_sockets,
    );
    Ok(topology)
}

pub(super) fn convert_cpu(
    conv: &Conversion<'_>,
    topology: &CpuTopology,
    builder: &mut DomainBuilder,
) {
    let spec_cpu = conv.spec.domain.cpu.as_ref();
    let (mode, model) = match spec_cpu.and_then(|c| c.model.as_deref()) {
        None => (conv.arch().default_cpu_mode().to_owned(), None),
        Some(m @ (HOST_MODEL | HOST_PASSTHROUGH)) => (m.to_owned(), None),
        Some(other) => ("custom".to_owned(), Some(other.to_owned())),
    };

    let mut features = Vec::new();
    if mode == HOST_MODEL && conv.arch().disables_mpx() {
        features.push(CpuFeature {
            name: "mpx".into(),
            policy: "disable".into(),
        });
    }
    features.extend(spec_cpu.into_iter().flat_map(|c| &c.features).map(
        |f| CpuFeature {
            name: f.name.clone(),
            policy: f.policy.clone().unwrap_or_else(|| "require".into()),
        },
    ));

    let domain = builder.descriptor_mut();
    domain.cpu = Cpu {
        mode,
        model,
        topology: TopologyElement {
            sockets: topology.max_sockets,
            cores: topology.cores,
            threads: topology.threads,
        },
        features,
    };

    domain.vcpu = Vcpu {
        placement: "static",
        cpus: topology.max_vcpus(),
        current: topology.hotplug_slots.as_ref().map(|_| topology.vcpus()),
    };
    domain.vcpus = topology
        .hotplug_slots
        .iter()
        .flatten()
        .map(|slot| HotplugVcpu {
            id: slot.id,
            enabled: slot.enabled.into(),
            hotpluggable: slot.hotpluggable.into(),
        })
        .collect();
}

/// Picks physical CPUs for the vCPUs (and the emulator thread, if isolated)
/// when dedicated placement is requested.
pub(super) fn place_vcpus(
    conv: &Conversion<'_>,
    topology: &CpuTopology,
) -> Result<Option<CpuPlacement>> {
    let Some(cpu) = conv.spec.domain.cpu.as_ref() else {
        return Ok(None);
    };
    if !cpu.dedicated_cpu_placement {
        return Ok(None);
    }

    let pool = CpuPool::from_host(&conv.ctx.cpu_set, conv.ctx.numa.as_ref());
    let mut placement = pool.fit_cores(topology.vcpus())?;
    if cpu.isolate_emulator_thread {
        let even_parity = conv
            .spec
            .annotation(EMULATOR_THREAD_EVEN_PARITY_ANNOTATION)
            .is_some();
        let reserved = placement.reserve_emulator_thread(even_parity)?;
        debug!(conv.log, "reserved emulator thread cpus";
            "cpus" => ?reserved);
    }
    info!(conv.log, "pinned vcpus";
        "vcpus" => placement.vcpu_count(),
        "cpus" => %placement.vcpu_cpus(),
    );
    Ok(Some(placement))
}

pub(super) fn convert_cpu_tune(
    conv: &Conversion<'_>,
    placement: Option<&CpuPlacement>,
    io_threads: Option<&IoThreadPlan>,
    builder: &mut DomainBuilder,
) {
    let domain = builder.descriptor_mut();
    domain.iothreads = io_threads.map(IoThreadPlan::count);

    let Some(placement) = placement else {
        return;
    };

    let vcpupin = placement
        .vcpu_pins()
        .iter()
        .enumerate()
        .map(|(vcpu, &cpu)| VcpuPin {
            vcpu: vcpu as u32,
            cpuset: std::iter::once(cpu).collect(),
        })
        .collect();

    let emulator = placement.emulator_cpus();
    let iothreadpin = match io_threads {
        None => vec![],
        Some(plan) if !emulator.is_empty() => plan.pin_all_to(&emulator),
        Some(plan) => plan.pin_threads(placement.vcpu_pins()),
    };
    let iothreadpin = iothreadpin
        .into_iter()
        .map(|pin| IoThreadPin { iothread: pin.id, cpuset: pin.cpus })
        .collect::<Vec<_>>();
    debug!(conv.log, "pinned iothreads"; "count" => iothreadpin.len());

    domain.cputune = Some(CpuTune {
        vcpupin,
        emulatorpin: (!emulator.is_empty())
            .then(|| EmulatorPin { cpuset: emulator }),
        iothreadpin,
    });
}

#[cfg(test)]
mod test {
    use super::super::test_support::*;
    use super::super::convert;
    use super::*;
    use crate::arch::Arch;
    use crate::context::{NumaCell, NumaTopology};
    use crate::error::ConvertError;
    use domforge_api_types::devices::Disk;
    use domforge_api_types::volumes::{HostDisk, Volume, VolumeSource};
    use domforge_api_types::{Cpu as SpecCpu, CpuFeature as SpecFeature};
    use domforge_api_types::{IoThreadsPolicy, VmSpec};
    use domforge_types::{CpuSet, YesNo};

    fn dedicated_spec(cores: u32, isolate: bool) -> VmSpec {
        let mut spec = spec();
        spec.domain.cpu = Some(SpecCpu {
            cores: Some(cores),
            dedicated_cpu_placement: true,
            isolate_emulator_thread: isolate,
            ..Default::default()
        });
        spec
    }

    fn set(s: &str) -> CpuSet {
        s.parse().unwrap()
    }

    #[test]
    fn default_mode_per_arch() {
        let spec = spec();
        let amd = convert(&spec, &context(Arch::Amd64), &logger()).unwrap();
        assert_eq!(amd.cpu.mode, "host-model");
        assert_eq!(
            amd.cpu.features,
            vec![CpuFeature { name: "mpx".into(), policy: "disable".into() }]
        );

        let arm = convert(&spec, &context(Arch::Arm64), &logger()).unwrap();
        assert_eq!(arm.cpu.mode, "host-passthrough");
        assert!(arm.cpu.features.is_empty());
    }

    #[test]
    fn named_model_is_custom() {
        let mut spec = spec();
        spec.domain.cpu = Some(SpecCpu {
            model: Some("Conroe".into()),
            features: vec![
                SpecFeature { name: "pcid".into(), policy: None },
                SpecFeature {
                    name: "monitor".into(),
                    policy: Some("disable".into()),
                },
            ],
            ..Default::default()
        });
        let domain =
            convert(&spec, &context(Arch::Amd64), &logger()).unwrap();
        assert_eq!(domain.cpu.mode, "custom");
        assert_eq!(domain.cpu.model.as_deref(), Some("Conroe"));
        assert_eq!(
            domain.cpu.features,
            vec![
                CpuFeature { name: "pcid".into(), policy: "require".into() },
                CpuFeature {
                    name: "monitor".into(),
                    policy: "disable".into()
                },
            ]
        );
    }

    #[test]
    fn hotplug_vcpu_list() {
        let mut spec = spec();
        spec.domain.cpu = Some(SpecCpu {
            cores: Some(2),
            sockets: Some(1),
            max_sockets: Some(3),
            ..Default::default()
        });
        let domain =
            convert(&spec, &context(Arch::Amd64), &logger()).unwrap();
        assert_eq!(domain.vcpu.cpus, 6);
        assert_eq!(domain.vcpu.current, Some(2));
        assert_eq!(domain.cpu.topology.sockets, 3);
        assert_eq!(domain.vcpus.len(), 6);
        assert_eq!(domain.vcpus[1].enabled, YesNo::Yes);
        assert_eq!(domain.vcpus[1].hotpluggable, YesNo::No);
        assert_eq!(domain.vcpus[2].enabled, YesNo::No);
        assert_eq!(domain.vcpus[2].hotpluggable, YesNo::Yes);
    }

    #[test]
    fn no_pinning_without_dedicated_placement() {
        let spec = spec();
        let domain =
            convert(&spec, &context(Arch::Amd64), &logger()).unwrap();
        assert_eq!(domain.cputune, None);
    }

    #[test]
    fn vcpus_follow_numa_order() {
        let spec = dedicated_spec(2, false);
        let mut ctx = context(Arch::Amd64);
        ctx.cpu_set = set("0-3");
        ctx.numa = Some(NumaTopology {
            cells: vec![NumaCell { id: 0, cpus: vec![3, 2] }],
        });
        let domain = convert(&spec, &ctx, &logger()).unwrap();
        let tune = domain.cputune.unwrap();
        assert_eq!(
            tune.vcpupin,
            vec![
                VcpuPin { vcpu: 0, cpuset: set("3") },
                VcpuPin { vcpu: 1, cpuset: set("2") },
            ]
        );
        assert_eq!(tune.emulatorpin, None);
    }

    #[test]
    fn emulator_thread_isolation() {
        let spec = dedicated_spec(2, true);
        let mut ctx = context(Arch::Amd64);
        ctx.cpu_set = set("0-3");
        let domain = convert(&spec, &ctx, &logger()).unwrap();
        let tune = domain.cputune.unwrap();
        assert_eq!(tune.emulatorpin, Some(EmulatorPin { cpuset: set("2") }));
    }

    #[test]
    fn emulator_thread_even_parity() {
        let mut spec = dedicated_spec(2, true);
        spec.annotations.insert(
            EMULATOR_THREAD_EVEN_PARITY_ANNOTATION.into(),
            String::new(),
        );
        let mut ctx = context(Arch::Amd64);
        ctx.cpu_set = set("0-3");
        let domain = convert(&spec, &ctx, &logger()).unwrap();
        let tune = domain.cputune.unwrap();
        assert_eq!(tune.emulatorpin, Some(EmulatorPin { cpuset: set("2,3") }));

        ctx.cpu_set = set("0-2");
        let err = convert(&spec, &ctx, &logger()).unwrap_err();
        assert!(matches!(err, ConvertError::NoSecondEmulatorThreadCpu));
    }

    #[test]
    fn too_few_host_cpus() {
        let spec = dedicated_spec(4, false);
        let mut ctx = context(Arch::Amd64);
        ctx.cpu_set = set("0-2");
        let err = convert(&spec, &ctx, &logger()).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::InsufficientCpus { vcpus: 4, available: 3 }
        ));
    }

    fn with_shared_io_thread(mut spec: VmSpec) -> VmSpec {
        spec.domain.io_threads_policy = Some(IoThreadsPolicy::Shared);
        spec.domain.devices.disks.push(Disk {
            name: "disk0".into(),
            device: None,
            boot_order: None,
            serial: None,
            dedicated_io_thread: None,
            cache: None,
            io: None,
            error_policy: None,
            block_size: None,
            shareable: None,
        });
        spec.volumes.push(Volume {
            name: "disk0".into(),
            source: VolumeSource::HostDisk(HostDisk {
                path: "/var/run/disk0.img".into(),
                capacity: None,
                shared: None,
            }),
        });
        spec
    }

    #[test]
    fn iothreads_pinned_to_vcpu_cpus() {
        let spec = with_shared_io_thread(dedicated_spec(2, false));
        let mut ctx = context(Arch::Amd64);
        ctx.cpu_set = set("4-7");
        let domain = convert(&spec, &ctx, &logger()).unwrap();
        assert_eq!(domain.iothreads, Some(1));
        let tune = domain.cputune.unwrap();
        assert_eq!(
            tune.iothreadpin,
            vec![IoThreadPin { iothread: 1, cpuset: set("4,5") }]
        );
    }

    #[test]
    fn iothreads_follow_emulator_thread() {
        let spec = with_shared_io_thread(dedicated_spec(2, true));
        let mut ctx = context(Arch::Amd64);
        ctx.cpu_set = set("4-7");
        let domain = convert(&spec, &ctx, &logger()).unwrap();
        let tune = domain.cputune.unwrap();
        assert_eq!(
            tune.iothreadpin,
            vec![IoThreadPin { iothread: 1, cpuset: set("6") }]
        );
    }
}
