// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The conversion pipeline.
//!
//! Stages run in a fixed order and each one receives what earlier stages
//! produced as explicit arguments: the CPU topology feeds placement, memory,
//! disks, interfaces and controllers; the IOThread plan made for the disks
//! feeds CPU tuning and the SCSI controller. The first hard error aborts the
//! conversion and nothing built so far is returned.

use slog::{debug, info, o, Logger};

use domforge_api_types::devices::Devices;
use domforge_api_types::VmSpec;
use domforge_types::OnOff;

use crate::arch::{Arch, LaunchSecuritySupport};
use crate::context::ConversionContext;
use crate::descriptor::{DomainDescriptor, DomainType};
use crate::error::{ConvertError, Result};

mod builder;
mod clock;
mod controller;
mod cpu;
mod devices;
mod disk;
mod features;
mod firmware;
mod interface;
mod launch_security;
mod memory;

pub(crate) use builder::DomainBuilder;
pub use launch_security::SevPolicy;

/// Inputs shared by every stage of one conversion.
pub(crate) struct Conversion<'a> {
    pub spec: &'a VmSpec,
    pub ctx: &'a ConversionContext,
    pub log: Logger,

    /// The launch-security mode in effect, already checked against the
    /// architecture.
    pub launch_security: Option<LaunchSecuritySupport>,
}

impl<'a> Conversion<'a> {
    pub fn new(
        spec: &'a VmSpec,
        ctx: &'a ConversionContext,
        log: &Logger,
    ) -> Result<Self> {
        let launch_security = match &spec.domain.launch_security {
            None => None,
            Some(requested) => Some(
                ctx.arch.launch_security(requested).ok_or(
                    ConvertError::LaunchSecurityNotSupported {
                        mode: launch_security::mode_name(requested),
                        arch: ctx.arch,
                    },
                )?,
            ),
        };
        let log = log.new(o!(
            "vm" => format!("{}/{}", spec.namespace, spec.name),
            "arch" => ctx.arch.to_string(),
        ));
        Ok(Self { spec, ctx, log, launch_security })
    }

    pub fn arch(&self) -> Arch {
        self.ctx.arch
    }

    pub fn devices(&self) -> &'a Devices {
        &self.spec.domain.devices
    }

    pub fn virtio_model(&self) -> &'static str {
        let transitional =
            self.devices().use_virtio_transitional.unwrap_or(false);
        self.arch().virtio_model(transitional)
    }

    /// Virtio devices must go through the IOMMU whenever guest memory is
    /// protected.
    pub fn virtio_iommu(&self) -> Option<OnOff> {
        self.launch_security.map(|_| OnOff::On)
    }

    /// The domain name, unique per namespace.
    pub fn domain_name(&self) -> String {
        format!("{}_{}", self.spec.namespace, self.spec.name)
    }
}

fn domain_type(ctx: &ConversionContext) -> Result<DomainType> {
    if ctx.kvm_available {
        Ok(DomainType::Kvm)
    } else if ctx.allow_emulation {
        Ok(DomainType::Qemu)
    } else {
        Err(ConvertError::EmulationNotAllowed)
    }
}

/// Converts `spec` into a domain descriptor for the host described by `ctx`.
pub fn convert(
    spec: &VmSpec,
    ctx: &ConversionContext,
    log: &Logger,
) -> Result<DomainDescriptor> {
    let conv = Conversion::new(spec, ctx, log)?;
    let mut builder = DomainBuilder::new();

    let kind = domain_type(ctx)?;
    if kind == DomainType::Qemu {
        info!(conv.log, "hardware virtualization unavailable, using emulation");
    }
    {
        let domain = builder.descriptor_mut();
        domain.kind = kind;
        domain.name = conv.domain_name();
        domain.uuid = spec.domain.firmware.as_ref().and_then(|f| f.uuid);
    }

    let topology = cpu::resolve_topology(&conv)?;
    cpu::convert_cpu(&conv, &topology, &mut builder);

    let placement = cpu::place_vcpus(&conv, &topology)?;

    memory::convert_memory(&conv, &mut builder)?;

    let io_threads = disk::plan_io_threads(&conv, &topology)?;
    disk::convert_disks(&conv, &topology, io_threads.as_ref(), &mut builder)?;
    cpu::convert_cpu_tune(
        &conv,
        placement.as_ref(),
        io_threads.as_ref(),
        &mut builder,
    );

    interface::convert_interfaces(&conv, &topology, &mut builder)?;

    controller::convert_controllers(
        &conv,
        &topology,
        io_threads.is_some(),
        &mut builder,
    )?;

    firmware::convert_firmware(&conv, &mut builder)?;

    devices::convert_devices(&conv, &mut builder)?;
    features::convert_features(&conv, &mut builder);

    launch_security::convert_launch_security(&conv, &mut builder);

    clock::convert_clock(&conv, &mut builder);

    let domain = builder.finish();
    debug!(conv.log, "conversion finished";
        "disks" => domain.devices.disks.len(),
        "interfaces" => domain.devices.interfaces.len(),
        "vcpus" => domain.vcpu.cpus,
    );
    Ok(domain)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use slog::Logger;

    use domforge_api_types::{
        Cpu, DomainSpec, ResourceList, ResourceRequirements, VmSpec,
    };

    use crate::arch::Arch;
    use crate::context::ConversionContext;
    use crate::direct_io::MockDirectIoChecker;

    pub fn logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    /// A checker reporting direct I/O support as `supported` for every path.
    pub fn checker(supported: bool) -> MockDirectIoChecker {
        let mut mock = MockDirectIoChecker::new();
        mock.expect_check_file().returning(move |_| Ok(supported));
        mock.expect_check_block_device().returning(move |_| Ok(supported));
        mock
    }

    pub fn context(arch: Arch) -> ConversionContext {
        ConversionContext::new(arch, Arc::new(checker(true)))
    }

    pub fn spec() -> VmSpec {
        VmSpec {
            name: "testvmi".into(),
            namespace: "mynamespace".into(),
            uid: "f4686d2c-6e8d-4335-b8fd-81bee22f4814".into(),
            domain: DomainSpec {
                resources: ResourceRequirements {
                    requests: ResourceList {
                        cpu: None,
                        memory: Some("8192Ki".parse().unwrap()),
                    },
                    ..Default::default()
                },
                cpu: Some(Cpu {
                    cores: Some(1),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
