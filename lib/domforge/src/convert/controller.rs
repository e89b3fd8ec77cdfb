// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bus controllers.

use slog::debug;

use domforge_api_types::devices::{DiskBus, InputBus};
use domforge_api_types::DISABLE_PCI_HOLE64_ANNOTATION;

use super::disk::disk_bus;
use super::{Conversion, DomainBuilder};
use crate::descriptor::devices::{Controller, ControllerDriver, PciHole64};
use crate::error::Result;
use crate::topology::CpuTopology;

/// Whether anything in the guest sits on a USB bus.
fn needs_usb(conv: &Conversion<'_>) -> bool {
    let devices = conv.devices();
    let usb_disk = devices
        .disks
        .iter()
        .any(|d| disk_bus(d, conv.arch()) == DiskBus::Usb);
    let usb_input = devices
        .inputs
        .iter()
        .any(|i| i.bus.unwrap_or(InputBus::Usb) == InputBus::Usb);
    let default_usb_input = devices.autoattach_graphics_device.unwrap_or(true)
        && conv
            .arch()
            .default_inputs()
            .iter()
            .any(|(_, bus)| *bus == InputBus::Usb);
    usb_disk
        || usb_input
        || default_usb_input
        || devices.client_passthrough.is_some()
}

fn controller(kind: &'static str, model: &'static str) -> Controller {
    Controller {
        kind,
        index: 0,
        model: Some(model),
        driver: None,
        pcihole64: None,
        address: None,
        alias: None,
    }
}

pub(super) fn convert_controllers(
    conv: &Conversion<'_>,
    topology: &CpuTopology,
    uses_io_threads: bool,
    builder: &mut DomainBuilder,
) -> Result<()> {
    let arch = conv.arch();
    let devices = conv.devices();
    let transitional = devices.use_virtio_transitional.unwrap_or(false);

    let usb_model = if needs_usb(conv) && arch.supports_usb_controller() {
        arch.usb_redirect_controller_model()
    } else {
        "none"
    };
    builder.add_controller(controller("usb", usb_model))?;

    let scsi_disk = devices
        .disks
        .iter()
        .any(|d| disk_bus(d, arch) == DiskBus::Scsi);
    if scsi_disk || !devices.disable_hotplug {
        let iommu = conv.virtio_iommu();
        let driver = if uses_io_threads {
            Some(ControllerDriver {
                iothread: Some(1),
                queues: Some(topology.vcpus()),
                iommu,
            })
        } else {
            iommu.map(|iommu| ControllerDriver {
                iommu: Some(iommu),
                ..Default::default()
            })
        };
        builder.add_controller(Controller {
            driver,
            ..controller("scsi", arch.scsi_controller_model(transitional))
        })?;
    }

    builder.add_controller(controller("virtio-serial", conv.virtio_model()))?;

    let hole64_disabled =
        conv.spec.annotation(DISABLE_PCI_HOLE64_ANNOTATION) == Some("true");
    if hole64_disabled {
        if arch.supports_pci_hole64() {
            builder.add_controller(Controller {
                pcihole64: Some(PciHole64 { value: 0, unit: "KiB" }),
                ..controller("pci", "pcie-root")
            })?;
        } else {
            debug!(conv.log, "64-bit PCI hole not configurable, ignoring");
        }
    }

    debug!(conv.log, "added controllers";
        "usb" => usb_model, "scsi" => scsi_disk || !devices.disable_hotplug);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::super::convert;
    use super::super::test_support::*;
    use super::*;
    use crate::arch::Arch;
    use crate::descriptor::DomainDescriptor;
    use domforge_api_types::devices::{
        ClientPassthrough, Disk, DiskDevice, DiskTarget, Input, InputKind,
    };
    use domforge_api_types::volumes::{HostDisk, Volume, VolumeSource};
    use domforge_api_types::{IoThreadsPolicy, LaunchSecurity, Sev, VmSpec};
    use domforge_types::OnOff;

    fn find<'a>(domain: &'a DomainDescriptor, kind: &str) -> &'a Controller {
        domain
            .devices
            .controllers
            .iter()
            .find(|c| c.kind == kind)
            .unwrap()
    }

    fn has(domain: &DomainDescriptor, kind: &str) -> bool {
        domain.devices.controllers.iter().any(|c| c.kind == kind)
    }

    fn run(spec: &VmSpec, arch: Arch) -> DomainDescriptor {
        convert(spec, &context(arch), &logger()).unwrap()
    }

    fn with_disk(bus: DiskBus) -> VmSpec {
        let mut spec = spec();
        spec.domain.devices.disks.push(Disk {
            name: "mydisk".into(),
            device: Some(DiskDevice::Disk(DiskTarget {
                bus: Some(bus),
                ..Default::default()
            })),
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
            name: "mydisk".into(),
            source: VolumeSource::HostDisk(HostDisk {
                path: "/var/run/disk.img".into(),
                capacity: None,
                shared: None,
            }),
        });
        spec
    }

    #[test]
    fn default_set() {
        let domain = run(&spec(), Arch::Amd64);
        let kinds: Vec<&str> =
            domain.devices.controllers.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, ["usb", "scsi", "virtio-serial"]);
        assert_eq!(find(&domain, "usb").model, Some("none"));
        assert_eq!(
            find(&domain, "scsi").model,
            Some("virtio-non-transitional")
        );
        assert_eq!(find(&domain, "scsi").driver, None);
    }

    #[test]
    fn scsi_only_when_needed() {
        let mut no_hotplug = spec();
        no_hotplug.domain.devices.disable_hotplug = true;
        assert!(!has(&run(&no_hotplug, Arch::Amd64), "scsi"));

        let mut scsi = with_disk(DiskBus::Scsi);
        scsi.domain.devices.disable_hotplug = true;
        let domain = run(&scsi, Arch::S390x);
        assert_eq!(find(&domain, "scsi").model, Some("virtio-scsi"));
    }

    #[test]
    fn usb_controller_when_something_uses_it() {
        let domain = run(&with_disk(DiskBus::Usb), Arch::Amd64);
        assert_eq!(find(&domain, "usb").model, Some("qemu-xhci"));

        let mut tablet = spec();
        tablet.domain.devices.inputs.push(Input {
            name: "tablet0".into(),
            kind: InputKind::Tablet,
            bus: None,
        });
        let domain = run(&tablet, Arch::Amd64);
        assert_eq!(find(&domain, "usb").model, Some("qemu-xhci"));

        let mut redirect = spec();
        redirect.domain.devices.client_passthrough =
            Some(ClientPassthrough {});
        assert_eq!(
            find(&run(&redirect, Arch::Amd64), "usb").model,
            Some("qemu-xhci")
        );
        assert_eq!(
            find(&run(&redirect, Arch::S390x), "usb").model,
            Some("none")
        );
    }

    #[test]
    fn arm64_default_inputs_need_usb() {
        let mut spec = spec();
        let domain = run(&spec, Arch::Arm64);
        assert_eq!(find(&domain, "usb").model, Some("qemu-xhci"));

        spec.domain.devices.autoattach_graphics_device = Some(false);
        let domain = run(&spec, Arch::Arm64);
        assert_eq!(find(&domain, "usb").model, Some("none"));
    }

    #[test]
    fn scsi_driver_with_iothreads() {
        let mut spec = with_disk(DiskBus::Virtio);
        spec.domain.io_threads_policy = Some(IoThreadsPolicy::Shared);
        let domain = run(&spec, Arch::Amd64);
        assert_eq!(
            find(&domain, "scsi").driver,
            Some(ControllerDriver {
                iothread: Some(1),
                queues: Some(1),
                iommu: None,
            })
        );
    }

    #[test]
    fn scsi_driver_under_launch_security() {
        let mut spec = spec();
        spec.domain.launch_security = Some(LaunchSecurity::Sev(Sev::default()));
        let domain = run(&spec, Arch::Amd64);
        assert_eq!(
            find(&domain, "scsi").driver,
            Some(ControllerDriver {
                iommu: Some(OnOff::On),
                ..Default::default()
            })
        );
    }

    #[test]
    fn pci_hole64_opt_in() {
        let mut spec = spec();
        spec.annotations
            .insert(DISABLE_PCI_HOLE64_ANNOTATION.into(), "false".into());
        assert!(!has(&run(&spec, Arch::Amd64), "pci"));

        spec.annotations
            .insert(DISABLE_PCI_HOLE64_ANNOTATION.into(), "true".into());
        let domain = run(&spec, Arch::Amd64);
        let pci = find(&domain, "pci");
        assert_eq!(pci.model, Some("pcie-root"));
        assert_eq!(pci.pcihole64, Some(PciHole64 { value: 0, unit: "KiB" }));
        assert!(!has(&run(&spec, Arch::Arm64), "pci"));
    }
}
