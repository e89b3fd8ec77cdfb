// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flat PCI placement on the root complex.
//!
//! By default the hypervisor picks addresses for devices that don't carry
//! one. Some guests need their devices on bus 0 instead, where slots are
//! handed out here in device order.

use std::collections::BTreeSet;

use domforge_api_types::devices::DiskBus;
use domforge_types::{PciAddress, PCI_SLOTS_PER_BUS};

use crate::descriptor::devices::Controller;
use crate::descriptor::{Address, DomainDescriptor};
use crate::error::{ConvertError, Result};

/// Slots 0 and 1 belong to the host bridge and the chipset.
const FIRST_FREE_SLOT: u8 = 0x02;

struct SlotAllocator {
    used: BTreeSet<u8>,
    next: u8,
}

impl SlotAllocator {
    fn next_address(&mut self) -> Result<Address> {
        while self.used.contains(&self.next) {
            self.next += 1;
        }
        if self.next >= PCI_SLOTS_PER_BUS {
            return Err(ConvertError::PciSlotsExhausted);
        }
        let slot = self.next;
        self.used.insert(slot);
        PciAddress::new(0, 0, slot, 0)
            .map(Address::Pci)
            .map_err(|_| ConvertError::PciSlotsExhausted)
    }
}

/// Whether a controller is a PCI function of its own. The PCI root is the
/// bus itself and a `none` model is never instantiated.
fn controller_on_pci(controller: &Controller) -> bool {
    controller.kind != "pci" && controller.model != Some("none")
}

/// Gives every PCI device that has no address of its own a distinct slot on
/// bus 0, skipping slots taken by explicitly addressed devices.
///
/// Virtio disks come first, then interfaces, controllers, the RNG, the
/// memory balloon, and the VSOCK device. Disks on other buses stay on their
/// controller, and host devices keep whatever address they were given.
pub fn place_pci_devices_on_root_complex(
    domain: &mut DomainDescriptor,
) -> Result<()> {
    let devices = &mut domain.devices;

    let balloon = devices.memballoon.as_mut().filter(|b| b.model != "none");
    let mut addresses: Vec<&mut Option<Address>> = devices
        .disks
        .iter_mut()
        .filter(|d| d.target.bus == DiskBus::Virtio)
        .map(|d| &mut d.address)
        .chain(devices.interfaces.iter_mut().map(|i| &mut i.address))
        .chain(
            devices
                .controllers
                .iter_mut()
                .filter(|c| controller_on_pci(c))
                .map(|c| &mut c.address),
        )
        .chain(devices.rng.as_mut().map(|r| &mut r.address))
        .chain(balloon.map(|b| &mut b.address))
        .chain(devices.vsock.as_mut().map(|v| &mut v.address))
        .collect();

    let used = addresses
        .iter()
        .map(|a| **a)
        .chain(devices.host_devices.iter().map(|h| h.address))
        .flatten()
        .filter_map(|addr| addr.pci())
        .filter(|pci| pci.domain() == 0 && pci.bus() == 0)
        .map(|pci| pci.slot())
        .collect();
    let mut slots = SlotAllocator { used, next: FIRST_FREE_SLOT };

    for address in addresses.iter_mut().filter(|a| a.is_none()) {
        **address = Some(slots.next_address()?);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arch::Arch;
    use crate::convert;
    use crate::convert::test_support::*;
    use domforge_api_types::devices::{
        Disk, DiskDevice, DiskTarget, Interface, InterfaceBinding,
        Rng as SpecRng,
    };
    use domforge_api_types::volumes::{
        HostDisk, Network, NetworkSource, Volume, VolumeSource,
    };
    use domforge_api_types::VmSpec;

    fn slot(addr: Option<Address>) -> u8 {
        addr.and_then(|a| a.pci()).unwrap().slot()
    }

    fn disk(name: &str, bus: DiskBus) -> Disk {
        Disk {
            name: name.into(),
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
        }
    }

    fn with_devices(disks: usize, ifaces: usize) -> VmSpec {
        let mut spec = spec();
        for i in 0..disks {
            let name = format!("disk{i}");
            spec.volumes.push(Volume {
                name: name.clone(),
                source: VolumeSource::HostDisk(HostDisk {
                    path: format!("/var/run/{name}.img"),
                    capacity: None,
                    shared: None,
                }),
            });
            spec.domain.devices.disks.push(disk(&name, DiskBus::Virtio));
        }
        for i in 0..ifaces {
            let name = format!("net{i}");
            spec.networks.push(Network {
                name: name.clone(),
                source: NetworkSource::Pod,
            });
            spec.domain.devices.interfaces.push(Interface {
                name,
                binding: InterfaceBinding::Bridge,
                model: None,
                mac_address: None,
                boot_order: None,
                pci_address: None,
                state: None,
            });
        }
        spec
    }

    fn run(spec: &VmSpec) -> DomainDescriptor {
        convert(spec, &context(Arch::Amd64), &logger()).unwrap()
    }

    #[test]
    fn sequential_slots() {
        let mut domain = run(&with_devices(2, 2));
        place_pci_devices_on_root_complex(&mut domain).unwrap();
        let disks = &domain.devices.disks;
        let ifaces = &domain.devices.interfaces;
        assert_eq!(slot(disks[0].address), 0x02);
        assert_eq!(slot(disks[1].address), 0x03);
        assert_eq!(slot(ifaces[0].address), 0x04);
        assert_eq!(slot(ifaces[1].address), 0x05);
    }

    #[test]
    fn explicit_addresses_are_kept_and_skipped() {
        let mut domain = run(&with_devices(2, 1));
        let taken = Address::Pci(PciAddress::new(0, 0, 0x02, 0).unwrap());
        let elsewhere =
            Address::Pci(PciAddress::new(0, 0x81, 0x03, 0).unwrap());
        domain.devices.disks[1].address = Some(taken);
        domain.devices.interfaces[0].address = Some(elsewhere);

        place_pci_devices_on_root_complex(&mut domain).unwrap();
        assert_eq!(slot(domain.devices.disks[0].address), 0x03);
        assert_eq!(domain.devices.disks[1].address, Some(taken));
        assert_eq!(domain.devices.interfaces[0].address, Some(elsewhere));
    }

    #[test]
    fn non_virtio_disks_stay_on_their_controller() {
        let mut sata = with_devices(1, 0);
        sata.domain.devices.disks = vec![disk("disk0", DiskBus::Sata)];
        let mut domain = run(&sata);
        place_pci_devices_on_root_complex(&mut domain).unwrap();
        assert_eq!(domain.devices.disks[0].address, None);
    }

    #[test]
    fn other_virtio_devices_follow_disks_and_interfaces() {
        let mut spec = with_devices(1, 1);
        spec.domain.devices.rng = Some(SpecRng {});
        spec.domain.devices.autoattach_vsock = Some(true);
        spec.status.vsock_cid = Some(3);
        let mut domain = run(&spec);
        place_pci_devices_on_root_complex(&mut domain).unwrap();
        let devices = &domain.devices;

        assert_eq!(slot(devices.disks[0].address), 0x02);
        assert_eq!(slot(devices.interfaces[0].address), 0x03);

        let mut placed = vec![];
        for c in &devices.controllers {
            if c.kind == "pci" || c.model == Some("none") {
                assert_eq!(c.address, None, "{} controller", c.kind);
            } else {
                placed.push(slot(c.address));
            }
        }
        assert!(!placed.is_empty());
        placed.push(slot(devices.rng.as_ref().unwrap().address));
        placed.push(slot(devices.memballoon.as_ref().unwrap().address));
        placed.push(slot(devices.vsock.as_ref().unwrap().address));

        let expected: Vec<u8> = (0x04..).take(placed.len()).collect();
        assert_eq!(placed, expected);
    }

    #[test]
    fn explicit_rng_address_is_skipped() {
        let mut spec = with_devices(1, 0);
        spec.domain.devices.rng = Some(SpecRng {});
        spec.domain.devices.autoattach_memballoon = Some(false);
        let mut domain = run(&spec);
        let taken = Address::Pci(PciAddress::new(0, 0, 0x02, 0).unwrap());
        domain.devices.rng.as_mut().unwrap().address = Some(taken);

        place_pci_devices_on_root_complex(&mut domain).unwrap();
        assert_eq!(slot(domain.devices.disks[0].address), 0x03);
        assert_eq!(domain.devices.rng.unwrap().address, Some(taken));
        let balloon = domain.devices.memballoon.unwrap();
        assert_eq!(balloon.model, "none");
        assert_eq!(balloon.address, None);
    }

    #[test]
    fn slots_run_out() {
        let mut domain = run(&with_devices(30, 1));
        assert!(matches!(
            place_pci_devices_on_root_complex(&mut domain),
            Err(ConvertError::PciSlotsExhausted)
        ));
    }
}
