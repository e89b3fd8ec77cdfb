// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A builder for domain descriptors.

use std::collections::BTreeSet;

use domforge_types::PciAddress;

use crate::descriptor::devices::{
    Controller, Disk, Input, Interface, Sound, Watchdog,
};
use crate::descriptor::{Address, Alias, DomainDescriptor, HostDevice};
use crate::error::{ConvertError, Result};

/// Accumulates devices into a descriptor while keeping aliases and guest PCI
/// addresses unique.
#[derive(Debug, Default)]
pub(crate) struct DomainBuilder {
    descriptor: DomainDescriptor,
    aliases: BTreeSet<Alias>,
    pci_addresses: BTreeSet<PciAddress>,
}

impl DomainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access for elements that carry no alias or address.
    pub fn descriptor_mut(&mut self) -> &mut DomainDescriptor {
        &mut self.descriptor
    }

    /// Adds a guest PCI address to this builder's record of occupied
    /// addresses. Non-PCI addresses are ignored.
    fn register_address(&mut self, address: Option<&Address>) -> Result<()> {
        let Some(pci) = address.and_then(Address::pci) else {
            return Ok(());
        };
        if self.pci_addresses.contains(&pci) {
            Err(ConvertError::PciAddressInUse(pci))
        } else {
            self.pci_addresses.insert(pci);
            Ok(())
        }
    }

    /// Records the alias and address of a device about to be added. Nothing
    /// is recorded if either is already in use.
    fn register(
        &mut self,
        alias: Option<&Alias>,
        address: Option<&Address>,
    ) -> Result<()> {
        if let Some(alias) = alias.filter(|a| self.aliases.contains(*a)) {
            return Err(ConvertError::AliasInUse(alias.as_str().to_owned()));
        }
        self.register_address(address)?;
        self.aliases.extend(alias.cloned());
        Ok(())
    }

    pub fn add_disk(&mut self, disk: Disk) -> Result<&mut Self> {
        self.register(Some(&disk.alias), disk.address.as_ref())?;
        self.descriptor.devices.disks.push(disk);
        Ok(self)
    }

    pub fn add_interface(&mut self, iface: Interface) -> Result<&mut Self> {
        self.register(Some(&iface.alias), iface.address.as_ref())?;
        self.descriptor.devices.interfaces.push(iface);
        Ok(self)
    }

    pub fn add_host_device(&mut self, dev: HostDevice) -> Result<&mut Self> {
        self.register(Some(&dev.alias), dev.address.as_ref())?;
        self.descriptor.devices.host_devices.push(dev);
        Ok(self)
    }

    pub fn add_controller(
        &mut self,
        controller: Controller,
    ) -> Result<&mut Self> {
        self.register(controller.alias.as_ref(), None)?;
        self.descriptor.devices.controllers.push(controller);
        Ok(self)
    }

    pub fn add_input(&mut self, input: Input) -> Result<&mut Self> {
        self.register(Some(&input.alias), None)?;
        self.descriptor.devices.inputs.push(input);
        Ok(self)
    }

    pub fn set_watchdog(&mut self, watchdog: Watchdog) -> Result<&mut Self> {
        self.register(Some(&watchdog.alias), None)?;
        self.descriptor.devices.watchdog = Some(watchdog);
        Ok(self)
    }

    pub fn set_sound(&mut self, sound: Sound) -> Result<&mut Self> {
        self.register(Some(&sound.alias), None)?;
        self.descriptor.devices.sound = Some(sound);
        Ok(self)
    }

    pub fn finish(self) -> DomainDescriptor {
        self.descriptor
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::descriptor::devices::{
        DiskDeviceKind, DiskDriver, DiskSource, DiskTarget, DiskType,
    };
    use domforge_api_types::devices::DiskBus;

    fn disk(alias: &str, address: Option<Address>) -> Disk {
        Disk {
            kind: DiskType::File,
            device: DiskDeviceKind::Disk,
            model: None,
            driver: DiskDriver::default(),
            source: DiskSource::default(),
            target: DiskTarget { bus: DiskBus::Virtio, dev: "vda".into() },
            backing_store: None,
            serial: None,
            boot_order: None,
            readonly: None,
            shareable: None,
            block_io: None,
            capacity: None,
            address,
            alias: Alias::user(alias),
        }
    }

    #[test]
    fn duplicate_alias() {
        let mut builder = DomainBuilder::new();
        builder.add_disk(disk("a", None)).unwrap();
        let err = builder.add_disk(disk("a", None)).unwrap_err();
        assert_eq!(err.to_string(), "a device with alias ua-a already exists");
        assert_eq!(builder.finish().devices.disks.len(), 1);
    }

    #[test]
    fn duplicate_pci_address() {
        let addr = Address::Pci("0000:00:05.0".parse().unwrap());
        let mut builder = DomainBuilder::new();
        builder.add_disk(disk("a", Some(addr))).unwrap();
        assert!(matches!(
            builder.add_disk(disk("b", Some(addr))),
            Err(ConvertError::PciAddressInUse(_))
        ));

        // A rejected device must not leave its alias behind.
        builder.add_disk(disk("b", None)).unwrap();
        assert_eq!(builder.finish().devices.disks.len(), 2);
    }
}
