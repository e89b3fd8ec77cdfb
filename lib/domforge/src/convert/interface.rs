// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Network interfaces and SR-IOV host devices.

use slog::{debug, info};

use domforge_api_types::devices::{InterfaceBinding, LinkState};
use domforge_types::YesNo;

use super::{Conversion, DomainBuilder};
use crate::context::DomainAttachment;
use crate::descriptor::devices::{
    Interface, InterfaceDriver, InterfaceTarget, Rom,
};
use crate::descriptor::{Address, Alias};
use crate::error::{ConvertError, Result};
use crate::topology::CpuTopology;

/// Most queues a tap device can be opened with.
pub(crate) const MULTI_QUEUE_MAX_QUEUES: u32 = 256;

const VIRTIO: &str = "virtio";

pub(super) fn convert_interfaces(
    conv: &Conversion<'_>,
    topology: &CpuTopology,
    builder: &mut DomainBuilder,
) -> Result<()> {
    let multi_queue =
        conv.devices().network_interface_multiqueue.unwrap_or(false);
    let mut taps = 0;

    for iface in &conv.devices().interfaces {
        if conv.spec.network(&iface.name).is_none() {
            return Err(ConvertError::NetworkNotFound(iface.name.clone()));
        }

        let managed = match &iface.binding {
            InterfaceBinding::Sriov => {
                debug!(conv.log, "sriov interface left to host devices";
                    "interface" => &iface.name);
                continue;
            }
            InterfaceBinding::Bridge | InterfaceBinding::Masquerade => None,
            InterfaceBinding::Plugin { name } => {
                match conv.ctx.interface_attachments.get(&iface.name) {
                    None | Some(DomainAttachment::Tap) => None,
                    Some(DomainAttachment::ManagedTap) => Some(YesNo::No),
                    Some(DomainAttachment::Other(kind)) => {
                        info!(conv.log, "binding plugin attaches interface";
                            "interface" => &iface.name,
                            "plugin" => name,
                            "attachment" => kind);
                        continue;
                    }
                }
            }
        };

        let model = iface.model.as_deref().unwrap_or(VIRTIO);
        let virtio = model == VIRTIO;
        let driver = virtio.then(|| InterfaceDriver {
            name: Some("vhost"),
            queues: multi_queue
                .then(|| topology.vcpus().min(MULTI_QUEUE_MAX_QUEUES)),
            iommu: conv.virtio_iommu(),
        });
        let rom_disabled =
            iface.boot_order.is_none() || conv.launch_security.is_some();

        let dev = format!("tap{taps}");
        taps += 1;

        builder.add_interface(Interface {
            kind: "ethernet",
            target: Some(InterfaceTarget { dev, managed }),
            model: if virtio {
                conv.virtio_model().to_owned()
            } else {
                model.to_owned()
            },
            mac: iface.mac_address.clone(),
            boot_order: iface.boot_order,
            rom: rom_disabled.then_some(Rom { enabled: YesNo::No }),
            driver,
            link_state: (iface.state == Some(LinkState::Down))
                .then_some("down"),
            address: iface.pci_address.map(Address::Pci),
            alias: Alias::user(&iface.name),
        })?;
    }

    for dev in &conv.ctx.host_devices {
        builder.add_host_device(dev.clone())?;
    }
    Ok(())
}
