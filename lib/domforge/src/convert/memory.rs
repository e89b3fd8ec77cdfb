// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Guest memory sizing, backing, and hotplug.

use slog::{debug, warn};

use domforge_api_types::Quantity;

use super::{Conversion, DomainBuilder};
use crate::descriptor::devices::{MemoryDevice, MemoryTarget};
use crate::descriptor::{ByteSize, Hugepages, MemoryBacking, MemorySource};
use crate::error::{ConvertError, Result};

/// Granularity in which virtio-mem plugs memory into the guest.
const VIRTIO_MEM_BLOCK_SIZE: u64 = 2 << 20;

fn bytes(field: &str, quantity: &Quantity) -> Result<u64> {
    quantity.to_bytes().map_err(|e| ConvertError::quantity(field, e))
}

/// The memory the guest sees at boot: the explicit guest size, else the
/// memory request, else the memory limit.
fn guest_memory(conv: &Conversion<'_>) -> Result<u64> {
    let memory = conv.spec.domain.memory.as_ref();
    let resources = &conv.spec.domain.resources;
    if let Some(guest) = memory.and_then(|m| m.guest.as_ref()) {
        bytes("guest memory", guest)
    } else if let Some(request) = resources.requests.memory.as_ref() {
        bytes("memory request", request)
    } else if let Some(limit) = resources.limits.memory.as_ref() {
        bytes("memory limit", limit)
    } else {
        Err(ConvertError::GuestMemoryMissing)
    }
}

pub(super) fn convert_memory(
    conv: &Conversion<'_>,
    builder: &mut DomainBuilder,
) -> Result<()> {
    let guest = guest_memory(conv)?;
    let memory = conv.spec.domain.memory.as_ref();

    let hugepages = memory
        .and_then(|m| m.hugepages.as_ref())
        .map(|h| bytes("hugepage size", &h.page_size))
        .transpose()?;

    let max_guest = memory
        .and_then(|m| m.max_guest.as_ref())
        .map(|q| bytes("maximum guest memory", q))
        .transpose()?
        .filter(|max| *max > guest);
    let max_guest = match max_guest {
        Some(_) if !conv.arch().supports_memory_hotplug() => {
            warn!(conv.log, "memory hotplug unsupported, ignoring max guest");
            None
        }
        other => other,
    };

    let domain = builder.descriptor_mut();
    domain.memory = ByteSize::bytes(guest);
    if let Some(page_size) = hugepages {
        domain.memory_backing = Some(MemoryBacking {
            hugepages: Some(Hugepages {
                page_size: ByteSize::bytes(page_size),
            }),
            source: Some(MemorySource { kind: "memfd" }),
        });
    }
    if let Some(max) = max_guest {
        domain.max_memory = Some(ByteSize::bytes(max));
        domain.devices.memory.push(MemoryDevice {
            model: "virtio-mem",
            target: MemoryTarget {
                size: ByteSize::bytes(max - guest),
                node: 0,
                block: ByteSize::bytes(VIRTIO_MEM_BLOCK_SIZE),
                requested: ByteSize::bytes(0),
            },
        });
    }
    debug!(conv.log, "sized guest memory";
        "bytes" => guest, "max_bytes" => ?max_guest);
    Ok(())
}
