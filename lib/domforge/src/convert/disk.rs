// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Disk conversion: target naming, volume sources, caching, and IOThread
//! assignment.

use std::io;
use std::path::Path;

use slog::{debug, warn, Logger};

use domforge_api_types::devices::{
    BlockSize, CacheMode, Disk, DiskBus, DiskDevice, IoMode,
};
use domforge_api_types::volumes::VolumeSource;
use domforge_api_types::Quantity;
use domforge_types::YesNo;

use super::{Conversion, DomainBuilder};
use crate::arch::Arch;
use crate::descriptor::devices::{
    self, BackingStore, BlockIo, CharSource, DiskDeviceKind, DiskDriver,
    DiskSource, DiskTarget, DiskType, Reservations,
};
use crate::descriptor::{Address, Alias, Present};
use crate::error::{ConvertError, Result};
use crate::iothreads::{DiskThreading, IoThreadAssignment, IoThreadPlan};
use crate::naming::DeviceNamer;
use crate::paths;
use crate::topology::CpuTopology;

/// The bus a disk sits on once defaults are applied.
pub(crate) fn disk_bus(disk: &Disk, arch: Arch) -> DiskBus {
    match &disk.device {
        None => DiskBus::Virtio,
        Some(DiskDevice::Disk(t)) => t.bus.unwrap_or(DiskBus::Virtio),
        Some(DiskDevice::Lun(t)) => t.bus.unwrap_or(DiskBus::Scsi),
        Some(DiskDevice::Cdrom(t)) => {
            t.bus.unwrap_or(arch.default_cdrom_bus())
        }
    }
}

pub(super) fn plan_io_threads(
    conv: &Conversion<'_>,
    topology: &CpuTopology,
) -> Result<Option<IoThreadPlan>> {
    let disks = conv
        .devices()
        .disks
        .iter()
        .map(|d| DiskThreading {
            virtio: disk_bus(d, conv.arch()) == DiskBus::Virtio,
            dedicated: d.dedicated_io_thread(),
        })
        .collect::<Vec<_>>();
    let domain = &conv.spec.domain;
    let plan = IoThreadPlan::plan(
        domain.io_threads_policy,
        domain
            .io_threads
            .as_ref()
            .and_then(|t| t.supplemental_pool_thread_count),
        &disks,
        topology.vcpus(),
        conv.ctx.auto_io_threads_cap,
    )?;
    if let Some(plan) = &plan {
        debug!(conv.log, "planned iothreads"; "count" => plan.count());
    }
    Ok(plan)
}

/// Where a disk's data comes from.
struct Source {
    kind: DiskType,
    path: String,
    format: &'static str,
    backing_store: Option<BackingStore>,
    capacity: Option<u64>,
    shareable: bool,
}

impl Source {
    fn file(path: String, format: &'static str) -> Self {
        Self {
            kind: DiskType::File,
            path,
            format,
            backing_store: None,
            capacity: None,
            shareable: false,
        }
    }

    fn block(path: String) -> Self {
        Self { kind: DiskType::Block, ..Self::file(path, "raw") }
    }

    fn raw_image(path: String, block: bool) -> Self {
        if block {
            Self::block(path)
        } else {
            Self::file(path, "raw")
        }
    }
}

fn bytes(field: &str, quantity: &Quantity) -> Result<u64> {
    quantity.to_bytes().map_err(|e| ConvertError::quantity(field, e))
}

/// The usable size of a claim: the smaller of what was requested and what
/// was provisioned.
fn claim_capacity(conv: &Conversion<'_>, volume: &str) -> Result<Option<u64>> {
    let Some(status) = conv.spec.status.volume(volume) else {
        return Ok(None);
    };
    let requests = status
        .requests
        .as_ref()
        .map(|q| bytes("volume request", q))
        .transpose()?;
    let capacity = status
        .capacity
        .as_ref()
        .map(|q| bytes("volume capacity", q))
        .transpose()?;
    Ok(match (requests, capacity) {
        (Some(r), Some(c)) => Some(r.min(c)),
        (r, c) => r.or(c),
    })
}

fn claim_source(
    conv: &Conversion<'_>,
    name: &str,
    hotpluggable: bool,
    block: bool,
) -> Source {
    let hotplug = hotpluggable || conv.ctx.is_hotplug_volume(name);
    let path = match (hotplug, block) {
        (true, true) => paths::hotplug_block_device(name),
        (true, false) => paths::hotplug_disk_image(name),
        (false, true) => paths::claim_block_device(name),
        (false, false) => paths::claim_disk_image(name),
    };
    Source::raw_image(path, block)
}

fn resolve_source(
    conv: &Conversion<'_>,
    volume_index: usize,
    name: &str,
    source: &VolumeSource,
) -> Result<Source> {
    let ctx = conv.ctx;
    let spec = conv.spec;
    let block = ctx.is_block_volume(name);
    let resolved = match source {
        VolumeSource::HostDisk(host) => Source {
            capacity: host
                .capacity
                .as_ref()
                .map(|q| bytes("host disk capacity", q))
                .transpose()?,
            shareable: host.shared.unwrap_or(false),
            ..Source::file(host.path.clone(), "raw")
        },
        VolumeSource::PersistentVolumeClaim(claim) => {
            claim_source(conv, name, claim.hotpluggable, block)
        }
        VolumeSource::DataVolume(dv) => {
            claim_source(conv, name, dv.hotpluggable, block)
        }
        VolumeSource::Ephemeral(_) => {
            let (kind, source) = if block {
                ("block", paths::claim_block_device(name))
            } else {
                ("file", paths::claim_disk_image(name))
            };
            Source {
                backing_store: Some(BackingStore {
                    kind,
                    format: "raw",
                    source,
                }),
                ..Source::file(paths::ephemeral_overlay(name), "qcow2")
            }
        }
        VolumeSource::ContainerDisk(_) => Source {
            backing_store: Some(BackingStore {
                kind: "file",
                format: "raw",
                source: paths::container_disk_image(volume_index),
            }),
            ..Source::file(paths::ephemeral_overlay(name), "qcow2")
        },
        VolumeSource::CloudInitNoCloud(_) => Source::file(
            paths::cloud_init_no_cloud_iso(&spec.namespace, &spec.name),
            "raw",
        ),
        VolumeSource::CloudInitConfigDrive(_) => Source::file(
            paths::cloud_init_config_drive_iso(&spec.namespace, &spec.name),
            "raw",
        ),
        VolumeSource::Secret(_) => {
            Source::file(paths::secret_disk_iso(name), "raw")
        }
        VolumeSource::ConfigMap(_) => {
            Source::file(paths::config_map_disk_iso(name), "raw")
        }
        VolumeSource::ServiceAccount(_) => {
            Source::file(paths::SERVICE_ACCOUNT_DISK.to_owned(), "raw")
        }
        VolumeSource::DownwardApi => {
            Source::file(paths::downward_api_disk_iso(name), "raw")
        }
        VolumeSource::Sysprep(_) => {
            Source::file(paths::sysprep_disk_iso(name), "raw")
        }
        VolumeSource::EmptyDisk(empty) => Source {
            capacity: Some(bytes("empty disk capacity", &empty.capacity)?),
            ..Source::file(paths::empty_disk_image(name), "qcow2")
        },
    };

    // Sizes reported for the volume override whatever the source declared.
    let capacity = claim_capacity(conv, name)?.or(resolved.capacity);
    Ok(Source { capacity, ..resolved })
}

/// Picks the cache mode for a disk backed by `path`.
///
/// Unset modes become `none` when the storage supports direct I/O and
/// `writethrough` otherwise. An explicit `none` on storage without direct
/// I/O is an error; `writethrough` is always accepted as is.
fn resolve_cache_mode(
    log: &Logger,
    disk: &str,
    requested: Option<CacheMode>,
    check: impl FnOnce() -> io::Result<bool>,
) -> Result<CacheMode> {
    match requested {
        Some(CacheMode::Writethrough) => Ok(CacheMode::Writethrough),
        Some(CacheMode::None) => match check() {
            Ok(true) => Ok(CacheMode::None),
            Ok(false) => Err(ConvertError::DirectIoUnsupported(disk.into())),
            Err(e) => {
                warn!(log, "direct I/O check failed";
                    "disk" => disk, "error" => %e);
                Err(ConvertError::DirectIoUnsupported(disk.into()))
            }
        },
        None => match check() {
            Ok(true) => Ok(CacheMode::None),
            Ok(false) => Ok(CacheMode::Writethrough),
            Err(e) => {
                warn!(log, "direct I/O check failed, using writethrough";
                    "disk" => disk, "error" => %e);
                Ok(CacheMode::Writethrough)
            }
        },
    }
}

/// The block sizes presented for `disk`, detected from `source` when the
/// disk asks to match its volume.
fn block_io(
    conv: &Conversion<'_>,
    disk: &Disk,
    source: Option<&Source>,
) -> Result<Option<BlockIo>> {
    let sizes = match (&disk.block_size, source) {
        (None, _) => return Ok(None),
        (Some(BlockSize::Custom { logical, physical }), _) => {
            return Ok(Some(BlockIo {
                logical_block_size: *logical,
                physical_block_size: *physical,
            }));
        }
        (Some(BlockSize::MatchVolume), None) => Err(io::Error::new(
            io::ErrorKind::NotFound,
            "disk has no backing volume",
        )),
        (Some(BlockSize::MatchVolume), Some(source)) => {
            let path = Path::new(&source.path);
            let detector = &conv.ctx.block_sizes;
            match source.kind {
                DiskType::Block => detector.device_block_sizes(path),
                DiskType::File => detector.file_block_sizes(path),
            }
        }
    };
    let sizes = sizes.map_err(|source| ConvertError::BlockSizeUndetectable {
        disk: disk.name.clone(),
        source,
    })?;
    debug!(conv.log, "detected block sizes";
        "disk" => &disk.name,
        "logical" => sizes.logical,
        "physical" => sizes.physical,
    );
    Ok(Some(BlockIo {
        logical_block_size: sizes.logical,
        physical_block_size: sizes.physical,
    }))
}

pub(super) fn convert_disks(
    conv: &Conversion<'_>,
    topology: &CpuTopology,
    io_threads: Option<&IoThreadPlan>,
    builder: &mut DomainBuilder,
) -> Result<()> {
    let mut namer = DeviceNamer::new();
    let block_multi_queue =
        conv.devices().block_multi_queue.unwrap_or(false);

    for (index, disk) in conv.devices().disks.iter().enumerate() {
        let bus = disk_bus(disk, conv.arch());
        let virtio = bus == DiskBus::Virtio;

        let (device, read_only, pci_address, reservation) = match &disk.device
        {
            None => (DiskDeviceKind::Disk, false, None, false),
            Some(DiskDevice::Disk(t)) => (
                DiskDeviceKind::Disk,
                t.read_only.unwrap_or(false),
                t.pci_address,
                false,
            ),
            Some(DiskDevice::Lun(t)) => (
                DiskDeviceKind::Lun,
                t.read_only.unwrap_or(false),
                None,
                t.reservation.unwrap_or(false),
            ),
            Some(DiskDevice::Cdrom(t)) => (
                DiskDeviceKind::Cdrom,
                t.read_only.unwrap_or(true),
                None,
                false,
            ),
        };
        if pci_address.is_some() && !virtio {
            return Err(ConvertError::PciAddressOnNonVirtioBus {
                disk: disk.name.clone(),
                bus,
            });
        }
        if reservation && bus != DiskBus::Scsi {
            return Err(ConvertError::InvalidReservation(disk.name.clone()));
        }

        let volume_index =
            conv.spec.volumes.iter().position(|v| v.name == disk.name);
        let source = match volume_index {
            Some(i) => {
                let volume = &conv.spec.volumes[i];
                Some(resolve_source(conv, i, &volume.name, &volume.source)?)
            }
            None if device == DiskDeviceKind::Cdrom => None,
            None => return Err(ConvertError::VolumeNotFound(disk.name.clone())),
        };

        let (dev, unit) = namer.allocate(&disk.name, bus);
        let shareable = disk.shareable()
            || source.as_ref().is_some_and(|s| s.shareable);

        let cache = match &source {
            None => None,
            Some(source) => {
                let requested =
                    if shareable { Some(CacheMode::None) } else { disk.cache };
                let path = Path::new(&source.path);
                let direct_io = &conv.ctx.direct_io;
                Some(resolve_cache_mode(
                    &conv.log,
                    &disk.name,
                    requested,
                    || match source.kind {
                        DiskType::Block => direct_io.check_block_device(path),
                        DiskType::File => direct_io.check_file(path),
                    },
                )?)
            }
        };
        let block_io = block_io(conv, disk, source.as_ref())?;
        let io = disk.io.or_else(|| {
            let block = source.as_ref().is_some_and(|s| {
                s.kind == DiskType::Block
            });
            (block && cache == Some(CacheMode::None)).then_some(IoMode::Native)
        });

        let (iothread, iothreads) = match io_threads
            .and_then(|plan| plan.assignment(index))
        {
            None => (None, vec![]),
            Some(IoThreadAssignment::Single(id)) => (Some(*id), vec![]),
            Some(IoThreadAssignment::Pool(ids)) => (None, ids.clone()),
        };

        let address = match (pci_address, bus) {
            (Some(pci), _) => Some(Address::Pci(pci)),
            (None, DiskBus::Scsi) => Some(Address::Drive {
                controller: 0,
                bus: 0,
                unit: unit as u32,
            }),
            (None, _) => None,
        };

        let (kind, file, dev_path, format, backing_store, capacity) =
            match source {
                None => (DiskType::Block, None, None, "raw", None, None),
                Some(Source {
                    kind,
                    path,
                    format,
                    backing_store,
                    capacity,
                    ..
                }) => {
                    let (file, dev_path) = match kind {
                        DiskType::File => (Some(path), None),
                        DiskType::Block => (None, Some(path)),
                    };
                    (kind, file, dev_path, format, backing_store, capacity)
                }
            };

        let converted = devices::Disk {
            kind,
            device,
            model: virtio.then(|| conv.virtio_model()),
            driver: DiskDriver {
                format: Some(format),
                cache,
                io,
                error_policy: Some(disk.error_policy.unwrap_or_default()),
                discard: Some("unmap"),
                iothread,
                iothreads,
                queues: (virtio && block_multi_queue)
                    .then(|| topology.vcpus()),
                iommu: if virtio { conv.virtio_iommu() } else { None },
                ..DiskDriver::default()
            },
            source: DiskSource {
                file,
                dev: dev_path,
                reservations: reservation.then(|| Reservations {
                    managed: YesNo::No,
                    source: CharSource {
                        kind: Some("unix"),
                        mode: "client",
                        path: paths::PR_HELPER_SOCKET.to_owned(),
                    },
                }),
            },
            target: DiskTarget { bus, dev },
            backing_store,
            serial: disk.serial.clone(),
            boot_order: disk.boot_order,
            readonly: read_only.then_some(Present {}),
            shareable: shareable.then_some(Present {}),
            block_io,
            capacity,
            address,
            alias: Alias::user(&disk.name),
        };
        debug!(conv.log, "converted disk";
            "disk" => &disk.name,
            "target" => &converted.target.dev,
            "cache" => ?converted.driver.cache,
        );
        builder.add_disk(converted)?;
    }
    Ok(())
}
