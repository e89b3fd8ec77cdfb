// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host configuration read from TOML.
//!
//! The file describes the machine a VM is converted for: its architecture,
//! the CPUs and firmware it offers, and what the launcher has already
//! resolved about volumes, interfaces, and passthrough devices.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use domforge::context::{
    DomainAttachment, EfiConfig, EfiImages, NumaCell, NumaTopology, SmBios,
};
use domforge::descriptor::{Address, Alias, HostDevice};
use domforge::iothreads::DEFAULT_AUTO_IO_THREADS_CAP;
use domforge::{Arch, ConversionContext, DirectIoChecker};
use domforge_types::{CpuSet, PciAddress, YesNo};

/// Configuration of the conversion host.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub host: Host,

    #[serde(default)]
    pub block_volumes: BTreeSet<String>,

    #[serde(default)]
    pub hotplug_volumes: BTreeSet<String>,

    #[serde(default)]
    pub efi: Efi,

    #[serde(default)]
    pub cpu: Cpu,

    #[serde(default)]
    pub memballoon: MemBalloon,

    #[serde(default)]
    pub io_threads: IoThreads,

    /// Mount directory of each secret volume, by volume name.
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,

    /// Binding plugin attachment type, by interface name: `tap`,
    /// `managed-tap`, or anything else the plugin understands.
    #[serde(default)]
    pub interfaces: BTreeMap<String, String>,

    #[serde(default, rename = "host_device")]
    pub host_devices: Vec<HostDeviceConfig>,

    #[serde(default)]
    pub smbios: Option<SmBiosConfig>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Host {
    pub arch: Arch,

    #[serde(default = "default_true")]
    pub kvm_available: bool,

    #[serde(default)]
    pub allow_emulation: bool,

    #[serde(default)]
    pub run_as_root: bool,

    #[serde(default)]
    pub verbosity: u32,

    #[serde(default)]
    pub bochs_for_efi_guests: bool,
}

impl Default for Host {
    fn default() -> Self {
        Self {
            arch: Arch::Amd64,
            kvm_available: true,
            allow_emulation: false,
            run_as_root: false,
            verbosity: 0,
            bochs_for_efi_guests: false,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Efi {
    pub insecure: Option<EfiImageConfig>,
    pub secure_boot: Option<EfiImageConfig>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EfiImageConfig {
    pub code: String,
    pub vars: String,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Cpu {
    /// Physical CPUs available for pinning, e.g. `"0-3,8"`.
    #[serde(default)]
    pub allowed: CpuSet,

    #[serde(default, rename = "numa_cell")]
    pub numa_cells: Vec<NumaCellConfig>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NumaCellConfig {
    pub id: u32,

    /// Physical CPUs of the cell, in the order vCPUs are placed on them.
    pub cpus: Vec<u32>,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MemBalloon {
    #[serde(default)]
    pub stats_period: u32,

    #[serde(default)]
    pub free_page_reporting: bool,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct IoThreads {
    #[serde(default = "default_auto_cap")]
    pub auto_cap: u32,
}

impl Default for IoThreads {
    fn default() -> Self {
        Self { auto_cap: DEFAULT_AUTO_IO_THREADS_CAP }
    }
}

fn default_auto_cap() -> u32 {
    DEFAULT_AUTO_IO_THREADS_CAP
}

/// A host PCI function already assigned to the guest.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HostDeviceConfig {
    pub alias: String,
    pub source: PciAddress,

    #[serde(default)]
    pub guest_address: Option<PciAddress>,

    #[serde(default)]
    pub boot_order: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SmBiosConfig {
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub sku: Option<String>,
    pub family: Option<String>,
}

/// Errors which may be returned when parsing the host configuration.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Cannot parse toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Parses a TOML file into a configuration object.
pub fn parse<P: AsRef<Path>>(path: P) -> Result<Config, ParseError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let cfg = toml::from_str::<Config>(&contents)?;
    Ok(cfg)
}

fn attachment(kind: &str) -> DomainAttachment {
    match kind {
        "tap" => DomainAttachment::Tap,
        "managed-tap" => DomainAttachment::ManagedTap,
        other => DomainAttachment::Other(other.to_owned()),
    }
}

impl Config {
    /// Builds the conversion context this configuration describes, probing
    /// direct I/O support with `direct_io`.
    pub fn to_context(
        &self,
        direct_io: Arc<dyn DirectIoChecker>,
    ) -> Result<ConversionContext, ParseError> {
        let mut ctx = ConversionContext::new(self.host.arch, direct_io);
        ctx.kvm_available = self.host.kvm_available;
        ctx.allow_emulation = self.host.allow_emulation;
        ctx.run_as_root = self.host.run_as_root;
        ctx.verbosity = self.host.verbosity;
        ctx.bochs_for_efi_guests = self.host.bochs_for_efi_guests;

        ctx.block_volumes = self.block_volumes.clone();
        ctx.hotplug_volumes = self.hotplug_volumes.clone();
        ctx.secrets = self.secrets.clone();

        let images = |cfg: &EfiImageConfig| EfiImages {
            code: cfg.code.clone(),
            vars: cfg.vars.clone(),
        };
        ctx.efi = EfiConfig {
            insecure: self.efi.insecure.as_ref().map(images),
            secure_boot: self.efi.secure_boot.as_ref().map(images),
        };

        ctx.cpu_set = self.cpu.allowed.clone();
        if !self.cpu.numa_cells.is_empty() {
            let mut cells = Vec::with_capacity(self.cpu.numa_cells.len());
            for cell in &self.cpu.numa_cells {
                if !cell.cpus.iter().all(|cpu| ctx.cpu_set.contains(*cpu)) {
                    return Err(ParseError::InvalidField {
                        field: "cpu.numa_cell",
                        reason: format!(
                            "cell {} has CPUs outside the allowed set",
                            cell.id
                        ),
                    });
                }
                cells.push(NumaCell { id: cell.id, cpus: cell.cpus.clone() });
            }
            ctx.numa = Some(NumaTopology { cells });
        }

        ctx.memballoon_stats_period = self.memballoon.stats_period;
        ctx.free_page_reporting = self.memballoon.free_page_reporting;
        if self.io_threads.auto_cap == 0 {
            return Err(ParseError::InvalidField {
                field: "io_threads.auto_cap",
                reason: "must be at least 1".to_owned(),
            });
        }
        ctx.auto_io_threads_cap = self.io_threads.auto_cap;

        ctx.interface_attachments = self
            .interfaces
            .iter()
            .map(|(name, kind)| (name.clone(), attachment(kind)))
            .collect();

        let mut aliases = BTreeSet::new();
        for dev in &self.host_devices {
            if !aliases.insert(dev.alias.as_str()) {
                return Err(ParseError::InvalidField {
                    field: "host_device.alias",
                    reason: format!("{} is used more than once", dev.alias),
                });
            }
            ctx.host_devices.push(HostDevice {
                kind: "pci".to_owned(),
                managed: YesNo::No,
                source: Address::Pci(dev.source),
                boot_order: dev.boot_order,
                address: dev.guest_address.map(Address::Pci),
                alias: Alias::new(dev.alias.clone()),
            });
        }

        ctx.smbios = self.smbios.as_ref().map(|s| SmBios {
            manufacturer: s.manufacturer.clone(),
            product: s.product.clone(),
            version: s.version.clone(),
            sku: s.sku.clone(),
            family: s.family.clone(),
        });

        Ok(ctx)
    }
}
