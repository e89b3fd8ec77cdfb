// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-side facts a conversion needs beyond the VM spec itself.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use domforge_types::CpuSet;

use crate::arch::Arch;
use crate::block_size::{BlockSizeDetector, HostBlockSizeDetector};
use crate::descriptor::HostDevice;
use crate::direct_io::DirectIoChecker;
use crate::iothreads::DEFAULT_AUTO_IO_THREADS_CAP;

/// A group of physical CPUs sharing local memory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NumaCell {
    pub id: u32,
    pub cpus: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NumaTopology {
    pub cells: Vec<NumaCell>,
}

/// Code and variable-store images for one EFI firmware build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EfiImages {
    pub code: String,
    pub vars: String,
}

/// The EFI firmware builds installed on the host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EfiConfig {
    pub insecure: Option<EfiImages>,
    pub secure_boot: Option<EfiImages>,
}

impl EfiConfig {
    pub fn images(&self, secure_boot: bool) -> Option<&EfiImages> {
        if secure_boot {
            self.secure_boot.as_ref()
        } else {
            self.insecure.as_ref()
        }
    }
}

/// Host-supplied SMBIOS system information.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SmBios {
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub sku: Option<String>,
    pub family: Option<String>,
}

/// How the network binding plugin for an interface connects it to the
/// domain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomainAttachment {
    /// A tap device the hypervisor opens by name.
    Tap,
    /// A pre-created tap device the hypervisor must not manage.
    ManagedTap,
    /// Anything else; the plugin wires the interface up itself.
    Other(String),
}

/// Everything about the host and launcher environment a conversion depends
/// on.
///
/// A context is read-only during a conversion and may be shared between
/// concurrent conversions.
#[derive(Clone)]
pub struct ConversionContext {
    pub arch: Arch,

    /// Fall back to software emulation when KVM is missing.
    pub allow_emulation: bool,
    pub kvm_available: bool,

    /// Volumes whose claim is attached in block mode.
    pub block_volumes: BTreeSet<String>,

    /// Volumes attached while the guest is running.
    pub hotplug_volumes: BTreeSet<String>,

    pub efi: EfiConfig,
    pub smbios: Option<SmBios>,

    /// Physical CPUs the guest's vCPUs may be pinned to.
    pub cpu_set: CpuSet,
    pub numa: Option<NumaTopology>,

    /// Mount directories of secret volumes, by volume name. Volumes not
    /// listed use the default secret mount location.
    pub secrets: BTreeMap<String, String>,

    pub free_page_reporting: bool,

    /// Memory balloon statistics polling interval in seconds; zero disables
    /// polling.
    pub memballoon_stats_period: u32,

    /// SR-IOV devices already resolved for this guest.
    pub host_devices: Vec<HostDevice>,

    /// Attachment type of plugin-bound interfaces, by interface name.
    pub interface_attachments: BTreeMap<String, DomainAttachment>,

    pub run_as_root: bool,

    /// Launcher log verbosity. At 1 and above firmware logs are captured.
    pub verbosity: u32,

    /// Use the bochs display device for EFI guests where supported.
    pub bochs_for_efi_guests: bool,

    /// Upper bound on IOThreads under the `auto` policy.
    pub auto_io_threads_cap: u32,

    pub direct_io: Arc<dyn DirectIoChecker>,

    /// Sizes reported for disks that match their volume's block sizes.
    pub block_sizes: Arc<dyn BlockSizeDetector>,
}

impl ConversionContext {
    pub fn new(arch: Arch, direct_io: Arc<dyn DirectIoChecker>) -> Self {
        Self {
            arch,
            allow_emulation: false,
            kvm_available: true,
            block_volumes: BTreeSet::new(),
            hotplug_volumes: BTreeSet::new(),
            efi: EfiConfig::default(),
            smbios: None,
            cpu_set: CpuSet::new(),
            numa: None,
            secrets: BTreeMap::new(),
            free_page_reporting: false,
            memballoon_stats_period: 0,
            host_devices: vec![],
            interface_attachments: BTreeMap::new(),
            run_as_root: false,
            verbosity: 0,
            bochs_for_efi_guests: false,
            auto_io_threads_cap: DEFAULT_AUTO_IO_THREADS_CAP,
            direct_io,
            block_sizes: Arc::new(HostBlockSizeDetector),
        }
    }

    pub fn is_block_volume(&self, volume: &str) -> bool {
        self.block_volumes.contains(volume)
    }

    pub fn is_hotplug_volume(&self, volume: &str) -> bool {
        self.hotplug_volumes.contains(volume)
    }
}

impl fmt::Debug for ConversionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionContext")
            .field("arch", &self.arch)
            .field("allow_emulation", &self.allow_emulation)
            .field("kvm_available", &self.kvm_available)
            .field("cpu_set", &self.cpu_set)
            .field("run_as_root", &self.run_as_root)
            .finish_non_exhaustive()
    }
}
