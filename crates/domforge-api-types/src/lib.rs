// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Definitions for the declarative virtual machine specification accepted by
//! the domforge compiler.
//!
//! A [`VmSpec`] describes what the guest should look like (CPU, memory,
//! devices, firmware) and where its storage and networks come from. It says
//! nothing about the host it will run on; that information is supplied
//! separately at conversion time.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use domforge_types::{CpuSet, PciAddress, Quantity};

pub mod devices;
pub mod volumes;

use devices::Devices;
use volumes::{Network, Volume};

/// Annotation opting an amd64 guest into a zero-sized 64-bit PCI hole. Only
/// the exact value `"true"` enables it.
pub const DISABLE_PCI_HOLE64_ANNOTATION: &str =
    "domforge.dev/disable-pci-hole64";

/// Annotation asking for the emulator thread reservation to round the total
/// dedicated CPU count up to an even number.
pub const EMULATOR_THREAD_EVEN_PARITY_ANNOTATION: &str =
    "domforge.dev/emulator-thread-even-parity";

/// A virtual machine to be converted into a domain descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct VmSpec {
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    /// Unique identifier of the VM object, used in per-VM socket paths.
    #[serde(default)]
    pub uid: String,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    pub domain: DomainSpec,

    #[serde(default)]
    pub networks: Vec<Network>,

    #[serde(default)]
    pub volumes: Vec<Volume>,

    #[serde(default)]
    pub start_strategy: Option<StartStrategy>,

    /// Runtime facts about the VM collected before conversion.
    #[serde(default)]
    pub status: VmStatus,
}

impl VmSpec {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn volume(&self, name: &str) -> Option<&Volume> {
        self.volumes.iter().find(|v| v.name == name)
    }

    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.name == name)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StartStrategy {
    Paused,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct VmStatus {
    #[serde(default)]
    pub volume_status: Vec<VolumeStatus>,

    /// The context ID assigned to the VM's VSOCK device.
    #[serde(default)]
    pub vsock_cid: Option<u32>,

    /// TSC frequency of the node the VM was scheduled on, in Hz.
    #[serde(default)]
    pub tsc_frequency: Option<u64>,
}

impl VmStatus {
    pub fn volume(&self, name: &str) -> Option<&VolumeStatus> {
        self.volume_status.iter().find(|v| v.name == name)
    }
}

/// Size information for a claim-backed volume.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct VolumeStatus {
    pub name: String,

    /// The size the volume was requested with.
    #[serde(default)]
    pub requests: Option<Quantity>,

    /// The size actually provisioned for the volume.
    #[serde(default)]
    pub capacity: Option<Quantity>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DomainSpec {
    #[serde(default)]
    pub resources: ResourceRequirements,

    #[serde(default)]
    pub cpu: Option<Cpu>,

    #[serde(default)]
    pub memory: Option<Memory>,

    /// Overrides the architecture's default machine type.
    #[serde(default)]
    pub machine_type: Option<String>,

    #[serde(default)]
    pub firmware: Option<Firmware>,

    #[serde(default)]
    pub clock: Option<Clock>,

    #[serde(default)]
    pub features: Option<Features>,

    #[serde(default)]
    pub devices: Devices,

    #[serde(default)]
    pub io_threads_policy: Option<IoThreadsPolicy>,

    #[serde(default)]
    pub io_threads: Option<IoThreads>,

    #[serde(default)]
    pub launch_security: Option<LaunchSecurity>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub requests: ResourceList,

    #[serde(default)]
    pub limits: ResourceList,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ResourceList {
    #[serde(default)]
    pub cpu: Option<Quantity>,

    #[serde(default)]
    pub memory: Option<Quantity>,
}

/// Guest CPU configuration. Topology fields left unset (or zero) are derived
/// from the resource requests.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Cpu {
    #[serde(default)]
    pub cores: Option<u32>,

    #[serde(default)]
    pub sockets: Option<u32>,

    #[serde(default)]
    pub threads: Option<u32>,

    /// The number of sockets the guest may grow to via vCPU hotplug.
    #[serde(default)]
    pub max_sockets: Option<u32>,

    /// A named CPU model, or one of `host-model` / `host-passthrough`.
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub features: Vec<CpuFeature>,

    /// Pin each vCPU to its own physical CPU.
    #[serde(default)]
    pub dedicated_cpu_placement: bool,

    /// Reserve physical CPUs for the emulator thread, apart from the vCPUs.
    #[serde(default)]
    pub isolate_emulator_thread: bool,

    #[serde(default)]
    pub realtime: Option<Realtime>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CpuFeature {
    pub name: String,

    /// One of `force`, `require`, `optional`, `disable`, or `forbid`.
    /// Defaults to `require`.
    #[serde(default)]
    pub policy: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Realtime {
    #[serde(default)]
    pub mask: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Memory {
    /// Memory visible to the guest. Falls back to the memory request.
    #[serde(default)]
    pub guest: Option<Quantity>,

    /// Upper bound the guest memory may be hotplugged to.
    #[serde(default)]
    pub max_guest: Option<Quantity>,

    #[serde(default)]
    pub hugepages: Option<Hugepages>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Hugepages {
    pub page_size: Quantity,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum IoThreadsPolicy {
    /// One IOThread shared by every disk, plus one per dedicated disk.
    Shared,
    /// Derive a thread pool from the vCPU count.
    Auto,
    /// A fixed pool of threads handed to every virtio disk.
    SupplementalPool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct IoThreads {
    #[serde(default)]
    pub supplemental_pool_thread_count: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Firmware {
    /// The SMBIOS system UUID, also used as the domain UUID.
    #[serde(default)]
    pub uuid: Option<Uuid>,

    #[serde(default)]
    pub serial: Option<String>,

    #[serde(default)]
    pub bootloader: Option<Bootloader>,

    #[serde(default)]
    pub kernel_boot: Option<KernelBoot>,

    #[serde(default)]
    pub acpi: Option<Acpi>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum Bootloader {
    Bios(Bios),
    Efi(Efi),
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Bios {
    #[serde(default)]
    pub use_serial: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Efi {
    /// Defaults to enabled.
    #[serde(default)]
    pub secure_boot: Option<bool>,

    /// Keep the NVRAM variable store across restarts.
    #[serde(default)]
    pub persistent: Option<bool>,
}

impl Efi {
    pub fn secure_boot(&self) -> bool {
        self.secure_boot.unwrap_or(true)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct KernelBoot {
    #[serde(default)]
    pub kernel_args: Option<String>,

    #[serde(default)]
    pub container: Option<KernelBootContainer>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct KernelBootContainer {
    pub image: String,

    #[serde(default)]
    pub kernel_path: Option<String>,

    #[serde(default)]
    pub initrd_path: Option<String>,
}

/// ACPI tables to inject, each referencing a secret volume by name.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Acpi {
    #[serde(default)]
    pub slic_name_ref: Option<String>,

    #[serde(default)]
    pub msdm_name_ref: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Clock {
    pub offset: ClockOffset,

    #[serde(default)]
    pub timer: Option<Timers>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum ClockOffset {
    Utc {
        #[serde(default)]
        offset_seconds: Option<i32>,
    },
    Timezone(String),
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Timers {
    #[serde(default)]
    pub hpet: Option<Timer>,

    #[serde(default)]
    pub kvm: Option<Timer>,

    #[serde(default)]
    pub pit: Option<Timer>,

    #[serde(default)]
    pub rtc: Option<Timer>,

    #[serde(default)]
    pub hyperv: Option<Timer>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Timer {
    #[serde(default)]
    pub present: Option<bool>,

    #[serde(default)]
    pub tick_policy: Option<String>,
}

/// A hypervisor feature toggle. Present-but-unset means enabled.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FeatureState {
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl FeatureState {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Features {
    #[serde(default)]
    pub acpi: Option<FeatureState>,

    #[serde(default)]
    pub apic: Option<FeatureState>,

    #[serde(default)]
    pub smm: Option<FeatureState>,

    /// Hide the KVM signature from the guest.
    #[serde(default)]
    pub kvm_hidden: Option<bool>,

    #[serde(default)]
    pub pvspinlock: Option<FeatureState>,

    #[serde(default)]
    pub hyperv: Option<HyperV>,

    /// Let the hypervisor enable every Hyper-V enlightenment it supports.
    #[serde(default)]
    pub hyperv_passthrough: Option<FeatureState>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct HyperV {
    #[serde(default)]
    pub relaxed: Option<FeatureState>,
    #[serde(default)]
    pub vapic: Option<FeatureState>,
    #[serde(default)]
    pub spinlocks: Option<Spinlocks>,
    #[serde(default)]
    pub vpindex: Option<FeatureState>,
    #[serde(default)]
    pub runtime: Option<FeatureState>,
    #[serde(default)]
    pub synic: Option<FeatureState>,
    #[serde(default)]
    pub synictimer: Option<FeatureState>,
    #[serde(default)]
    pub reset: Option<FeatureState>,
    #[serde(default)]
    pub vendor_id: Option<String>,
    #[serde(default)]
    pub frequencies: Option<FeatureState>,
    #[serde(default)]
    pub reenlightenment: Option<FeatureState>,
    #[serde(default)]
    pub tlbflush: Option<FeatureState>,
    #[serde(default)]
    pub ipi: Option<FeatureState>,
    #[serde(default)]
    pub evmcs: Option<FeatureState>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Spinlocks {
    #[serde(default)]
    pub enabled: Option<bool>,

    #[serde(default)]
    pub retries: Option<u32>,
}

/// Confidential-computing launch mode.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum LaunchSecurity {
    /// AMD Secure Encrypted Virtualization.
    Sev(Sev),
    /// IBM Secure Execution.
    SecureExecution,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Sev {
    /// Also encrypt guest register state (SEV-ES).
    #[serde(default)]
    pub encrypted_state: Option<bool>,
}
