// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device definitions for a VM spec.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::PciAddress;

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Devices {
    #[serde(default)]
    pub disks: Vec<Disk>,

    #[serde(default)]
    pub interfaces: Vec<Interface>,

    #[serde(default)]
    pub inputs: Vec<Input>,

    #[serde(default)]
    pub watchdog: Option<Watchdog>,

    #[serde(default)]
    pub sound: Option<Sound>,

    #[serde(default)]
    pub rng: Option<Rng>,

    #[serde(default)]
    pub tpm: Option<Tpm>,

    #[serde(default)]
    pub panic_devices: Vec<PanicDevice>,

    /// Redirect client USB devices into the guest.
    #[serde(default)]
    pub client_passthrough: Option<ClientPassthrough>,

    /// Expose host metrics to the guest over a virtio-serial channel.
    #[serde(default)]
    pub downward_metrics: Option<DownwardMetrics>,

    /// Defaults to true.
    #[serde(default)]
    pub autoattach_memballoon: Option<bool>,

    /// Defaults to true.
    #[serde(default)]
    pub autoattach_graphics_device: Option<bool>,

    /// Defaults to true.
    #[serde(default)]
    pub autoattach_serial_console: Option<bool>,

    #[serde(default)]
    pub autoattach_vsock: Option<bool>,

    /// Give each virtio disk one queue per vCPU.
    #[serde(default)]
    pub block_multi_queue: Option<bool>,

    /// Give each virtio interface one queue per vCPU.
    #[serde(default)]
    pub network_interface_multiqueue: Option<bool>,

    /// Use transitional virtio models that legacy guests can drive.
    #[serde(default)]
    pub use_virtio_transitional: Option<bool>,

    /// Do not prepare controllers for hotplugged disks.
    #[serde(default)]
    pub disable_hotplug: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Disk {
    /// Must match the name of a volume.
    pub name: String,

    /// Defaults to a disk on the virtio bus.
    #[serde(default)]
    pub device: Option<DiskDevice>,

    #[serde(default)]
    pub boot_order: Option<u32>,

    #[serde(default)]
    pub serial: Option<String>,

    #[serde(default)]
    pub dedicated_io_thread: Option<bool>,

    #[serde(default)]
    pub cache: Option<CacheMode>,

    #[serde(default)]
    pub io: Option<IoMode>,

    #[serde(default)]
    pub error_policy: Option<ErrorPolicy>,

    #[serde(default)]
    pub block_size: Option<BlockSize>,

    /// Allow the disk to be attached to several VMs at once.
    #[serde(default)]
    pub shareable: Option<bool>,
}

impl Disk {
    pub fn dedicated_io_thread(&self) -> bool {
        self.dedicated_io_thread.unwrap_or(false)
    }

    pub fn shareable(&self) -> bool {
        self.shareable.unwrap_or(false)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum DiskDevice {
    Disk(DiskTarget),
    Lun(LunTarget),
    Cdrom(CdromTarget),
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DiskTarget {
    #[serde(default)]
    pub bus: Option<DiskBus>,

    #[serde(default)]
    pub read_only: Option<bool>,

    /// Only valid on the virtio bus.
    #[serde(default)]
    pub pci_address: Option<PciAddress>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LunTarget {
    #[serde(default)]
    pub bus: Option<DiskBus>,

    #[serde(default)]
    pub read_only: Option<bool>,

    /// Forward SCSI persistent reservation requests to the host.
    #[serde(default)]
    pub reservation: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CdromTarget {
    #[serde(default)]
    pub bus: Option<DiskBus>,

    /// Defaults to true.
    #[serde(default)]
    pub read_only: Option<bool>,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Serialize,
    JsonSchema,
    PartialEq,
    Eq,
    strum::Display,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DiskBus {
    Virtio,
    Sata,
    Scsi,
    Usb,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Serialize,
    JsonSchema,
    PartialEq,
    Eq,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CacheMode {
    None,
    Writethrough,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Serialize,
    JsonSchema,
    PartialEq,
    Eq,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IoMode {
    Native,
    Threads,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Serialize,
    JsonSchema,
    PartialEq,
    Eq,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ErrorPolicy {
    #[default]
    Stop,
    Ignore,
    Report,
    Enospace,
}

/// Block sizes presented to the guest.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum BlockSize {
    Custom { logical: u32, physical: u32 },
    /// Use the sizes of the file or block device backing the volume.
    MatchVolume,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Interface {
    /// Must match the name of a network.
    pub name: String,

    pub binding: InterfaceBinding,

    /// Defaults to virtio.
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub mac_address: Option<String>,

    #[serde(default)]
    pub boot_order: Option<u32>,

    #[serde(default)]
    pub pci_address: Option<PciAddress>,

    #[serde(default)]
    pub state: Option<LinkState>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum InterfaceBinding {
    Bridge,
    Masquerade,
    Sriov,
    /// A named network binding plugin.
    Plugin { name: String },
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Up,
    Down,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Input {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: InputKind,

    /// Defaults to usb.
    #[serde(default)]
    pub bus: Option<InputBus>,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Serialize,
    JsonSchema,
    PartialEq,
    Eq,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InputKind {
    Tablet,
    Keyboard,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Serialize,
    JsonSchema,
    PartialEq,
    Eq,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InputBus {
    Usb,
    Virtio,
    Ps2,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Watchdog {
    pub name: String,

    /// The emulated watchdog. Leaving this out is an error.
    #[serde(default)]
    pub device: Option<WatchdogDevice>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum WatchdogDevice {
    I6300esb(WatchdogOptions),
    Diag288(WatchdogOptions),
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WatchdogOptions {
    /// Defaults to reset.
    #[serde(default)]
    pub action: Option<WatchdogAction>,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Serialize,
    JsonSchema,
    PartialEq,
    Eq,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WatchdogAction {
    #[default]
    Reset,
    Poweroff,
    Shutdown,
    Pause,
    None,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Sound {
    pub name: String,

    /// Defaults to ich9.
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Rng {}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Tpm {
    /// Defaults to true.
    #[serde(default)]
    pub enabled: Option<bool>,

    /// Keep TPM state across restarts.
    #[serde(default)]
    pub persistent: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PanicDevice {
    /// One of `hyperv`, `isa`, `pvpanic`, `s390`, or `pseries`.
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ClientPassthrough {}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DownwardMetrics {}
