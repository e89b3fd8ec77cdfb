// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device elements of a domain descriptor.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use domforge_api_types::devices::{
    CacheMode, DiskBus, ErrorPolicy, InputBus, InputKind, IoMode,
    WatchdogAction,
};
use domforge_types::{OnOff, PciAddress, YesNo};

use super::{ByteSize, Present};

/// Prefix marking aliases of devices the user declared.
const USER_ALIAS_PREFIX: &str = "ua-";

/// A device alias, unique within a descriptor.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Alias(String);

impl Alias {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The alias of a device the user named `name`.
    pub fn user(name: &str) -> Self {
        Self(format!("{USER_ALIAS_PREFIX}{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Where a device sits on its bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Address {
    Pci(PciAddress),
    /// A unit on a disk controller.
    Drive { controller: u32, bus: u32, unit: u32 },
}

impl Address {
    pub fn pci(&self) -> Option<PciAddress> {
        match self {
            Address::Pci(addr) => Some(*addr),
            Address::Drive { .. } => None,
        }
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(5))?;
        match self {
            Address::Pci(addr) => {
                map.serialize_entry("type", "pci")?;
                map.serialize_entry("domain", &addr.domain_hex())?;
                map.serialize_entry("bus", &addr.bus_hex())?;
                map.serialize_entry("slot", &addr.slot_hex())?;
                map.serialize_entry("function", &addr.function_hex())?;
            }
            Address::Drive { controller, bus, unit } => {
                map.serialize_entry("type", "drive")?;
                map.serialize_entry("controller", &controller.to_string())?;
                map.serialize_entry("bus", &bus.to_string())?;
                map.serialize_entry("unit", &unit.to_string())?;
            }
        }
        map.end()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Devices {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub controllers: Vec<Controller>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Input>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watchdog: Option<Watchdog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<Sound>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rng: Option<Rng>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tpm: Option<Tpm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memballoon: Option<MemBalloon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vsock: Option<Vsock>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub panic_devices: Vec<Panic>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub host_devices: Vec<HostDevice>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub video: Vec<Video>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub graphics: Vec<Graphics>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub serials: Vec<Serial>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub consoles: Vec<Console>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<Channel>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub redirdevs: Vec<Redirdev>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub memory: Vec<MemoryDevice>,
}

/// Driver options shared by virtio devices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceDriver {
    pub iommu: OnOff,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskType {
    File,
    Block,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskDeviceKind {
    Disk,
    Lun,
    Cdrom,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Disk {
    #[serde(rename = "type")]
    pub kind: DiskType,
    pub device: DiskDeviceKind,
    /// Set for virtio disks only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'static str>,
    pub driver: DiskDriver,
    pub source: DiskSource,
    pub target: DiskTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backing_store: Option<BackingStore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_order: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readonly: Option<Present>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shareable: Option<Present>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_io: Option<BlockIo>,
    /// Size of the backing image in bytes, where it is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    pub alias: Alias,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiskDriver {
    pub name: &'static str,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io: Option<IoMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_policy: Option<ErrorPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discard: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iothread: Option<u32>,
    /// The IOThreads of a supplemental pool.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub iothreads: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queues: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iommu: Option<OnOff>,
}

impl Default for DiskDriver {
    fn default() -> Self {
        Self {
            name: "qemu",
            format: None,
            cache: None,
            io: None,
            error_policy: None,
            discard: None,
            iothread: None,
            iothreads: vec![],
            queues: None,
            iommu: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DiskSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservations: Option<Reservations>,
}

/// Persistent reservation forwarding through the host helper daemon.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Reservations {
    pub managed: YesNo,
    pub source: CharSource,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiskTarget {
    pub bus: DiskBus,
    pub dev: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BackingStore {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub format: &'static str,
    pub source: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BlockIo {
    pub logical_block_size: u32,
    pub physical_block_size: u32,
}

/// A socket or file backing a character device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CharSource {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    pub mode: &'static str,
    pub path: String,
}

impl CharSource {
    pub fn bind(path: String) -> Self {
        Self { kind: None, mode: "bind", path }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Interface {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<InterfaceTarget>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_order: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rom: Option<Rom>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<InterfaceDriver>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_state: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    pub alias: Alias,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InterfaceTarget {
    pub dev: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed: Option<YesNo>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Rom {
    pub enabled: YesNo,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceDriver {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queues: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iommu: Option<OnOff>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Controller {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<ControllerDriver>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pcihole64: Option<PciHole64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<Alias>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ControllerDriver {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iothread: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queues: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iommu: Option<OnOff>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PciHole64 {
    pub value: u64,
    pub unit: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Input {
    #[serde(rename = "type")]
    pub kind: InputKind,
    pub bus: InputBus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'static str>,
    pub alias: Alias,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Watchdog {
    pub model: &'static str,
    pub action: WatchdogAction,
    pub alias: Alias,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Sound {
    pub model: String,
    pub alias: Alias,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Rng {
    pub model: &'static str,
    pub backend: RngBackend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<DeviceDriver>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RngBackend {
    pub model: &'static str,
    pub source: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Tpm {
    pub model: &'static str,
    pub backend: TpmBackend,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TpmBackend {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_state: Option<YesNo>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemBalloon {
    pub model: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats_period: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_page_reporting: Option<OnOff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<DeviceDriver>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Vsock {
    pub model: &'static str,
    pub cid: VsockCid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct VsockCid {
    pub auto: YesNo,
    pub address: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Panic {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// A host PCI device passed through to the guest. These are resolved
/// outside the converter and copied into the descriptor as given.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HostDevice {
    #[serde(rename = "type")]
    pub kind: String,
    pub managed: YesNo,
    pub source: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_order: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    pub alias: Alias,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Video {
    pub model: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heads: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vram: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Graphics {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub listen: GraphicsListen,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GraphicsListen {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub socket: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Serial {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub port: u32,
    pub source: CharSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<SerialLog>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SerialLog {
    pub file: String,
    pub append: OnOff,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Console {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub target: ConsoleTarget,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConsoleTarget {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub port: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Channel {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub target: ChannelTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CharSource>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelTarget {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: &'static str,
}

/// A USB device redirected from a client connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Redirdev {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub bus: &'static str,
    pub source: CharSource,
}

/// A memory device enabling guest memory hotplug.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemoryDevice {
    pub model: &'static str,
    pub target: MemoryTarget,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemoryTarget {
    pub size: ByteSize,
    pub node: u32,
    pub block: ByteSize,
    pub requested: ByteSize,
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn pci_address_attributes() {
        let addr = Address::Pci(PciAddress::new(0, 0x81, 1, 0).unwrap());
        assert_eq!(
            serde_json::to_value(addr).unwrap(),
            json!({
                "type": "pci",
                "domain": "0x0000",
                "bus": "0x81",
                "slot": "0x01",
                "function": "0x0",
            })
        );
    }

    #[test]
    fn drive_address_attributes() {
        let addr = Address::Drive { controller: 0, bus: 0, unit: 2 };
        assert_eq!(
            serde_json::to_value(addr).unwrap(),
            json!({
                "type": "drive",
                "controller": "0",
                "bus": "0",
                "unit": "2",
            })
        );
        assert_eq!(addr.pci(), None);
    }

    #[test]
    fn user_aliases() {
        assert_eq!(Alias::user("mydisk").as_str(), "ua-mydisk");
        assert_eq!(
            serde_json::to_value(Alias::user("x")).unwrap(),
            json!("ua-x")
        );
    }

    #[test]
    fn disk_driver_defaults() {
        let driver = DiskDriver {
            cache: Some(CacheMode::Writethrough),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(driver).unwrap(),
            json!({ "name": "qemu", "cache": "writethrough" })
        );
    }
}
