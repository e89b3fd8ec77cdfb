// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The hypervisor domain descriptor produced by a conversion.
//!
//! Everything here is plain data. Attribute values that the hypervisor
//! tooling compares textually (sizes, PCI addresses, CPU sets, yes/no and
//! on/off switches) are modeled with types whose serialized form is exact.

use serde::Serialize;
use uuid::Uuid;

use domforge_types::{CpuSet, OnOff, YesNo};

pub mod devices;

pub use devices::{Address, Alias, Devices, HostDevice};

/// A byte count, always serialized with the unit `"b"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ByteSize {
    pub value: u64,
    pub unit: &'static str,
}

impl ByteSize {
    pub fn bytes(value: u64) -> Self {
        Self { value, unit: "b" }
    }
}

impl Default for ByteSize {
    fn default() -> Self {
        Self::bytes(0)
    }
}

/// Marker for elements whose presence alone carries meaning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Present {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainType {
    #[default]
    Kvm,
    Qemu,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DomainDescriptor {
    #[serde(rename = "type")]
    pub kind: DomainType,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    pub memory: ByteSize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<ByteSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_backing: Option<MemoryBacking>,
    pub vcpu: Vcpu,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vcpus: Vec<HotplugVcpu>,
    pub cpu: Cpu,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cputune: Option<CpuTune>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iothreads: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sysinfo: Option<SysInfo>,
    pub os: Os,
    pub features: Features,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock: Option<Clock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_security: Option<LaunchSecurity>,
    pub devices: Devices,
    /// Extra arguments appended to the hypervisor command line.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub qemu_args: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MemoryBacking {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hugepages: Option<Hugepages>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<MemorySource>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Hugepages {
    pub page_size: ByteSize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MemorySource {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Vcpu {
    pub placement: &'static str,
    /// Every vCPU slot, including hotplug slots.
    pub cpus: u32,
    /// vCPUs online at boot, when fewer than `cpus`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<u32>,
}

impl Default for Vcpu {
    fn default() -> Self {
        Self { placement: "static", cpus: 1, current: None }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct HotplugVcpu {
    pub id: u32,
    pub enabled: YesNo,
    pub hotpluggable: YesNo,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Cpu {
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub topology: CpuTopology,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<CpuFeature>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CpuTopology {
    pub sockets: u32,
    pub cores: u32,
    pub threads: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CpuFeature {
    pub name: String,
    pub policy: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CpuTune {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vcpupin: Vec<VcpuPin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emulatorpin: Option<EmulatorPin>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub iothreadpin: Vec<IoThreadPin>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VcpuPin {
    pub vcpu: u32,
    pub cpuset: CpuSet,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmulatorPin {
    pub cpuset: CpuSet,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IoThreadPin {
    pub iothread: u32,
    pub cpuset: CpuSet,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SysInfo {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub system: Vec<SysInfoEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SysInfoEntry {
    pub name: &'static str,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Os {
    #[serde(rename = "type")]
    pub kind: OsType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smbios_mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bios: Option<Bios>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loader: Option<Loader>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nvram: Option<Nvram>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initrd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmdline: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub acpi_tables: Vec<AcpiTable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_menu: Option<BootMenu>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OsType {
    pub arch: &'static str,
    pub machine: String,
    pub value: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Bios {
    pub use_serial: YesNo,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Loader {
    pub path: String,
    pub readonly: YesNo,
    pub secure: YesNo,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Nvram {
    pub path: String,
    pub template: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AcpiTable {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub path: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BootMenu {
    pub enable: YesNo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FeatureState {
    pub state: OnOff,
}

impl FeatureState {
    pub fn new(enabled: bool) -> Self {
        Self { state: enabled.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Features {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acpi: Option<Present>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apic: Option<Present>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smm: Option<Present>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pvspinlock: Option<FeatureState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kvm: Option<KvmFeatures>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hyperv: Option<HyperVFeatures>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vmport: Option<FeatureState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmu: Option<FeatureState>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct KvmFeatures {
    pub hidden: FeatureState,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HyperVFeatures {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relaxed: Option<FeatureState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vapic: Option<FeatureState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spinlocks: Option<HyperVSpinlocks>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpindex: Option<FeatureState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<FeatureState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synic: Option<FeatureState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stimer: Option<FeatureState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<FeatureState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<HyperVVendorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequencies: Option<FeatureState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reenlightenment: Option<FeatureState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tlbflush: Option<FeatureState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipi: Option<FeatureState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evmcs: Option<FeatureState>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct HyperVSpinlocks {
    pub state: OnOff,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HyperVVendorId {
    pub state: OnOff,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Clock {
    pub offset: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjustment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub timers: Vec<Timer>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Timer {
    pub name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub present: Option<YesNo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tickpolicy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<u64>,
}

impl Timer {
    pub fn named(name: &'static str) -> Self {
        Self { name, present: None, tickpolicy: None, frequency: None }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LaunchSecurity {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub policy: String,
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn sizes_carry_a_byte_unit() {
        assert_eq!(
            serde_json::to_value(ByteSize::bytes(8_388_608)).unwrap(),
            json!({ "value": 8388608, "unit": "b" })
        );
    }

    #[test]
    fn switches_render_as_words() {
        let slot = HotplugVcpu {
            id: 4,
            enabled: YesNo::No,
            hotpluggable: YesNo::Yes,
        };
        assert_eq!(
            serde_json::to_value(slot).unwrap(),
            json!({ "id": 4, "enabled": "no", "hotpluggable": "yes" })
        );
        assert_eq!(
            serde_json::to_value(FeatureState::new(false)).unwrap(),
            json!({ "state": "off" })
        );
    }

    #[test]
    fn cpusets_render_comma_joined() {
        let pin = VcpuPin { vcpu: 0, cpuset: "5-7".parse().unwrap() };
        assert_eq!(
            serde_json::to_value(pin).unwrap(),
            json!({ "vcpu": 0, "cpuset": "5,6,7" })
        );
    }

    #[test]
    fn unset_fields_are_left_out() {
        let value = serde_json::to_value(DomainDescriptor::default()).unwrap();
        let object = value.as_object().unwrap();
        assert!(!object.contains_key("uuid"));
        assert!(!object.contains_key("cputune"));
        assert!(!object.contains_key("qemu_args"));
        assert_eq!(object["type"], json!("kvm"));
    }
}
