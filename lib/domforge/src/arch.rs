// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-architecture capability table.
//!
//! Every architecture-dependent choice the converter makes is answered by a
//! method on [`Arch`]. Each method matches exhaustively, so adding an
//! architecture fails to compile until every question has an answer for it.

use domforge_api_types::devices::{
    DiskBus, InputBus, InputKind, WatchdogDevice,
};
use domforge_api_types::LaunchSecurity;
use serde::{Deserialize, Serialize};

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Arch {
    Amd64,
    Arm64,
    Ppc64le,
    S390x,
}

/// The launch-security mode an architecture implements for a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchSecuritySupport {
    /// Emitted as a `sev` launch security element.
    Sev,
    /// No launch security element; protection comes from the platform and
    /// only requires virtio devices to go through the IOMMU.
    SecureExecution,
}

impl Arch {
    /// The architecture name used in the domain's OS type.
    pub fn os_arch(&self) -> &'static str {
        match self {
            Arch::Amd64 => "x86_64",
            Arch::Arm64 => "aarch64",
            Arch::Ppc64le => "ppc64le",
            Arch::S390x => "s390x",
        }
    }

    pub fn default_machine_type(&self) -> &'static str {
        match self {
            Arch::Amd64 => "q35",
            Arch::Arm64 => "virt",
            Arch::Ppc64le => "pseries",
            Arch::S390x => "s390-ccw-virtio",
        }
    }

    /// Maps a requested watchdog to the model string this architecture
    /// emulates it with, if it can.
    pub fn watchdog_model(
        &self,
        device: &WatchdogDevice,
    ) -> Option<&'static str> {
        match (self, device) {
            (Arch::Amd64, WatchdogDevice::I6300esb(_)) => Some("i6300esb"),
            (Arch::S390x, WatchdogDevice::Diag288(_)) => Some("diag288"),
            (Arch::Amd64 | Arch::Arm64 | Arch::Ppc64le | Arch::S390x, _) => {
                None
            }
        }
    }

    pub fn default_video_model(
        &self,
        efi: bool,
        bochs_for_efi: bool,
    ) -> &'static str {
        match self {
            Arch::Amd64 if efi && bochs_for_efi => "bochs",
            Arch::Amd64 | Arch::Ppc64le => "vga",
            Arch::Arm64 | Arch::S390x => "virtio",
        }
    }

    /// Input devices added alongside an autoattached graphics device.
    pub fn default_inputs(&self) -> &'static [(InputKind, InputBus)] {
        match self {
            Arch::Amd64 | Arch::Ppc64le => &[],
            Arch::Arm64 => &[
                (InputKind::Tablet, InputBus::Usb),
                (InputKind::Keyboard, InputBus::Usb),
            ],
            Arch::S390x => &[(InputKind::Keyboard, InputBus::Virtio)],
        }
    }

    pub fn default_cdrom_bus(&self) -> DiskBus {
        match self {
            Arch::Amd64 | Arch::Ppc64le => DiskBus::Sata,
            Arch::Arm64 | Arch::S390x => DiskBus::Scsi,
        }
    }

    pub fn supports_usb_controller(&self) -> bool {
        match self {
            Arch::Amd64 | Arch::Arm64 | Arch::Ppc64le => true,
            Arch::S390x => false,
        }
    }

    /// Model for virtio devices. `transitional` selects the variant legacy
    /// guest drivers understand; s390x only has the one model.
    pub fn virtio_model(&self, transitional: bool) -> &'static str {
        match self {
            Arch::Amd64 | Arch::Arm64 | Arch::Ppc64le if transitional => {
                "virtio-transitional"
            }
            Arch::Amd64 | Arch::Arm64 | Arch::Ppc64le => {
                "virtio-non-transitional"
            }
            Arch::S390x => "virtio",
        }
    }

    pub fn scsi_controller_model(&self, transitional: bool) -> &'static str {
        match self {
            Arch::Amd64 | Arch::Arm64 | Arch::Ppc64le => {
                self.virtio_model(transitional)
            }
            Arch::S390x => "virtio-scsi",
        }
    }

    /// Model of the USB controller backing client USB redirection.
    pub fn usb_redirect_controller_model(&self) -> &'static str {
        match self {
            Arch::Amd64 | Arch::Arm64 | Arch::Ppc64le => "qemu-xhci",
            Arch::S390x => "none",
        }
    }

    pub fn supports_pci_hole64(&self) -> bool {
        match self {
            Arch::Amd64 => true,
            Arch::Arm64 | Arch::Ppc64le | Arch::S390x => false,
        }
    }

    pub fn supports_vmport(&self) -> bool {
        match self {
            Arch::Amd64 => true,
            Arch::Arm64 | Arch::Ppc64le | Arch::S390x => false,
        }
    }

    pub fn supports_hyperv(&self) -> bool {
        match self {
            Arch::Amd64 => true,
            Arch::Arm64 | Arch::Ppc64le | Arch::S390x => false,
        }
    }

    pub fn supports_tsc_timer(&self) -> bool {
        match self {
            Arch::Amd64 => true,
            Arch::Arm64 | Arch::Ppc64le | Arch::S390x => false,
        }
    }

    pub fn supports_smm(&self) -> bool {
        match self {
            Arch::Amd64 => true,
            Arch::Arm64 | Arch::Ppc64le | Arch::S390x => false,
        }
    }

    pub fn supports_acpi(&self) -> bool {
        match self {
            Arch::Amd64 | Arch::Arm64 => true,
            Arch::Ppc64le | Arch::S390x => false,
        }
    }

    pub fn supports_vcpu_hotplug(&self) -> bool {
        match self {
            Arch::Amd64 | Arch::Ppc64le | Arch::S390x => true,
            Arch::Arm64 => false,
        }
    }

    /// Whether guest memory can grow through a virtio-mem device.
    pub fn supports_memory_hotplug(&self) -> bool {
        match self {
            Arch::Amd64 | Arch::Arm64 => true,
            Arch::Ppc64le | Arch::S390x => false,
        }
    }

    /// Whether an ISA debug console can capture firmware logs.
    pub fn supports_firmware_debug_console(&self) -> bool {
        match self {
            Arch::Amd64 => true,
            Arch::Arm64 | Arch::Ppc64le | Arch::S390x => false,
        }
    }

    pub fn default_cpu_mode(&self) -> &'static str {
        match self {
            Arch::Amd64 | Arch::Ppc64le | Arch::S390x => "host-model",
            Arch::Arm64 => "host-passthrough",
        }
    }

    /// Host-model CPUs on this architecture carry an explicit `mpx` disable.
    pub fn disables_mpx(&self) -> bool {
        match self {
            Arch::Amd64 => true,
            Arch::Arm64 | Arch::Ppc64le | Arch::S390x => false,
        }
    }

    pub fn launch_security(
        &self,
        requested: &LaunchSecurity,
    ) -> Option<LaunchSecuritySupport> {
        match (self, requested) {
            (Arch::Amd64, LaunchSecurity::Sev(_)) => {
                Some(LaunchSecuritySupport::Sev)
            }
            (Arch::S390x, LaunchSecurity::SecureExecution) => {
                Some(LaunchSecuritySupport::SecureExecution)
            }
            (Arch::Amd64 | Arch::Arm64 | Arch::Ppc64le | Arch::S390x, _) => {
                None
            }
        }
    }
}
