// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use domforge_api_types::devices::DiskBus;
use domforge_types::{PciAddress, QuantityError};
use thiserror::Error;

use crate::arch::Arch;

/// Broad classes of conversion failure. Every [`ConvertError`] falls into
/// exactly one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// The requested feature has no implementation on the target
    /// architecture.
    UnsupportedArchFeature,
    /// A required value was left unspecified and has no default.
    MissingRequiredMapping,
    /// Individually valid settings that cannot be used together.
    InvalidCombination,
    /// The host does not have enough CPUs for the requested placement.
    ResourceInsufficiency,
    /// A quantity was malformed or out of range.
    QuantityParsing,
    /// A name refers to a volume or network that is absent or of the wrong
    /// type.
    ReferenceResolution,
}

/// Errors that abort a conversion.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("watchdog device {model} is not supported on architecture {arch}")]
    WatchdogNotSupported { model: &'static str, arch: Arch },

    #[error("watchdog {0} can't be mapped, no watchdog type specified")]
    WatchdogNotMapped(String),

    #[error("launch security mode {mode} is not supported on architecture {arch}")]
    LaunchSecurityNotSupported { mode: &'static str, arch: Arch },

    #[error("supplemental IOThread pool requested without a thread count")]
    SupplementalPoolSizeMissing,

    #[error("no memory size was requested for the guest")]
    GuestMemoryMissing,

    #[error("no EFI firmware is configured (secure boot: {secure_boot})")]
    EfiFirmwareMissing { secure_boot: bool },

    #[error("input device {0}: ps2 bus is not supported")]
    Ps2InputNotSupported(String),

    #[error("input device {0}: keyboard type is not supported")]
    KeyboardInputNotSupported(String),

    #[error("disk {disk}: a PCI address is only valid on the virtio bus, not {bus}")]
    PciAddressOnNonVirtioBus { disk: String, bus: DiskBus },

    #[error("disk {0}: persistent reservations require a LUN on the scsi bus")]
    InvalidReservation(String),

    #[error("disk {0}: cache mode none requires direct I/O, which the backing storage does not support")]
    DirectIoUnsupported(String),

    #[error("disk {disk}: failed to detect the block sizes of its volume")]
    BlockSizeUndetectable {
        disk: String,
        #[source]
        source: io::Error,
    },

    #[error("a device with alias {0} already exists")]
    AliasInUse(String),

    #[error("a PCI device is already attached at {0}")]
    PciAddressInUse(PciAddress),

    #[error("no free PCI slot left on the root bus")]
    PciSlotsExhausted,

    #[error("hardware virtualization is unavailable and emulation is not allowed")]
    EmulationNotAllowed,

    #[error("not enough CPUs to pin {vcpus} vCPUs, only {available} available")]
    InsufficientCpus { vcpus: usize, available: usize },

    #[error("no CPU allocated for the emulation thread")]
    NoEmulatorThreadCpu,

    #[error("no second CPU allocated for the emulation thread")]
    NoSecondEmulatorThreadCpu,

    #[error("topology of {sockets} sockets, {cores} cores and {threads} threads has too many vCPUs")]
    VcpuCountOverflow { sockets: u32, cores: u32, threads: u32 },

    #[error("invalid quantity for {field}: {source}")]
    Quantity {
        field: String,
        #[source]
        source: QuantityError,
    },

    #[error("Firmware's volume for {0} was not found")]
    AcpiVolumeNotFound(&'static str),

    #[error("Firmware's volume type is unsupported for {0}")]
    AcpiVolumeTypeUnsupported(&'static str),

    #[error("disk {0} has no matching volume")]
    VolumeNotFound(String),

    #[error("interface {0} has no matching network")]
    NetworkNotFound(String),
}

impl ConvertError {
    pub(crate) fn quantity(
        field: impl Into<String>,
        source: QuantityError,
    ) -> Self {
        Self::Quantity { field: field.into(), source }
    }

    pub fn kind(&self) -> ErrorKind {
        use ConvertError::*;
        match self {
            WatchdogNotSupported { .. } | LaunchSecurityNotSupported { .. } => {
                ErrorKind::UnsupportedArchFeature
            }
            WatchdogNotMapped(_)
            | SupplementalPoolSizeMissing
            | GuestMemoryMissing
            | EfiFirmwareMissing { .. } => ErrorKind::MissingRequiredMapping,
            Ps2InputNotSupported(_)
            | KeyboardInputNotSupported(_)
            | PciAddressOnNonVirtioBus { .. }
            | InvalidReservation(_)
            | DirectIoUnsupported(_)
            | AliasInUse(_)
            | PciAddressInUse(_)
            | EmulationNotAllowed => ErrorKind::InvalidCombination,
            PciSlotsExhausted
            | InsufficientCpus { .. }
            | NoEmulatorThreadCpu
            | NoSecondEmulatorThreadCpu => ErrorKind::ResourceInsufficiency,
            Quantity { .. } | VcpuCountOverflow { .. } => {
                ErrorKind::QuantityParsing
            }
            AcpiVolumeNotFound(_)
            | AcpiVolumeTypeUnsupported(_)
            | VolumeNotFound(_)
            | BlockSizeUndetectable { .. }
            | NetworkNotFound(_) => ErrorKind::ReferenceResolution,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn emulator_thread_messages() {
        assert_eq!(
            ConvertError::NoEmulatorThreadCpu.to_string(),
            "no CPU allocated for the emulation thread"
        );
        assert_eq!(
            ConvertError::NoSecondEmulatorThreadCpu.to_string(),
            "no second CPU allocated for the emulation thread"
        );
    }

    #[test]
    fn kinds() {
        assert_eq!(
            ConvertError::WatchdogNotSupported {
                model: "i6300esb",
                arch: Arch::Arm64
            }
            .kind(),
            ErrorKind::UnsupportedArchFeature
        );
        assert_eq!(
            ConvertError::PciAddressOnNonVirtioBus {
                disk: "d".into(),
                bus: DiskBus::Sata
            }
            .to_string(),
            "disk d: a PCI address is only valid on the virtio bus, not sata"
        );
        assert_eq!(
            ConvertError::AcpiVolumeNotFound("slic").kind(),
            ErrorKind::ReferenceResolution
        );
    }
}
