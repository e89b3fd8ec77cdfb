// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! OS type, bootloader, kernel boot, ACPI tables, and SMBIOS.

use slog::debug;

use domforge_api_types::volumes::VolumeSource;
use domforge_api_types::{Bootloader, Firmware, StartStrategy};
use domforge_types::YesNo;

use super::{Conversion, DomainBuilder};
use crate::descriptor::{
    AcpiTable, Bios, BootMenu, Loader, Nvram, Os, OsType, SysInfo,
    SysInfoEntry,
};
use crate::error::{ConvertError, Result};
use crate::paths;

/// How long the boot menu of a paused guest waits, in milliseconds.
const PAUSED_BOOT_MENU_TIMEOUT: u32 = 10_000;

/// Resolves the file an ACPI table of type `kind` is read from.
fn acpi_table(
    conv: &Conversion<'_>,
    kind: &'static str,
    volume: &str,
) -> Result<AcpiTable> {
    let volume = conv
        .spec
        .volume(volume)
        .ok_or(ConvertError::AcpiVolumeNotFound(kind))?;
    if !matches!(volume.source, VolumeSource::Secret(_)) {
        return Err(ConvertError::AcpiVolumeTypeUnsupported(kind));
    }
    let dir = conv
        .ctx
        .secrets
        .get(&volume.name)
        .cloned()
        .unwrap_or_else(|| paths::secret_volume_dir(&volume.name));
    Ok(AcpiTable { kind, path: format!("{dir}/{kind}.bin") })
}

fn sysinfo(conv: &Conversion<'_>, firmware: Option<&Firmware>) -> SysInfo {
    let mut system = vec![];
    let mut push = |name, value: Option<&String>| {
        if let Some(value) = value {
            system.push(SysInfoEntry { name, value: value.clone() });
        }
    };
    if let Some(smbios) = &conv.ctx.smbios {
        push("manufacturer", smbios.manufacturer.as_ref());
        push("product", smbios.product.as_ref());
        push("version", smbios.version.as_ref());
        push("sku", smbios.sku.as_ref());
        push("family", smbios.family.as_ref());
    }
    let uuid = firmware.and_then(|f| f.uuid).map(|u| u.to_string());
    push("uuid", uuid.as_ref());
    push("serial", firmware.and_then(|f| f.serial.as_ref()));
    SysInfo { kind: "smbios", system }
}

pub(super) fn convert_firmware(
    conv: &Conversion<'_>,
    builder: &mut DomainBuilder,
) -> Result<()> {
    let arch = conv.arch();
    let firmware = conv.spec.domain.firmware.as_ref();

    let mut os = Os {
        kind: OsType {
            arch: arch.os_arch(),
            machine: conv
                .spec
                .domain
                .machine_type
                .clone()
                .unwrap_or_else(|| arch.default_machine_type().to_owned()),
            value: "hvm",
        },
        smbios_mode: Some("sysinfo"),
        ..Default::default()
    };

    match firmware.and_then(|f| f.bootloader.as_ref()) {
        Some(Bootloader::Efi(efi)) => {
            let secure_boot = efi.secure_boot();
            let images = conv
                .ctx
                .efi
                .images(secure_boot)
                .ok_or(ConvertError::EfiFirmwareMissing { secure_boot })?;
            os.loader = Some(Loader {
                path: images.code.clone(),
                readonly: YesNo::Yes,
                secure: secure_boot.into(),
                kind: "pflash",
            });
            os.nvram = Some(Nvram {
                path: paths::nvram_vars(&conv.spec.name, conv.ctx.run_as_root),
                template: images.vars.clone(),
            });
            debug!(conv.log, "booting through EFI";
                "secure_boot" => secure_boot, "code" => &images.code);
        }
        Some(Bootloader::Bios(bios)) => {
            if bios.use_serial.unwrap_or(false) {
                os.bios = Some(Bios { use_serial: YesNo::Yes });
            }
        }
        None => {}
    }

    if let Some(kernel_boot) = firmware.and_then(|f| f.kernel_boot.as_ref()) {
        if let Some(container) = &kernel_boot.container {
            os.kernel =
                container.kernel_path.as_deref().map(paths::kernel_boot_file);
            os.initrd =
                container.initrd_path.as_deref().map(paths::kernel_boot_file);
        }
        os.cmdline = kernel_boot.kernel_args.clone();
    }

    if let Some(acpi) = firmware.and_then(|f| f.acpi.as_ref()) {
        if let Some(volume) = &acpi.slic_name_ref {
            os.acpi_tables.push(acpi_table(conv, "slic", volume)?);
        }
        if let Some(volume) = &acpi.msdm_name_ref {
            os.acpi_tables.push(acpi_table(conv, "msdm", volume)?);
        }
    }

    if conv.spec.start_strategy == Some(StartStrategy::Paused) {
        os.boot_menu = Some(BootMenu {
            enable: YesNo::Yes,
            timeout: Some(PAUSED_BOOT_MENU_TIMEOUT),
        });
    }

    let domain = builder.descriptor_mut();
    domain.os = os;
    domain.sysinfo = Some(sysinfo(conv, firmware));

    if conv.ctx.verbosity >= 1 && arch.supports_firmware_debug_console() {
        domain.qemu_args.extend([
            "-chardev".to_owned(),
            format!("file,id=firmwarelog,path={}", paths::FIRMWARE_LOG),
            "-device".to_owned(),
            "isa-debugcon,iobase=0x402,chardev=firmwarelog".to_owned(),
        ]);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::super::convert;
    use super::super::test_support::*;
    use super::*;
    use crate::arch::Arch;
    use crate::context::{EfiImages, SmBios};
    use crate::descriptor::DomainDescriptor;
    use domforge_api_types::volumes::{ConfigMapSource, SecretSource, Volume};
    use domforge_api_types::{
        Acpi, Bios as SpecBios, Efi, KernelBoot, KernelBootContainer, VmSpec,
    };

    fn with_firmware(firmware: Firmware) -> VmSpec {
        let mut spec = spec();
        spec.domain.firmware = Some(firmware);
        spec
    }

    fn efi(secure_boot: Option<bool>) -> Firmware {
        Firmware {
            bootloader: Some(Bootloader::Efi(Efi {
                secure_boot,
                persistent: None,
            })),
            ..Default::default()
        }
    }

    fn images(prefix: &str) -> EfiImages {
        EfiImages {
            code: format!("/usr/share/OVMF/{prefix}_CODE.fd"),
            vars: format!("/usr/share/OVMF/{prefix}_VARS.fd"),
        }
    }

    fn run(spec: &VmSpec) -> DomainDescriptor {
        convert(spec, &context(Arch::Amd64), &logger()).unwrap()
    }

    #[test]
    fn bios_by_default() {
        let domain = run(&spec());
        assert_eq!(domain.os.loader, None);
        assert_eq!(domain.os.nvram, None);
        assert_eq!(domain.os.bios, None);
        assert_eq!(domain.os.smbios_mode, Some("sysinfo"));
        assert_eq!(domain.os.kind.value, "hvm");

        let domain = run(&with_firmware(Firmware {
            bootloader: Some(Bootloader::Bios(SpecBios {
                use_serial: Some(true),
            })),
            ..Default::default()
        }));
        assert_eq!(domain.os.bios, Some(Bios { use_serial: YesNo::Yes }));
    }

    #[test]
    fn efi_images_follow_secure_boot() {
        let mut ctx = context(Arch::Amd64);
        ctx.efi.insecure = Some(images("OVMF"));
        ctx.efi.secure_boot = Some(images("OVMF.secboot"));

        for (secure_boot, code, secure) in [
            (None, "OVMF.secboot_CODE.fd", YesNo::Yes),
            (Some(true), "OVMF.secboot_CODE.fd", YesNo::Yes),
            (Some(false), "OVMF_CODE.fd", YesNo::No),
        ] {
            let spec = with_firmware(efi(secure_boot));
            let domain = convert(&spec, &ctx, &logger()).unwrap();
            let loader = domain.os.loader.unwrap();
            assert!(loader.path.ends_with(code), "{}", loader.path);
            assert_eq!(loader.readonly, YesNo::Yes);
            assert_eq!(loader.kind, "pflash");
            assert_eq!(loader.secure, secure);
            assert_eq!(
                domain.os.nvram.unwrap().path,
                "/var/run/kubevirt-private/libvirt/qemu/nvram/testvmi_VARS.fd"
            );
        }

        ctx.run_as_root = true;
        let spec = with_firmware(efi(Some(false)));
        let domain = convert(&spec, &ctx, &logger()).unwrap();
        let nvram = domain.os.nvram.unwrap();
        assert_eq!(nvram.path, "/var/lib/libvirt/qemu/nvram/testvmi_VARS.fd");
        assert_eq!(nvram.template, "/usr/share/OVMF/OVMF_VARS.fd");
    }

    #[test]
    fn efi_firmware_missing() {
        let mut ctx = context(Arch::Amd64);
        ctx.efi.insecure = Some(images("OVMF"));
        let spec = with_firmware(efi(None));
        let err = convert(&spec, &ctx, &logger()).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::EfiFirmwareMissing { secure_boot: true }
        ));
    }

    #[test]
    fn kernel_boot() {
        let domain = run(&with_firmware(Firmware {
            kernel_boot: Some(KernelBoot {
                kernel_args: Some("console=ttyS0".into()),
                container: Some(KernelBootContainer {
                    image: "quay.io/kernel:latest".into(),
                    kernel_path: Some("/boot/vmlinuz".into()),
                    initrd_path: None,
                }),
            }),
            ..Default::default()
        }));
        assert_eq!(
            domain.os.kernel.as_deref(),
            Some("/var/run/kubevirt-ephemeral-disks/kernel-boot/boot/vmlinuz")
        );
        assert_eq!(domain.os.initrd, None);
        assert_eq!(domain.os.cmdline.as_deref(), Some("console=ttyS0"));
    }

    fn acpi_spec(slic: Option<Volume>, msdm: Option<Volume>) -> VmSpec {
        let mut spec = with_firmware(Firmware {
            acpi: Some(Acpi {
                slic_name_ref: slic.is_some().then(|| "vol-slic".into()),
                msdm_name_ref: msdm.is_some().then(|| "vol-msdm".into()),
            }),
            ..Default::default()
        });
        spec.volumes.extend(slic);
        spec.volumes.extend(msdm);
        spec
    }

    fn secret(name: &str) -> Volume {
        Volume {
            name: name.into(),
            source: VolumeSource::Secret(SecretSource {
                secret_name: format!("secret-{name}"),
            }),
        }
    }

    #[test]
    fn acpi_tables_from_secrets() {
        let domain = run(&acpi_spec(
            Some(secret("vol-slic")),
            Some(secret("vol-msdm")),
        ));
        assert_eq!(
            domain.os.acpi_tables,
            vec![
                AcpiTable {
                    kind: "slic",
                    path: "/var/run/kubevirt-private/secret/vol-slic/slic.bin"
                        .into(),
                },
                AcpiTable {
                    kind: "msdm",
                    path: "/var/run/kubevirt-private/secret/vol-msdm/msdm.bin"
                        .into(),
                },
            ]
        );

        let mut ctx = context(Arch::Amd64);
        ctx.secrets.insert("vol-slic".into(), "/run/secrets/slic".into());
        let spec = acpi_spec(Some(secret("vol-slic")), None);
        let domain = convert(&spec, &ctx, &logger()).unwrap();
        assert_eq!(domain.os.acpi_tables[0].path, "/run/secrets/slic/slic.bin");
    }

    #[test]
    fn acpi_errors() {
        let config_map = Volume {
            name: "vol-msdm".into(),
            source: VolumeSource::ConfigMap(ConfigMapSource {
                name: "cm".into(),
            }),
        };
        let spec = acpi_spec(None, Some(config_map));
        let err =
            convert(&spec, &context(Arch::Amd64), &logger()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Firmware's volume type is unsupported for msdm"
        );

        let mut spec = acpi_spec(Some(secret("vol-slic")), None);
        spec.volumes.clear();
        let err =
            convert(&spec, &context(Arch::Amd64), &logger()).unwrap_err();
        assert_eq!(err.to_string(), "Firmware's volume for slic was not found");
    }

    #[test]
    fn sysinfo_entries() {
        let domain = run(&spec());
        let sysinfo = domain.sysinfo.unwrap();
        assert_eq!(sysinfo.kind, "smbios");
        assert!(sysinfo.system.iter().all(|e| e.name != "serial"));

        let mut ctx = context(Arch::Amd64);
        ctx.smbios = Some(SmBios {
            manufacturer: Some("Example".into()),
            ..Default::default()
        });
        let spec = with_firmware(Firmware {
            uuid: Some("e4686d2c-6e8d-4335-b8fd-81bee22f4815".parse().unwrap()),
            serial: Some("sn-1".into()),
            ..Default::default()
        });
        let domain = convert(&spec, &ctx, &logger()).unwrap();
        let names: Vec<&str> =
            domain.sysinfo.unwrap().system.iter().map(|e| e.name).collect();
        assert_eq!(names, ["manufacturer", "uuid", "serial"]);
        assert!(domain.uuid.is_some());
    }

    #[test]
    fn paused_start_shows_boot_menu() {
        let mut spec = spec();
        spec.start_strategy = Some(StartStrategy::Paused);
        let domain = run(&spec);
        assert_eq!(
            domain.os.boot_menu,
            Some(BootMenu { enable: YesNo::Yes, timeout: Some(10_000) })
        );
    }

    #[test]
    fn firmware_log_on_verbose_amd64() {
        let mut ctx = context(Arch::Amd64);
        ctx.verbosity = 1;
        let domain = convert(&spec(), &ctx, &logger()).unwrap();
        assert_eq!(
            domain.qemu_args,
            [
                "-chardev",
                "file,id=firmwarelog,path=/tmp/qemu-firmware.log",
                "-device",
                "isa-debugcon,iobase=0x402,chardev=firmwarelog",
            ]
        );

        let mut ctx = context(Arch::Arm64);
        ctx.verbosity = 2;
        let domain = convert(&spec(), &ctx, &logger()).unwrap();
        assert!(domain.qemu_args.is_empty());
    }

    #[test]
    fn machine_type_override() {
        let domain =
            convert(&spec(), &context(Arch::S390x), &logger()).unwrap();
        assert_eq!(domain.os.kind.arch, "s390x");
        assert_eq!(domain.os.kind.machine, "s390-ccw-virtio");

        let mut spec = spec();
        spec.domain.machine_type = Some("pc-q35-rhel9.2.0".into());
        assert_eq!(run(&spec).os.kind.machine, "pc-q35-rhel9.2.0");
    }
}
