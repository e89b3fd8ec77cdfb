// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Auxiliary devices: watchdog, sound, TPM, RNG, balloon, inputs, consoles,
//! graphics, channels, USB redirection, VSOCK, and panic notifiers.

use slog::{debug, warn};

use domforge_api_types::devices::{InputBus, InputKind, WatchdogDevice};
use domforge_api_types::Bootloader;
use domforge_types::{OnOff, YesNo};

use super::{Conversion, DomainBuilder};
use crate::descriptor::devices::{
    Channel, ChannelTarget, CharSource, Console, ConsoleTarget, DeviceDriver,
    Graphics, GraphicsListen, Input, MemBalloon, Panic, Redirdev, Rng,
    RngBackend, Serial, SerialLog, Sound, Tpm, TpmBackend, Video, Vsock,
    VsockCid, Watchdog,
};
use crate::descriptor::Alias;
use crate::error::{ConvertError, Result};
use crate::paths;

const GUEST_AGENT_CHANNEL: &str = "org.qemu.guest_agent.0";
const DOWNWARD_METRICS_CHANNEL: &str = "org.github.vhostmd.1";

/// Number of USB redirection slots offered to a client.
const USB_REDIRECT_SLOTS: usize = 4;

fn watchdog_name(device: &WatchdogDevice) -> &'static str {
    match device {
        WatchdogDevice::I6300esb(_) => "i6300esb",
        WatchdogDevice::Diag288(_) => "diag288",
    }
}

fn convert_watchdog(
    conv: &Conversion<'_>,
    builder: &mut DomainBuilder,
) -> Result<()> {
    let Some(watchdog) = &conv.devices().watchdog else {
        return Ok(());
    };
    let Some(device) = &watchdog.device else {
        return Err(ConvertError::WatchdogNotMapped(watchdog.name.clone()));
    };
    let model = conv.arch().watchdog_model(device).ok_or(
        ConvertError::WatchdogNotSupported {
            model: watchdog_name(device),
            arch: conv.arch(),
        },
    )?;
    let (WatchdogDevice::I6300esb(options) | WatchdogDevice::Diag288(options)) =
        device;
    builder.set_watchdog(Watchdog {
        model,
        action: options.action.unwrap_or_default(),
        alias: Alias::user(&watchdog.name),
    })?;
    Ok(())
}

fn convert_inputs(
    conv: &Conversion<'_>,
    builder: &mut DomainBuilder,
) -> Result<()> {
    for input in &conv.devices().inputs {
        let bus = input.bus.unwrap_or(InputBus::Usb);
        if bus == InputBus::Ps2 {
            return Err(ConvertError::Ps2InputNotSupported(input.name.clone()));
        }
        if input.kind == InputKind::Keyboard {
            return Err(ConvertError::KeyboardInputNotSupported(
                input.name.clone(),
            ));
        }
        builder.add_input(Input {
            kind: input.kind,
            bus,
            model: (bus == InputBus::Virtio).then(|| conv.virtio_model()),
            alias: Alias::user(&input.name),
        })?;
    }
    Ok(())
}

/// Inputs the architecture needs to drive an attached display, unless the
/// user already declared one of the same kind.
fn default_inputs(
    conv: &Conversion<'_>,
    builder: &mut DomainBuilder,
) -> Result<()> {
    for &(kind, bus) in conv.arch().default_inputs() {
        if conv.devices().inputs.iter().any(|i| i.kind == kind) {
            continue;
        }
        let name: &'static str = kind.into();
        builder.add_input(Input {
            kind,
            bus,
            model: (bus == InputBus::Virtio).then(|| conv.virtio_model()),
            alias: Alias::new(format!("{name}0")),
        })?;
    }
    Ok(())
}

fn convert_graphics(
    conv: &Conversion<'_>,
    builder: &mut DomainBuilder,
) -> Result<()> {
    if !conv.devices().autoattach_graphics_device.unwrap_or(true) {
        return Ok(());
    }
    let efi = matches!(
        conv.spec.domain.firmware.as_ref().and_then(|f| f.bootloader.as_ref()),
        Some(Bootloader::Efi(_))
    );
    let model = conv
        .arch()
        .default_video_model(efi, conv.ctx.bochs_for_efi_guests);
    let devices = &mut builder.descriptor_mut().devices;
    devices.video.push(Video { model, heads: Some(1), vram: None });
    devices.graphics.push(Graphics {
        kind: "vnc",
        listen: GraphicsListen {
            kind: "socket",
            socket: paths::vnc_socket(&conv.spec.uid),
        },
    });
    default_inputs(conv, builder)
}

fn convert_consoles(conv: &Conversion<'_>, builder: &mut DomainBuilder) {
    let uid = &conv.spec.uid;
    let devices = &mut builder.descriptor_mut().devices;

    if conv.devices().autoattach_serial_console.unwrap_or(true) {
        devices.serials.push(Serial {
            kind: "unix",
            port: 0,
            source: CharSource::bind(paths::serial_socket(uid)),
            log: Some(SerialLog {
                file: paths::serial_log(uid),
                append: OnOff::On,
            }),
        });
        devices.consoles.push(Console {
            kind: "pty",
            target: ConsoleTarget { kind: "serial", port: 0 },
        });
    }

    devices.channels.push(Channel {
        kind: "unix",
        target: ChannelTarget { kind: "virtio", name: GUEST_AGENT_CHANNEL },
        source: None,
    });
    if conv.devices().downward_metrics.is_some() {
        devices.channels.push(Channel {
            kind: "unix",
            target: ChannelTarget {
                kind: "virtio",
                name: DOWNWARD_METRICS_CHANNEL,
            },
            source: Some(CharSource::bind(paths::downward_metrics_socket())),
        });
    }
}

fn convert_usb_redirect(conv: &Conversion<'_>, builder: &mut DomainBuilder) {
    if conv.devices().client_passthrough.is_none() {
        return;
    }
    if !conv.arch().supports_usb_controller() {
        warn!(conv.log, "no USB controller for client passthrough, skipping");
        return;
    }
    let redirdevs = &mut builder.descriptor_mut().devices.redirdevs;
    redirdevs.extend((0..USB_REDIRECT_SLOTS).map(|i| Redirdev {
        kind: "unix",
        bus: "usb",
        source: CharSource::bind(paths::usb_redirect_socket(
            &conv.spec.uid,
            i,
        )),
    }));
}

pub(super) fn convert_devices(
    conv: &Conversion<'_>,
    builder: &mut DomainBuilder,
) -> Result<()> {
    let devices = conv.devices();
    let iommu = conv.virtio_iommu().map(|iommu| DeviceDriver { iommu });

    convert_watchdog(conv, builder)?;

    if let Some(sound) = &devices.sound {
        builder.set_sound(Sound {
            model: sound.model.clone().unwrap_or_else(|| "ich9".to_owned()),
            alias: Alias::user(&sound.name),
        })?;
    }

    convert_inputs(conv, builder)?;
    convert_graphics(conv, builder)?;
    convert_consoles(conv, builder);
    convert_usb_redirect(conv, builder);

    let out = &mut builder.descriptor_mut().devices;

    let tpm = devices.tpm.as_ref().filter(|t| t.enabled.unwrap_or(true));
    if let Some(tpm) = tpm {
        let persistent = tpm.persistent.unwrap_or(false);
        out.tpm = Some(Tpm {
            model: if persistent { "tpm-crb" } else { "tpm-tis" },
            backend: TpmBackend {
                kind: "emulator",
                version: "2.0",
                persistent_state: persistent.then_some(YesNo::Yes),
            },
        });
    }

    if devices.rng.is_some() {
        out.rng = Some(Rng {
            model: conv.virtio_model(),
            backend: RngBackend { model: "random", source: paths::RNG_SOURCE },
            driver: iommu,
            address: None,
        });
    }

    out.memballoon = Some(if devices.autoattach_memballoon.unwrap_or(true) {
        let period = conv.ctx.memballoon_stats_period;
        MemBalloon {
            model: conv.virtio_model(),
            stats_period: (period > 0).then_some(period),
            free_page_reporting: Some(conv.ctx.free_page_reporting.into()),
            driver: iommu,
            address: None,
        }
    } else {
        MemBalloon {
            model: "none",
            stats_period: None,
            free_page_reporting: None,
            driver: None,
            address: None,
        }
    });

    if devices.autoattach_vsock.unwrap_or(false) {
        match conv.spec.status.vsock_cid {
            Some(address) => {
                out.vsock = Some(Vsock {
                    model: conv.virtio_model(),
                    cid: VsockCid { auto: YesNo::No, address },
                    address: None,
                });
            }
            None => warn!(conv.log, "no VSOCK CID assigned, skipping VSOCK"),
        }
    }

    out.panic_devices.extend(
        devices.panic_devices.iter().map(|p| Panic { model: p.model.clone() }),
    );

    debug!(conv.log, "added devices";
        "inputs" => out.inputs.len(),
        "channels" => out.channels.len());
    Ok(())
}
