// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host paths at which the launcher environment exposes volumes, sockets,
//! and firmware artifacts.

pub const PRIVATE_DIR: &str = "/var/run/kubevirt-private";
pub const EPHEMERAL_DIR: &str = "/var/run/kubevirt-ephemeral-disks";
pub const HOTPLUG_DISK_DIR: &str = "/var/run/kubevirt/hotplug-disks";
pub const CONTAINER_DISK_DIR: &str = "/var/run/kubevirt/container-disks";

pub const PR_HELPER_SOCKET: &str =
    "/var/run/kubevirt/daemons/pr/pr-helper.sock";

pub const KERNEL_BOOT_DIR: &str =
    "/var/run/kubevirt-ephemeral-disks/kernel-boot";

pub const NVRAM_DIR: &str = "/var/run/kubevirt-private/libvirt/qemu/nvram";
pub const ROOT_NVRAM_DIR: &str = "/var/lib/libvirt/qemu/nvram";

pub const FIRMWARE_LOG: &str = "/tmp/qemu-firmware.log";

pub const RNG_SOURCE: &str = "/dev/urandom";

pub const SERVICE_ACCOUNT_DISK: &str =
    "/var/run/kubevirt-private/service-account-disk/service-account.iso";

/// Image backing a claim mounted as a filesystem.
pub fn claim_disk_image(volume: &str) -> String {
    format!("{PRIVATE_DIR}/vmi-disks/{volume}/disk.img")
}

/// Device node of a claim attached in block mode.
pub fn claim_block_device(volume: &str) -> String {
    format!("/dev/{volume}")
}

pub fn hotplug_disk_image(volume: &str) -> String {
    format!("{HOTPLUG_DISK_DIR}/{volume}.img")
}

pub fn hotplug_block_device(volume: &str) -> String {
    format!("{HOTPLUG_DISK_DIR}/{volume}")
}

/// Copy-on-write overlay over a read-only backing image.
pub fn ephemeral_overlay(volume: &str) -> String {
    format!("{EPHEMERAL_DIR}/disk-data/{volume}/disk.qcow2")
}

pub fn container_disk_image(index: usize) -> String {
    format!("{CONTAINER_DISK_DIR}/disk_{index}.img")
}

pub fn cloud_init_no_cloud_iso(namespace: &str, vm: &str) -> String {
    format!("{EPHEMERAL_DIR}/cloud-init-data/{namespace}/{vm}/noCloud.iso")
}

pub fn cloud_init_config_drive_iso(namespace: &str, vm: &str) -> String {
    format!("{EPHEMERAL_DIR}/cloud-init-data/{namespace}/{vm}/configdrive.iso")
}

pub fn secret_disk_iso(volume: &str) -> String {
    format!("{PRIVATE_DIR}/secret-disks/{volume}.iso")
}

pub fn config_map_disk_iso(volume: &str) -> String {
    format!("{PRIVATE_DIR}/config-map-disks/{volume}.iso")
}

pub fn downward_api_disk_iso(volume: &str) -> String {
    format!("{PRIVATE_DIR}/downwardapi-disks/{volume}.iso")
}

pub fn sysprep_disk_iso(volume: &str) -> String {
    format!("{PRIVATE_DIR}/sysprep/{volume}.iso")
}

pub fn empty_disk_image(volume: &str) -> String {
    format!("{EPHEMERAL_DIR}/empty-disks/{volume}.qcow2")
}

/// Directory a secret volume is mounted at unless the context says
/// otherwise.
pub fn secret_volume_dir(volume: &str) -> String {
    format!("{PRIVATE_DIR}/secret/{volume}")
}

pub fn nvram_vars(vm: &str, run_as_root: bool) -> String {
    let dir = if run_as_root { ROOT_NVRAM_DIR } else { NVRAM_DIR };
    format!("{dir}/{vm}_VARS.fd")
}

pub fn kernel_boot_file(name: &str) -> String {
    format!("{KERNEL_BOOT_DIR}/{}", name.trim_start_matches('/'))
}

pub fn serial_socket(uid: &str) -> String {
    format!("{PRIVATE_DIR}/{uid}/virt-serial0")
}

pub fn serial_log(uid: &str) -> String {
    format!("{PRIVATE_DIR}/{uid}/virt-serial0-log")
}

pub fn vnc_socket(uid: &str) -> String {
    format!("{PRIVATE_DIR}/{uid}/virt-vnc")
}

pub fn usb_redirect_socket(uid: &str, index: usize) -> String {
    format!("{PRIVATE_DIR}/{uid}/virt-usbredir-{index}")
}

pub fn downward_metrics_socket() -> String {
    format!("{PRIVATE_DIR}/downwardapi-disks/vhostmd0")
}
