// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Guest-visible disk target names (`vda`, `sdb`, ...).
//!
//! Names are allocated per bus prefix: every bus that shares a prefix also
//! shares an index space, so a SATA disk and a SCSI disk can never both be
//! called `sda`. Allocations are keyed by a stable identity (the disk name),
//! which keeps names fixed when other disks come and go.

use std::collections::{BTreeMap, BTreeSet};

use domforge_api_types::devices::DiskBus;

const LETTERS: u32 = 26;

/// Returns the target name prefix used for disks on `bus`.
pub fn bus_prefix(bus: DiskBus) -> &'static str {
    match bus {
        DiskBus::Virtio => "vd",
        DiskBus::Sata | DiskBus::Scsi | DiskBus::Usb => "sd",
    }
}

/// Encodes `index` as a letter suffix appended to `prefix`: 0-25 map to
/// `a`-`z`, 26 to `aa`, 51 to `az`, 675 to `yz`, and so on, with each suffix
/// length covering a block of 26^len indices.
pub fn format_device_name(prefix: &str, index: usize) -> String {
    let mut remaining = index as u128;
    let mut len = 1u32;
    let mut block = u128::from(LETTERS);
    while remaining >= block {
        remaining -= block;
        len += 1;
        block *= u128::from(LETTERS);
    }

    let mut suffix = vec![b'a'; len as usize];
    for slot in suffix.iter_mut().rev() {
        *slot = b'a' + (remaining % u128::from(LETTERS)) as u8;
        remaining /= u128::from(LETTERS);
    }

    let mut name = String::with_capacity(prefix.len() + suffix.len());
    name.push_str(prefix);
    name.extend(suffix.into_iter().map(char::from));
    name
}

#[derive(Debug, Default)]
struct Family {
    by_key: BTreeMap<String, usize>,
    used: BTreeSet<usize>,
}

impl Family {
    fn lowest_free(&self) -> usize {
        (0..).find(|i| !self.used.contains(i)).unwrap_or_default()
    }
}

/// Allocates disk target names for one conversion.
#[derive(Debug, Default)]
pub struct DeviceNamer {
    families: BTreeMap<&'static str, Family>,
}

impl DeviceNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the name and index for `key` on `bus`, allocating the lowest
    /// free index if `key` has no name on that bus prefix yet.
    pub fn allocate(&mut self, key: &str, bus: DiskBus) -> (String, usize) {
        let prefix = bus_prefix(bus);
        let family = self.families.entry(prefix).or_default();
        let index = match family.by_key.get(key) {
            Some(index) => *index,
            None => {
                let index = family.lowest_free();
                family.used.insert(index);
                family.by_key.insert(key.to_owned(), index);
                index
            }
        };
        (format_device_name(prefix, index), index)
    }

    /// Releases whatever names `key` holds so later allocations can reuse
    /// them.
    pub fn deallocate(&mut self, key: &str) {
        for family in self.families.values_mut() {
            if let Some(index) = family.by_key.remove(key) {
                family.used.remove(&index);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn letter_suffixes() {
        let cases = [
            (0, "sda"),
            (1, "sdb"),
            (25, "sdz"),
            (26, "sdaa"),
            (51, "sdaz"),
            (675, "sdyz"),
            (701, "sdzz"),
            (702, "sdaaa"),
        ];
        for (index, expected) in cases {
            assert_eq!(format_device_name("sd", index), expected);
        }
    }

    #[test]
    fn sequential_allocation_and_reuse() {
        let mut namer = DeviceNamer::new();
        for i in 1..=9 {
            let (name, index) =
                namer.allocate(&format!("test{i}"), DiskBus::Virtio);
            assert_eq!(index, i - 1);
            assert_eq!(name, format_device_name("vd", i - 1));
        }
        assert_eq!(namer.allocate("test9", DiskBus::Virtio).0, "vdi");

        namer.deallocate("test4");
        assert_eq!(
            namer.allocate("something", DiskBus::Virtio),
            ("vdd".to_string(), 3)
        );
        assert_eq!(
            namer.allocate("something_else", DiskBus::Virtio),
            ("vdj".to_string(), 9)
        );
        assert_eq!(
            namer.allocate("something", DiskBus::Virtio),
            ("vdd".to_string(), 3)
        );

        assert_eq!(
            namer.allocate("other", DiskBus::Scsi),
            ("sda".to_string(), 0)
        );
    }

    #[test]
    fn buses_sharing_a_prefix_share_indices() {
        let mut namer = DeviceNamer::new();
        assert_eq!(namer.allocate("a", DiskBus::Sata).0, "sda");
        assert_eq!(namer.allocate("b", DiskBus::Scsi).0, "sdb");
        assert_eq!(namer.allocate("c", DiskBus::Virtio).0, "vda");
    }

    proptest! {
        #[test]
        fn allocation_is_idempotent_and_dense(
            count in 1usize..60,
            repeat in 0usize..60,
        ) {
            let mut namer = DeviceNamer::new();
            let mut names = BTreeSet::new();
            for i in 0..count {
                let (name, index) =
                    namer.allocate(&format!("disk{i}"), DiskBus::Scsi);
                prop_assert_eq!(index, i);
                prop_assert!(names.insert(name));
            }
            let key = format!("disk{}", repeat % count);
            let (_, again) = namer.allocate(&key, DiskBus::Scsi);
            prop_assert_eq!(again, repeat % count);
        }
    }
}
