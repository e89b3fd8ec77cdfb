// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fundamental types shared by other domforge crates.
//!
//! The input model, the host configuration, and the conversion library all
//! need to agree on how quantities, PCI addresses, and CPU sets are parsed
//! and rendered, so those types live here rather than in any one consumer.

use std::fmt::Display;
use std::io::{Error, ErrorKind};
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

mod attr;
mod cpuset;
mod quantity;

pub use attr::{OnOff, YesNo};
pub use cpuset::CpuSet;
pub use quantity::{Quantity, QuantityError};

pub const PCI_SLOTS_PER_BUS: u8 = 32;
const PCI_FUNCTIONS_PER_SLOT: u8 = 8;

/// A PCI domain/bus/slot/function address. Supports conversion from a string
/// formatted as "DDDD:BB:SS.F" in hexadecimal, e.g. "0000:81:01.0".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct PciAddress {
    domain: u16,
    bus: u8,
    slot: u8,
    function: u8,
}

impl PciAddress {
    pub fn new(
        domain: u16,
        bus: u8,
        slot: u8,
        function: u8,
    ) -> Result<Self, std::io::Error> {
        if slot >= PCI_SLOTS_PER_BUS {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "PCI slot {} outside range of 0-{}",
                    slot,
                    PCI_SLOTS_PER_BUS - 1
                ),
            ));
        }

        if function >= PCI_FUNCTIONS_PER_SLOT {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "PCI function {} outside range of 0-{}",
                    function,
                    PCI_FUNCTIONS_PER_SLOT - 1
                ),
            ));
        }

        Ok(Self { domain, bus, slot, function })
    }

    #[inline]
    pub fn domain(&self) -> u16 {
        self.domain
    }

    #[inline]
    pub fn bus(&self) -> u8 {
        self.bus
    }

    #[inline]
    pub fn slot(&self) -> u8 {
        self.slot
    }

    #[inline]
    pub fn function(&self) -> u8 {
        self.function
    }

    /// The domain as a `0x`-prefixed, four digit hex string.
    pub fn domain_hex(&self) -> String {
        format!("{:#06x}", self.domain)
    }

    /// The bus as a `0x`-prefixed, two digit hex string.
    pub fn bus_hex(&self) -> String {
        format!("{:#04x}", self.bus)
    }

    /// The slot as a `0x`-prefixed, two digit hex string.
    pub fn slot_hex(&self) -> String {
        format!("{:#04x}", self.slot)
    }

    /// The function as a `0x`-prefixed, single digit hex string.
    pub fn function_hex(&self) -> String {
        format!("{:#x}", self.function)
    }
}

fn parse_hex_field<T>(
    s: &str,
    field: &str,
    width: usize,
    parse: fn(&str, u32) -> Result<T, std::num::ParseIntError>,
) -> Result<T, std::io::Error> {
    if field.len() != width || !field.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!(
                "Expected {} hex digits in PCI address field {:?} of {}",
                width, field, s
            ),
        ));
    }
    parse(field, 16).map_err(|e| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("Failed to parse PCI address {}: {}", s, e),
        )
    })
}

impl FromStr for PciAddress {
    type Err = std::io::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() != 3 {
            return Err(Self::Err::new(
                ErrorKind::InvalidInput,
                format!(
                    "Expected 3 colon-separated fields in PCI address {}, \
                    got {}",
                    s,
                    fields.len()
                ),
            ));
        }

        let Some((slot, function)) = fields[2].split_once('.') else {
            return Err(Self::Err::new(
                ErrorKind::InvalidInput,
                format!("Missing function in PCI address {}", s),
            ));
        };

        let domain = parse_hex_field(s, fields[0], 4, u16::from_str_radix)?;
        let bus = parse_hex_field(s, fields[1], 2, u8::from_str_radix)?;
        let slot = parse_hex_field(s, slot, 2, u8::from_str_radix)?;
        let function = parse_hex_field(s, function, 1, u8::from_str_radix)?;

        Self::new(domain, bus, slot, function)
    }
}

impl Display for PciAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.slot, self.function
        )
    }
}

impl Serialize for PciAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(format!("{}", self).as_str())
    }
}

impl<'d> Deserialize<'d> for PciAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'d>,
    {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(de::Error::custom)
    }
}

impl JsonSchema for PciAddress {
    fn schema_name() -> String {
        "PciAddress".to_owned()
    }

    fn json_schema(
        generator: &mut schemars::gen::SchemaGenerator,
    ) -> schemars::schema::Schema {
        String::json_schema(generator)
    }
}

#[cfg(test)]
mod test {
    use super::PciAddress;
    use serde::Deserialize;
    use serde_test::{assert_tokens, Token};
    use std::str::FromStr;

    const TEST_CASES: &[(&str, Result<PciAddress, ()>)] = &[
        (
            "0000:81:01.0",
            Ok(PciAddress { domain: 0, bus: 0x81, slot: 1, function: 0 }),
        ),
        (
            "00ab:00:1f.7",
            Ok(PciAddress { domain: 0xab, bus: 0, slot: 0x1f, function: 7 }),
        ),
        ("0000:00:20.0", Err(())),
        ("0000:00:01.8", Err(())),
        ("0000:81:01", Err(())),
        ("000:81:01.0", Err(())),
        ("0000:81.01.0", Err(())),
        ("0000:zz:01.0", Err(())),
        ("", Err(())),
        ("alas, poor PCI device", Err(())),
    ];

    #[test]
    fn pci_address_from_str() {
        for (input, expected) in TEST_CASES {
            match PciAddress::from_str(input) {
                Ok(addr) => assert_eq!(addr, expected.unwrap()),
                Err(_) => assert!(
                    expected.is_err(),
                    "Expected error parsing PCI address {}",
                    input
                ),
            }
        }
    }

    #[test]
    fn pci_address_serialization() {
        for (input, expected) in TEST_CASES {
            match expected {
                Ok(addr) => {
                    assert_tokens(addr, &[Token::Str(input)]);
                }
                Err(_) => {
                    let tokens = [Token::Str(input)];
                    let mut de = serde_test::Deserializer::new(&tokens);
                    assert!(PciAddress::deserialize(&mut de).is_err());
                }
            }
        }
    }

    #[test]
    fn pci_address_hex_components() {
        let addr = PciAddress::from_str("0000:81:01.0").unwrap();
        assert_eq!(addr.domain_hex(), "0x0000");
        assert_eq!(addr.bus_hex(), "0x81");
        assert_eq!(addr.slot_hex(), "0x01");
        assert_eq!(addr.function_hex(), "0x0");
    }
}
