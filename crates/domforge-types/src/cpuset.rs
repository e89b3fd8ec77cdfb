// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::io::{Error, ErrorKind};
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// A set of physical CPU IDs.
///
/// Parses the Linux list format (`"0-3,8,10-11"`) and renders as the
/// comma-joined ascending IDs (`"0,1,2,3,8,10,11"`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuSet(BTreeSet<u32>);

impl CpuSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cpu: u32) -> bool {
        self.0.insert(cpu)
    }

    pub fn contains(&self, cpu: u32) -> bool {
        self.0.contains(&cpu)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    pub fn is_disjoint(&self, other: &CpuSet) -> bool {
        self.0.is_disjoint(&other.0)
    }
}

impl FromIterator<u32> for CpuSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl FromStr for CpuSet {
    type Err = std::io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |what: &str| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("Failed to parse CPU set {:?}: {}", s, what),
            )
        };

        let mut set = BTreeSet::new();
        if s.trim().is_empty() {
            return Ok(Self(set));
        }
        for part in s.split(',').map(str::trim) {
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo: u32 = lo.parse().map_err(|_| bad(part))?;
                    let hi: u32 = hi.parse().map_err(|_| bad(part))?;
                    if lo > hi {
                        return Err(bad("descending range"));
                    }
                    set.extend(lo..=hi);
                }
                None => {
                    set.insert(part.parse().map_err(|_| bad(part))?);
                }
            }
        }
        Ok(Self(set))
    }
}

impl Display for CpuSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for cpu in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{}", cpu)?;
            first = false;
        }
        Ok(())
    }
}

impl Serialize for CpuSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'d> Deserialize<'d> for CpuSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'d>,
    {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(de::Error::custom)
    }
}

impl JsonSchema for CpuSet {
    fn schema_name() -> String {
        "CpuSet".to_owned()
    }

    fn json_schema(
        generator: &mut schemars::gen::SchemaGenerator,
    ) -> schemars::schema::Schema {
        String::json_schema(generator)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_test::{assert_tokens, Token};

    #[test]
    fn parse_ranges_and_singletons() {
        let set: CpuSet = "5-7, 2,9".parse().unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![2, 5, 6, 7, 9]);
        assert_eq!(set.to_string(), "2,5,6,7,9");
    }

    #[test]
    fn reject_malformed() {
        assert!("3-1".parse::<CpuSet>().is_err());
        assert!("a".parse::<CpuSet>().is_err());
        assert!("1,,2".parse::<CpuSet>().is_err());
    }

    #[test]
    fn empty_set() {
        let set: CpuSet = "".parse().unwrap();
        assert!(set.is_empty());
        assert_eq!(set.to_string(), "");
    }

    #[test]
    fn serializes_as_ascending_list() {
        let set: CpuSet = [7, 5, 6].into_iter().collect();
        assert_tokens(&set, &[Token::Str("5,6,7")]);
    }
}
