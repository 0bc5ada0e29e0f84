//! The 4-byte AQEA address and its `0xAA:QQ:EE:A2` textual form (spec §6.2).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::lang;

/// A 4-byte AQEA address: language domain (AA), universal POS (QQ),
/// semantic/frequency cluster (EE), element ID (A2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    pub aa: u8,
    pub qq: u8,
    pub ee: u8,
    pub a2: u8,
}

/// Reserved EE values that the converter never produces (spec §4.3, §6.2).
pub const RESERVED_EE: [u8; 2] = [0x00, 0xFF];

/// Valid A2 range (spec §6.2).
pub const A2_RANGE: std::ops::RangeInclusive<u8> = 0x01..=0xFE;

impl Address {
    pub fn new(aa: u8, qq: u8, ee: u8, a2: u8) -> Self {
        Self { aa, qq, ee, a2 }
    }

    pub fn tuple(&self) -> (u8, u8, u8) {
        (self.aa, self.qq, self.ee)
    }

    /// Validate the discipline invariants from spec §8 property 7.
    pub fn is_well_formed(&self) -> bool {
        lang::AA_RANGE.contains(&self.aa)
            && !RESERVED_EE.contains(&self.ee)
            && A2_RANGE.contains(&self.a2)
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        [self.aa, self.qq, self.ee, self.a2]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:02X}:{:02X}:{:02X}:{:02X}",
            self.aa, self.qq, self.ee, self.a2
        )
    }
}

/// Error parsing an address from its textual form.
#[derive(Debug, thiserror::Error)]
#[error("invalid AQEA address string: {0}")]
pub struct AddressParseError(String);

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let parts: Vec<&str> = stripped.split(':').collect();
        if parts.len() != 4 {
            return Err(AddressParseError(s.to_string()));
        }
        let mut bytes = [0u8; 4];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] =
                u8::from_str_radix(part, 16).map_err(|_| AddressParseError(s.to_string()))?;
        }
        Ok(Address::new(bytes[0], bytes[1], bytes[2], bytes[3]))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_as_uppercase_hex() {
        let addr = Address::new(0xA1, 0x01, 0x10, 0x05);
        assert_eq!(addr.to_string(), "0xA1:01:10:05");
    }

    #[test]
    fn parses_its_own_display() {
        let addr = Address::new(0xA1, 0x01, 0x10, 0x05);
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn parse_rejects_malformed_input() {
        assert!("not-an-address".parse::<Address>().is_err());
        assert!("0xA1:01:10".parse::<Address>().is_err());
        assert!("0xZZ:01:10:05".parse::<Address>().is_err());
    }

    #[test]
    fn well_formed_checks_discipline() {
        assert!(Address::new(0xA1, 0x01, 0x10, 0x05).is_well_formed());
        assert!(!Address::new(0x50, 0x01, 0x10, 0x05).is_well_formed()); // AA out of range
        assert!(!Address::new(0xA1, 0x01, 0x00, 0x05).is_well_formed()); // reserved EE
        assert!(!Address::new(0xA1, 0x01, 0x10, 0x00).is_well_formed()); // A2 below range
        assert!(!Address::new(0xA1, 0x01, 0x10, 0xFF).is_well_formed()); // A2 above range
    }

    #[test]
    fn ordering_is_lexicographic_by_byte() {
        let a = Address::new(0xA1, 0x01, 0x10, 0x01);
        let b = Address::new(0xA1, 0x01, 0x10, 0x02);
        assert!(a < b);
    }

    #[test]
    fn serde_roundtrip() {
        let addr = Address::new(0xA1, 0x01, 0x10, 0x05);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"0xA1:01:10:05\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, back);
    }
}
