//! Firmware versions reported by the board during the handshake.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::protocol::IsotopeError;

/// A `major.minor.patch` firmware version.
///
/// Ordering is lexicographic over the three components, which is what the
/// compatibility floor check relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FirmwareVersion {
    /// Version reported implicitly by boards that answer with the bare legacy name.
    pub const ZERO: FirmwareVersion = FirmwareVersion::new(0, 0, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl FromStr for FirmwareVersion {
    type Err = IsotopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(IsotopeError::InvalidFirmwareFormat(format!(
                "expected major.minor.patch, got {:?}",
                s
            )));
        }

        let mut numbers = [0u32; 3];
        for (slot, part) in numbers.iter_mut().zip(parts) {
            *slot = part.parse().map_err(|_| {
                IsotopeError::InvalidFirmwareFormat(format!("invalid version component {:?}", part))
            })?;
        }

        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for FirmwareVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FirmwareVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let v: FirmwareVersion = "1.2.3".parse().unwrap();
        assert_eq!(v, FirmwareVersion::new(1, 2, 3));
        assert_eq!(v.to_string(), "1.2.3");
    }

    #[test]
    fn test_ordering_is_component_wise() {
        let a = FirmwareVersion::new(1, 0, 0);
        let b = FirmwareVersion::new(1, 1, 0);
        let c = FirmwareVersion::new(0, 9, 99);
        assert!(a < b);
        assert!(c < a);
        assert!(FirmwareVersion::new(1, 10, 0) > FirmwareVersion::new(1, 9, 0));
    }

    #[test]
    fn test_rejects_bad_formats() {
        assert!("1.0".parse::<FirmwareVersion>().is_err());
        assert!("1.0.x".parse::<FirmwareVersion>().is_err());
        assert!("".parse::<FirmwareVersion>().is_err());
        assert!("1.0.0.0".parse::<FirmwareVersion>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let v = FirmwareVersion::new(2, 0, 1);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"2.0.1\"");
        let back: FirmwareVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
