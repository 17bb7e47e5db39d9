use std::fmt;
use std::str::FromStr;

use ring::digest;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Sortable migration version, e.g. `20240101` or `20240101120000`.
///
/// Versions compare numerically, so `001` and `1` are the same version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Largest version the state store can persist (SQLite `INTEGER`).
    pub const MAX: Version = Version(i64::MAX as u64);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Fails with a discovery error for versions above [`Version::MAX`].
    pub fn check_storable(self) -> Result<(), Error> {
        if self > Self::MAX {
            return Err(Error::Discovery(format!(
                "version {self} is larger than the maximum {}",
                Self::MAX
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Discovery(format!("invalid version '{s}'")));
        }
        let version = s
            .parse::<u64>()
            .map(Self)
            .map_err(|e| Error::Discovery(format!("invalid version '{s}': {e}")))?;
        version.check_storable()?;
        Ok(version)
    }
}

/// Hex-encoded SHA-256 over the given parts.
///
/// Each part is length-prefixed so that moving text between the up and
/// down halves changes the fingerprint.
pub fn checksum<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut ctx = digest::Context::new(&digest::SHA256);
    for part in parts {
        ctx.update(&(part.len() as u64).to_be_bytes());
        ctx.update(part.as_bytes());
    }
    hex::encode(ctx.finish().as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_parse_and_compare_numerically() {
        let a: Version = "001".parse().unwrap();
        let b: Version = "1".parse().unwrap();
        let c: Version = "20240101".parse().unwrap();
        assert_eq!(a, b);
        assert!(c > a);
        assert_eq!(c.to_string(), "20240101");
    }

    #[test]
    fn invalid_versions_are_rejected() {
        assert!("".parse::<Version>().is_err());
        assert!("12a".parse::<Version>().is_err());
        assert!("-3".parse::<Version>().is_err());
        assert!("99999999999999999999999".parse::<Version>().is_err());
    }

    #[test]
    fn versions_beyond_sqlite_integer_are_rejected() {
        let max: Version = "9223372036854775807".parse().unwrap();
        assert_eq!(max, Version::MAX);

        let err = "10000000000000000000".parse::<Version>().unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));
        assert!(Version::new(u64::MAX).check_storable().is_err());
        assert!(Version::new(20240101).check_storable().is_ok());
    }

    #[test]
    fn checksum_is_stable_and_sensitive_to_boundaries() {
        let one = checksum(["CREATE TABLE t (id INTEGER);", "DROP TABLE t;"]);
        let two = checksum(["CREATE TABLE t (id INTEGER);", "DROP TABLE t;"]);
        assert_eq!(one, two);
        assert_eq!(one.len(), 64);

        assert_ne!(checksum(["ab", "c"]), checksum(["a", "bc"]));
    }
}
