//! Content fingerprinting used to key connection caches and dynamic blobs.
//!
//! Trimmed from a much larger hashing crate: this one keeps only the
//! `Fingerprint` newtype and a canonical encoding helper, since the core
//! doesn't need a `Digest` (fingerprint + size) type or remote-execution
//! compatible wire formats.

use std::fmt;
use std::str::FromStr;

use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as Sha256Digest, Sha256};

pub const FINGERPRINT_SIZE: usize = 32;

/// A hash identifying a chunk of content: a connection's resolved option map, or a blob key.
///
/// The underlying hash function is swappable (e.g. for FIPS-constrained environments) by
/// changing `hash_bytes` in one place; callers never construct a `Fingerprint` by hand.
#[derive(Clone, Copy, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Fingerprint(pub [u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    pub fn hash_bytes(bytes: &[u8]) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut fingerprint = [0u8; FINGERPRINT_SIZE];
        fingerprint.copy_from_slice(&digest);
        Fingerprint(fingerprint)
    }

    pub fn from_hex_string(hex_string: &str) -> Result<Fingerprint, String> {
        let bytes = hex::decode(hex_string).map_err(|e| format!("{e:?}"))?;
        if bytes.len() != FINGERPRINT_SIZE {
            return Err(format!(
                "expected {FINGERPRINT_SIZE} bytes, got {}",
                bytes.len()
            ));
        }
        let mut fingerprint = [0u8; FINGERPRINT_SIZE];
        fingerprint.copy_from_slice(&bytes);
        Ok(Fingerprint(fingerprint))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint<{}>", self.to_hex())
    }
}

impl AsRef<[u8]> for Fingerprint {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}

impl FromStr for Fingerprint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Fingerprint::from_hex_string(s)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.to_hex().as_str())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FingerprintVisitor;

        impl Visitor<'_> for FingerprintVisitor {
            type Value = Fingerprint;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a hex-encoded fingerprint")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Fingerprint::from_hex_string(v).map_err(|err| {
                    serde::de::Error::invalid_value(serde::de::Unexpected::Str(v), &err.as_str())
                })
            }
        }

        deserializer.deserialize_str(FingerprintVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let fp = Fingerprint::hash_bytes(b"hello world");
        let hex = fp.to_hex();
        let parsed = Fingerprint::from_hex_string(&hex).unwrap();
        assert_eq!(fp, parsed);
    }

    #[test]
    fn deterministic() {
        assert_eq!(
            Fingerprint::hash_bytes(b"abc"),
            Fingerprint::hash_bytes(b"abc")
        );
        assert_ne!(
            Fingerprint::hash_bytes(b"abc"),
            Fingerprint::hash_bytes(b"abd")
        );
    }

    #[test]
    fn bad_hex_length_rejected() {
        assert!(Fingerprint::from_hex_string("ab").is_err());
    }
}
