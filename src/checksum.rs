use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque content fingerprint stored next to every blob.
///
/// The store never interprets the bytes; it only compares them for equality.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(Vec<u8>);

impl Checksum {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// blake3 digest of `content`.
    pub fn of(content: &[u8]) -> Self {
        Self(blake3::hash(content).as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    /// Column form of an optional checksum; absence is stored as an empty blob.
    pub(crate) fn to_column(checksum: Option<&Checksum>) -> &[u8] {
        checksum.map(Checksum::as_bytes).unwrap_or(&[])
    }

    pub(crate) fn from_column(bytes: Vec<u8>) -> Option<Checksum> {
        if bytes.is_empty() {
            None
        } else {
            Some(Checksum(bytes))
        }
    }
}

impl From<&str> for Checksum {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<&[u8]> for Checksum {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}
