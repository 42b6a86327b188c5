//! Twelve-byte document identifiers.
//!
//! An [`ObjectId`] is laid out as a 4-byte big-endian unix timestamp
//! (seconds), 5 process-unique random bytes and a 3-byte big-endian
//! counter. It renders as 24 lowercase hex characters and serializes as
//! that string.
//!
//! Operations that take an id accept an [`IdRef`]: either an already-typed
//! id or a raw string. Raw strings are coerced when they are valid ids and
//! rejected with [`StoreError::InvalidId`] otherwise.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::StoreError;

const COUNTER_MASK: u32 = 0x00ff_ffff;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

fn process_unique() -> &'static [u8; 5] {
    static UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();
    UNIQUE.get_or_init(|| {
        let random = uuid::Uuid::new_v4();
        let mut out = [0u8; 5];
        out.copy_from_slice(&random.as_bytes()[..5]);
        out
    })
}

fn counter() -> &'static AtomicU32 {
    static COUNTER: OnceLock<AtomicU32> = OnceLock::new();
    COUNTER.get_or_init(|| {
        let random = uuid::Uuid::new_v4();
        let b = random.as_bytes();
        AtomicU32::new(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    })
}

impl ObjectId {
    /// Generates a fresh id stamped with the current time.
    pub fn new() -> Self {
        let secs = chrono::Utc::now().timestamp().max(0) as u32;
        let count = counter().fetch_add(1, Ordering::SeqCst) & COUNTER_MASK;

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(process_unique());
        bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Seconds since the epoch encoded in the first four bytes.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// True when `s` is exactly 24 hex characters.
    pub fn is_valid(s: &str) -> bool {
        s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for ObjectId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !Self::is_valid(s) {
            return Err(StoreError::InvalidId(s.to_string()));
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| StoreError::InvalidId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An id argument: typed, or a raw string still to be coerced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdRef {
    Typed(ObjectId),
    Raw(String),
}

impl IdRef {
    /// Coerces into an [`ObjectId`], failing with a cast error for malformed input.
    pub fn resolve(&self) -> Result<ObjectId, StoreError> {
        match self {
            IdRef::Typed(id) => Ok(*id),
            IdRef::Raw(s) => s.parse(),
        }
    }
}

impl From<ObjectId> for IdRef {
    fn from(id: ObjectId) -> Self {
        IdRef::Typed(id)
    }
}

impl From<&ObjectId> for IdRef {
    fn from(id: &ObjectId) -> Self {
        IdRef::Typed(*id)
    }
}

impl From<&str> for IdRef {
    fn from(s: &str) -> Self {
        IdRef::Raw(s.to_string())
    }
}

impl From<String> for IdRef {
    fn from(s: String) -> Self {
        IdRef::Raw(s)
    }
}

impl From<&String> for IdRef {
    fn from(s: &String) -> Self {
        IdRef::Raw(s.clone())
    }
}
