//! Cluster-visible coordination store.
//!
//! The shared registry is a small TTL-based key/value store that every
//! scheduler instance in a cluster can see. It is used for claim markers,
//! job-availability advertisements and cluster-wide counters, never as a
//! system of record.
//!
//! # Architecture
//!
//! ```text
//!   instance A ──┐                        ┌── instance B
//!                │   ┌────────────────┐   │
//!   set_if_absent├──►│ SharedRegistry │◄──┤ set_if_absent
//!   increment    │   │  (TTL on access)│  │ keys_with_prefix
//!                │   └────────────────┘   │
//! ```
//!
//! Every successful `get`/`put` on a key resets its TTL ("keep warm on
//! access"). A key that is not touched for its TTL reads back as absent.
//!
//! [`MemoryRegistry`] is the in-process implementation used by single-node
//! deployments and tests. Several schedulers can share one instance via
//! `Arc` to form a cluster inside one process.

pub mod keys;
mod memory;

pub use keys::ClusterKeys;
pub use memory::MemoryRegistry;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Default time-to-live applied by [`SharedRegistry::put`].
pub const DEFAULT_ENTRY_TTL: Duration = Duration::from_secs(3600);

/// Value stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryValue {
    /// Plain string
    Text(String),
    /// 32-bit counter
    Int(i32),
    /// 64-bit counter or timestamp
    Long(i64),
    /// URI (kept distinct from text so readers can tell them apart)
    Uri(String),
    /// Opaque serialized struct
    Blob(Vec<u8>),
}

impl RegistryValue {
    /// Serializes a struct into a [`RegistryValue::Blob`].
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, RegistryError> {
        Ok(Self::Blob(serde_json::to_vec(value)?))
    }

    /// Deserializes a struct previously stored with [`RegistryValue::encode`].
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, RegistryError> {
        match self {
            Self::Blob(bytes) => Ok(serde_json::from_slice(bytes)?),
            other => Err(RegistryError::TypeMismatch {
                expected: "blob",
                found: other.kind(),
            }),
        }
    }

    /// Returns the value as text, if it is `Text` or `Uri`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Uri(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value widened to `i64`, if it is numeric.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Uri(_) => "uri",
            Self::Blob(_) => "blob",
        }
    }
}

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The backing store cannot be reached
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    /// A read-modify-write targeted a key holding a different value type
    #[error("registry type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// An increment would leave the counter's range
    #[error("registry counter {key} would overflow")]
    Overflow { key: String },

    /// A stored blob could not be (de)serialized
    #[error("registry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegistryError {
    /// Returns true if the error means the store itself is unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Cluster-visible key/value store with TTL-on-access expiry.
///
/// All read-modify-write primitives are atomic per key.
pub trait SharedRegistry: Send + Sync + 'static {
    /// Reads a key, resetting its TTL. Absent or expired keys return `None`.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<RegistryValue>, RegistryError>> + Send;

    /// Writes a key with [`DEFAULT_ENTRY_TTL`].
    fn put(
        &self,
        key: &str,
        value: RegistryValue,
    ) -> impl Future<Output = Result<(), RegistryError>> + Send;

    /// Writes a key with an explicit TTL.
    fn put_with_ttl(
        &self,
        key: &str,
        value: RegistryValue,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), RegistryError>> + Send;

    /// Removes a key. Returns true if a live entry was removed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, RegistryError>> + Send;

    /// Atomically adds to an `Int` key, initializing it to `amount` if absent.
    ///
    /// Fails with [`RegistryError::Overflow`] instead of wrapping; the stored
    /// value is left unchanged.
    fn increment_int(
        &self,
        key: &str,
        amount: i32,
    ) -> impl Future<Output = Result<i32, RegistryError>> + Send;

    /// Atomically adds to a `Long` key, initializing it to `amount` if absent.
    ///
    /// Overflow is reported as for [`increment_int`](Self::increment_int).
    fn increment_long(
        &self,
        key: &str,
        amount: i64,
    ) -> impl Future<Output = Result<i64, RegistryError>> + Send;

    /// Writes a key only if no live entry exists.
    ///
    /// Returns `true` if this caller won the write, `false` if the key was
    /// already present.
    fn set_if_absent(
        &self,
        key: &str,
        value: RegistryValue,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, RegistryError>> + Send;

    /// Lists live keys starting with `prefix`, sorted. Does not refresh TTLs.
    fn keys_with_prefix(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<String>, RegistryError>> + Send;
}
