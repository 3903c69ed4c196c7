//! Typed ULID wrappers for compile-time type safety.
//!
//! `Id<T>` wraps a [`ulid::Ulid`] with an entity marker so an `AccountId`
//! cannot be passed where a `PaymentId` is expected. The string form is the
//! canonical 26-character, lexicographically sortable representation, which
//! is also how ids are persisted (TEXT columns) and serialized.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt::{self, Debug, Display};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// A typed wrapper around `Ulid`.
///
/// The type parameter `T` is the entity this id belongs to. Ids with
/// different markers are incompatible at compile time.
#[repr(transparent)]
pub struct Id<T>(Ulid, PhantomData<fn() -> T>);

// Entity markers.
pub struct AccountEntity;
pub struct PaymentEntity;
pub struct LedgerEntryEntity;
pub struct EventEntity;

pub type AccountId = Id<AccountEntity>;
pub type PaymentId = Id<PaymentEntity>;
pub type LedgerEntryId = Id<LedgerEntryEntity>;
pub type EventId = Id<EventEntity>;

impl<T> Id<T> {
    /// Creates a new id stamped with the current time.
    ///
    /// Lexicographic order of the string form approximates creation order,
    /// which keeps primary-key indexes append-mostly.
    #[inline]
    pub fn new() -> Self {
        Self(Ulid::new(), PhantomData)
    }

    /// Creates an `Id` from a raw `Ulid`.
    #[inline]
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid, PhantomData)
    }

    /// Returns the inner `Ulid`.
    #[inline]
    pub fn as_ulid(&self) -> &Ulid {
        &self.0
    }

    /// Parses an id from its 26-character string form.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?, PhantomData))
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(&format!("Id<{}>", std::any::type_name::<T>()))
            .field(&self.0)
            .finish()
    }
}

impl<T> Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl<T> Hash for Id<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<T> From<Id<T>> for String {
    fn from(id: Id<T>) -> Self {
        id.to_string()
    }
}

// ============================================================================
// Serde support (string form)
// ============================================================================

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// sqlx support (TEXT columns)
// ============================================================================

use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef, Postgres};
use sqlx::{Decode, Encode, Type};

impl<T> Type<Postgres> for Id<T> {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<T> Encode<'_, Postgres> for Id<T> {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <String as Encode<Postgres>>::encode(self.0.to_string(), buf)
    }
}

impl<T> Decode<'_, Postgres> for Id<T> {
    fn decode(value: PgValueRef<'_>) -> Result<Self, BoxDynError> {
        let s = <&str as Decode<Postgres>>::decode(value)?;
        Ok(Self::parse(s)?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_creates_unique_ids() {
        let a = PaymentId::new();
        let b = PaymentId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn string_form_is_26_chars() {
        let id = AccountId::new();
        assert_eq!(id.to_string().len(), 26);
    }

    #[test]
    fn parse_and_display_roundtrip() {
        let id = PaymentId::new();
        let parsed = PaymentId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serde_roundtrip_as_string() {
        let id = EventId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let parsed: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn ordering_tracks_creation_time() {
        let a = LedgerEntryId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = LedgerEntryId::new();
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(PaymentId::parse("not-a-ulid").is_err());
    }
}
