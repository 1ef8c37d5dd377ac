//! Resource identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a stored entity (plugin record, resource, secret, registry, ...).
///
/// New ids are UUIDv7 so they sort by creation time. Numeric ids coming from
/// hand-written configuration map onto the low bits of a nil UUID, so `3` and
/// `00000000-0000-0000-0000-000000000003` name the same entity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[display("{_0}")]
pub struct ResourceId(Uuid);

impl ResourceId {
    /// Create a new unique ResourceId using UUIDv7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Id for a numeric key, as used by configuration fixtures.
    pub fn from_number(n: u64) -> Self {
        Self(Uuid::from_u128(u128::from(n)))
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ResourceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::str::FromStr for ResourceId {
    type Err = uuid::Error;

    /// Accepts either a UUID or a plain decimal number.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u64>() {
            return Ok(Self::from_number(n));
        }
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_and_uuid_forms_agree() {
        let numeric: ResourceId = "3".parse().unwrap();
        let full: ResourceId = "00000000-0000-0000-0000-000000000003".parse().unwrap();
        assert_eq!(numeric, full);
        assert_eq!(numeric, ResourceId::from_number(3));
    }

    #[test]
    fn test_new_ids_are_unique() {
        let a = ResourceId::new();
        let b = ResourceId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!("not-an-id".parse::<ResourceId>().is_err());
    }
}
