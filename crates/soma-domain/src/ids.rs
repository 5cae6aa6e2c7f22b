use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a typed UUID newtype. Every identifier in the system is
/// UUID-shaped; the newtypes keep repository ids from being handed to
/// bucket lookups and vice versa.
macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                $name(id)
            }

            /// A fresh random (v4) identifier.
            pub fn generate() -> Self {
                $name(Uuid::new_v4())
            }

            pub fn nil() -> Self {
                $name(Uuid::nil())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok($name(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                $name(id)
            }
        }
    };
}

uuid_id!(RepositoryId);
uuid_id!(BucketId);
uuid_id!(
    /// Identifier of any element in a repository tree, regardless of kind.
    ElementId
);
uuid_id!(
    /// Identifier of one concrete property placement. Inherited copies get
    /// their own instance id; the shared lineage is the source instance id.
    PropertyInstanceId
);
uuid_id!(CheckId);
uuid_id!(CheckInstanceId);
uuid_id!(JobId);
uuid_id!(TeamId);
uuid_id!(UserId);
uuid_id!(SectionId);
uuid_id!(ActionId);
uuid_id!(PermissionId);
uuid_id!(MonitoringId);
uuid_id!(CapabilityId);
uuid_id!(OncallId);
uuid_id!(ServerId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_strings() {
        let id = RepositoryId::generate();
        let parsed: RepositoryId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn distinct_types_hash_identically_but_do_not_mix() {
        let raw = Uuid::new_v4();
        let repo = RepositoryId::new(raw);
        let bucket = BucketId::new(raw);
        assert_eq!(repo.as_uuid(), bucket.as_uuid());
    }
}
