//! Domain identifiers.
//!
//! The dashboard hands out numeric ids for every object it owns. Each kind of
//! object gets its own newtype so a platform id can never be passed where a
//! build request id is expected.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
            Display, From,
        )]
        #[serde(transparent)]
        #[display("{_0}")]
        pub struct $name(u64);

        impl $name {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(s.trim().parse()?))
            }
        }
    };
}

numeric_id!(
    /// Identifier of a test in the dashboard's test tree.
    TestId
);
numeric_id!(
    /// Identifier of a platform.
    PlatformId
);
numeric_id!(
    /// Identifier of a top-level repository.
    RepositoryId
);
numeric_id!(
    /// Identifier of a commit set.
    CommitSetId
);
numeric_id!(
    /// Identifier of a build request. This is the value sent to the remote
    /// service under the build request argument.
    BuildRequestId
);
numeric_id!(
    /// Identifier of a test group, the scheduling group of its build requests.
    TestGroupId
);
numeric_id!(UploadedFileId);
