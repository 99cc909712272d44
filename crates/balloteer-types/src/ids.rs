//! Type-safe identifier wrappers.
//!
//! Communities and actors are identified by the numeric ids the messaging
//! platform assigns them (group chats and users respectively), so both wrap
//! an `i64`. Proposal ids are allocated by the engine from a per-community
//! counter starting at 1.
//!
//! Wrapping the raw integers prevents a voter id from being passed where a
//! community id is expected; the compiler rejects the mix.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Generates a newtype wrapper around a numeric id with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident($inner:ty)
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub $inner);

        impl $name {
            /// Wrap a raw platform identifier.
            pub const fn new(raw: $inner) -> Self {
                Self(raw)
            }

            /// Return the raw identifier value.
            pub const fn into_inner(self) -> $inner {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(raw: $inner) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for $inner {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Identifier of a governed community (the group chat it lives in).
    CommunityId(i64)
}

define_id! {
    /// Identifier of a person interacting with the engine: an admin, a
    /// voter, or both.
    ActorId(i64)
}

define_id! {
    /// Identifier of a proposal, unique and monotonic within its community.
    ProposalId(u32)
}
