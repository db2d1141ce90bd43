//! Core types used throughout the system
//!
//! Identifiers are ULID newtypes: sortable, no coordination needed, and
//! stored as 26-character TEXT in PostgreSQL. Each entity gets its own type so
//! an `AccountId` can never be passed where a `WithdrawalId` is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(ulid::Ulid);

        impl $name {
            /// Generate a new unique identifier
            pub fn new() -> Self {
                Self(ulid::Ulid::new())
            }

            /// Get the inner ULID value
            pub fn inner(&self) -> ulid::Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(ulid::Ulid::from_string(s)?))
            }
        }
    };
}

ulid_id!(
    /// Platform account (user) identifier
    AccountId
);
ulid_id!(
    /// Organization identifier
    OrganizationId
);
ulid_id!(
    /// Project identifier
    ProjectId
);
ulid_id!(
    /// Partner invitation identifier (the partner's seat in an organization)
    InvitationId
);
ulid_id!(
    /// Financial report snapshot identifier
    ReportId
);
ulid_id!(
    /// Ledger transaction identifier. Doubles as the rail idempotency key.
    TransactionId
);
ulid_id!(
    /// Withdrawal request identifier
    WithdrawalId
);

/// Who is performing a state-changing operation.
///
/// `System` is the automated settlement job; it may process approved
/// withdrawals but never create or approve them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Account(AccountId),
    System,
}

impl Actor {
    pub fn account_id(&self) -> Option<AccountId> {
        match self {
            Actor::Account(id) => Some(*id),
            Actor::System => None,
        }
    }

    /// True when the actor is exactly this account
    pub fn is(&self, account: AccountId) -> bool {
        self.account_id() == Some(account)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Account(id) => write!(f, "account:{}", id),
            Actor::System => write!(f, "system"),
        }
    }
}
