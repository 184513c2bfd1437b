//! Permission tiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Privilege tier carried on an authenticated session.
///
/// Declaration order is privilege order: a *lower* variant is *more*
/// privileged, so `PermissionTier::Root < PermissionTier::Admin`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionTier {
    /// May manage every non-root account.
    Root,
    /// May manage only the accounts it created.
    Admin,
    /// No account-management rights.
    Normal,
}

impl PermissionTier {
    /// Whether this tier may run `adduser` / `deluser`.
    pub fn can_manage_accounts(self) -> bool {
        self < Self::Normal
    }

    /// Tier assigned to accounts created by a caller of this tier.
    ///
    /// Root creates admins, admins create normal users, normal users
    /// create nothing.
    pub fn child_tier(self) -> Option<Self> {
        match self {
            Self::Root => Some(Self::Admin),
            Self::Admin => Some(Self::Normal),
            Self::Normal => None,
        }
    }

    /// Wire / storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Admin => "admin",
            Self::Normal => "normal",
        }
    }
}

impl fmt::Display for PermissionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown tier name.
#[derive(Debug, thiserror::Error)]
#[error("unknown permission tier: {0}")]
pub struct UnknownTier(pub String);

impl FromStr for PermissionTier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(Self::Root),
            "admin" => Ok(Self::Admin),
            "normal" => Ok(Self::Normal),
            other => Err(UnknownTier(other.to_owned())),
        }
    }
}
