//! The account directory interface consumed by the relay core.

use courier_core::{Identity, PermissionTier};

use crate::errors::Result;

/// An authenticated account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    /// The account's identity (its name).
    pub identity: Identity,
    /// The account's tier.
    pub tier: PermissionTier,
}

/// Which accounts a delete call targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteTarget {
    /// Exactly these names. Unknown names are skipped.
    Named(Vec<String>),
    /// Every account the caller is allowed to manage.
    All,
}

/// Account storage and policy, scoped by the caller's tier.
///
/// Scope rules shared by every implementation:
/// - root manages every non-root account
/// - admin manages only accounts it created
/// - normal manages nothing
///
/// Calls are synchronous; async callers should run them on a blocking
/// thread.
pub trait AccountDirectory: Send + Sync {
    /// Check a name/password pair. `Ok(None)` means the credentials are wrong.
    fn verify_credentials(&self, name: &str, password: &str) -> Result<Option<Account>>;

    /// Create an account owned by `caller`.
    ///
    /// The new account's tier is one below the caller's (root → admin,
    /// admin → normal).
    fn create_account(
        &self,
        caller: &Identity,
        caller_tier: PermissionTier,
        name: &str,
        password: &str,
    ) -> Result<Identity>;

    /// Delete accounts within the caller's scope. Returns how many were removed.
    ///
    /// A named account outside the caller's scope fails the whole call and
    /// nothing is deleted.
    fn delete_accounts(
        &self,
        caller: &Identity,
        caller_tier: PermissionTier,
        target: &DeleteTarget,
    ) -> Result<usize>;

    /// A page of account names visible to the caller, in creation order.
    ///
    /// `length = None` returns everything from `start` on.
    fn list_accounts(
        &self,
        caller: &Identity,
        caller_tier: PermissionTier,
        start: usize,
        length: Option<usize>,
    ) -> Result<Vec<String>>;
}
