//! `SQLite`-backed [`AccountDirectory`].

use courier_core::{Identity, PermissionTier};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::connection::ConnectionPool;
use crate::directory::{Account, AccountDirectory, DeleteTarget};
use crate::errors::{DirectoryError, Result};
use crate::migrations::run_migrations;
use crate::password::{self, PasswordHash};

/// One stored account row, as needed for scope checks.
struct AccountRow {
    id: i64,
    tier: PermissionTier,
    created_by: Option<i64>,
}

/// Account directory stored in `SQLite`.
#[derive(Clone)]
pub struct SqliteDirectory {
    pool: ConnectionPool,
}

impl SqliteDirectory {
    /// Wrap a pool, running pending migrations first.
    pub fn open(pool: ConnectionPool) -> Result<Self> {
        {
            let mut conn = pool.get()?;
            let _ = run_migrations(&mut conn)?;
        }
        Ok(Self { pool })
    }

    /// Create the root account if no account named `name` exists.
    ///
    /// Returns `true` when the account was created. An existing account with
    /// that name but a lower tier is an error.
    pub fn ensure_root(&self, name: &str, password: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        if let Some(row) = find(&conn, name)? {
            if row.tier != PermissionTier::Root {
                return Err(DirectoryError::Internal(format!(
                    "account '{name}' exists with tier {}",
                    row.tier
                )));
            }
            return Ok(false);
        }
        insert(&conn, name, password, PermissionTier::Root, None)?;
        info!(name, "root account created");
        Ok(true)
    }

    /// Total number of stored accounts (all tiers).
    pub fn count(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or_default())
    }
}

impl AccountDirectory for SqliteDirectory {
    fn verify_credentials(&self, name: &str, password: &str) -> Result<Option<Account>> {
        let conn = self.pool.get()?;
        let stored: Option<(String, String, String)> = conn
            .query_row(
                "SELECT password_hash, salt, tier FROM accounts WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((digest, salt, tier)) = stored else {
            debug!(name, "login for unknown account");
            return Ok(None);
        };
        if !password::verify(password, &salt, &digest) {
            debug!(name, "login with wrong password");
            return Ok(None);
        }
        Ok(Some(Account {
            identity: Identity::from(name),
            tier: parse_tier(&tier)?,
        }))
    }

    fn create_account(
        &self,
        caller: &Identity,
        caller_tier: PermissionTier,
        name: &str,
        password: &str,
    ) -> Result<Identity> {
        let Some(tier) = caller_tier.child_tier() else {
            return Err(DirectoryError::Forbidden(format!(
                "{caller_tier} accounts cannot create accounts"
            )));
        };

        let conn = self.pool.get()?;
        let caller_id = lookup_caller(&conn, caller)?;
        if find(&conn, name)?.is_some() {
            return Err(DirectoryError::DuplicateAccount(name.to_owned()));
        }
        insert(&conn, name, password, tier, Some(caller_id))?;
        info!(caller = %caller, name, tier = %tier, "account created");
        Ok(Identity::from(name))
    }

    fn delete_accounts(
        &self,
        caller: &Identity,
        caller_tier: PermissionTier,
        target: &DeleteTarget,
    ) -> Result<usize> {
        if !caller_tier.can_manage_accounts() {
            return Err(DirectoryError::Forbidden(format!(
                "{caller_tier} accounts cannot delete accounts"
            )));
        }

        let mut conn = self.pool.get()?;
        let caller_id = lookup_caller(&conn, caller)?;
        let tx = conn.transaction()?;

        let removed = match target {
            DeleteTarget::All => match caller_tier {
                PermissionTier::Root => tx.execute("DELETE FROM accounts WHERE tier != 'root'", [])?,
                _ => tx.execute(
                    "DELETE FROM accounts WHERE created_by = ?1",
                    params![caller_id],
                )?,
            },
            DeleteTarget::Named(names) => {
                let mut removed = 0;
                for name in names {
                    let Some(row) = find(&tx, name)? else {
                        debug!(name, "delete of unknown account skipped");
                        continue;
                    };
                    if !manages(caller_id, caller_tier, &row) {
                        warn!(caller = %caller, name, "delete outside caller scope rejected");
                        return Err(DirectoryError::Forbidden(format!(
                            "{caller} may not delete '{name}'"
                        )));
                    }
                    removed += tx.execute("DELETE FROM accounts WHERE id = ?1", params![row.id])?;
                }
                removed
            }
        };

        tx.commit()?;
        info!(caller = %caller, removed, "accounts deleted");
        Ok(removed)
    }

    fn list_accounts(
        &self,
        caller: &Identity,
        caller_tier: PermissionTier,
        start: usize,
        length: Option<usize>,
    ) -> Result<Vec<String>> {
        let conn = self.pool.get()?;
        // SQLite treats a negative LIMIT as unbounded.
        let limit = length.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        let offset = i64::try_from(start).unwrap_or(i64::MAX);

        let names = match caller_tier {
            PermissionTier::Root => {
                let mut stmt = conn.prepare(
                    "SELECT name FROM accounts WHERE tier != 'root'
                     ORDER BY id LIMIT ?1 OFFSET ?2",
                )?;
                stmt.query_map(params![limit, offset], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?
            }
            PermissionTier::Admin => {
                let caller_id = lookup_caller(&conn, caller)?;
                let mut stmt = conn.prepare(
                    "SELECT name FROM accounts WHERE created_by = ?1
                     ORDER BY id LIMIT ?2 OFFSET ?3",
                )?;
                stmt.query_map(params![caller_id, limit, offset], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?
            }
            PermissionTier::Normal => Vec::new(),
        };
        Ok(names)
    }
}

fn manages(caller_id: i64, caller_tier: PermissionTier, row: &AccountRow) -> bool {
    match caller_tier {
        PermissionTier::Root => row.tier != PermissionTier::Root,
        PermissionTier::Admin => row.created_by == Some(caller_id),
        PermissionTier::Normal => false,
    }
}

fn find(conn: &Connection, name: &str) -> Result<Option<AccountRow>> {
    let row = conn
        .query_row(
            "SELECT id, tier, created_by FROM accounts WHERE name = ?1",
            params![name],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            },
        )
        .optional()?;
    row.map(|(id, tier, created_by)| {
        Ok(AccountRow {
            id,
            tier: parse_tier(&tier)?,
            created_by,
        })
    })
    .transpose()
}

fn lookup_caller(conn: &Connection, caller: &Identity) -> Result<i64> {
    find(conn, caller)?
        .map(|row| row.id)
        .ok_or_else(|| DirectoryError::Forbidden(format!("caller '{caller}' no longer exists")))
}

fn insert(
    conn: &Connection,
    name: &str,
    password: &str,
    tier: PermissionTier,
    created_by: Option<i64>,
) -> Result<()> {
    let hash = PasswordHash::generate(password);
    let result = conn.execute(
        "INSERT INTO accounts (name, password_hash, salt, tier, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            name,
            hash.digest,
            hash.salt,
            tier.as_str(),
            created_by,
            chrono::Utc::now().to_rfc3339()
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(DirectoryError::DuplicateAccount(name.to_owned()))
        }
        Err(e) => Err(e.into()),
    }
}

fn parse_tier(s: &str) -> Result<PermissionTier> {
    s.parse()
        .map_err(|e: courier_core::tier::UnknownTier| DirectoryError::Internal(e.to_string()))
}
