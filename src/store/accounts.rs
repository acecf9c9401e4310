//! Account persistence.
//!
//! Usernames are addressed through [`username_lookup_hash`]; the encrypted
//! username column is display data only. Uniqueness rides on the hash, so
//! two usernames differing only by case collide.

use chrono::Utc;
use sqlx::{query, query_as};

use crate::audit::SYSTEM_ACTOR;
use crate::auth::Role;
use crate::credentials::{generate_temp_password, hash_password};
use crate::errors::VaultResult;

use super::{map_db_error, username_lookup_hash, Store};

/// A fully decrypted account row.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub username: String,
    /// PHC-format argon2id hash. Never logged, never displayed.
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub registration_date: String,
}

/// Typed partial update for an account. Only these fields can be expressed,
/// so callers cannot smuggle in unrecognized columns.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<Role>,
}

impl AccountUpdate {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none() && self.last_name.is_none() && self.role.is_none()
    }
}

impl Store {
    /// Create an account. A username colliding on the lookup hash (including
    /// case-only differences) surfaces as
    /// [`crate::errors::VaultError::AlreadyExists`].
    pub async fn create_account(
        &self,
        username: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
        role: Role,
    ) -> VaultResult<()> {
        let cipher = self.cipher();
        let password_hash = hash_password(password)?;
        let registration_date = Utc::now().to_rfc3339();

        query(
            "INSERT INTO accounts (username_hash, username, password_hash, first_name, \
                                   last_name, role, registration_date) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(username_lookup_hash(username))
        .bind(cipher.encrypt(username)?)
        .bind(password_hash)
        .bind(cipher.encrypt(first_name)?)
        .bind(cipher.encrypt(last_name)?)
        .bind(cipher.encrypt(role.as_str())?)
        .bind(cipher.encrypt(&registration_date)?)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_error(e, "username already exists"))?;

        self.audit()
            .record(
                SYSTEM_ACTOR,
                "New user account created",
                &format!("Username: {username}, Role: {role}"),
                false,
            )
            .await;

        Ok(())
    }

    /// Fetch an account by username. `Ok(None)` when unknown.
    pub async fn get_account(&self, username: &str) -> VaultResult<Option<Account>> {
        let row: Option<(i64, String, String, String, String, String, String)> = query_as(
            "SELECT id, username, password_hash, first_name, last_name, role, \
                    registration_date \
             FROM accounts WHERE username_hash = ?",
        )
        .bind(username_lookup_hash(username))
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_db_error(e, "account"))?;

        let Some((id, enc_username, password_hash, first_name, last_name, role, reg_date)) = row
        else {
            return Ok(None);
        };

        let cipher = self.cipher();
        // A damaged role column must not take down the read; the record
        // surfaces with a role that holds no capabilities.
        let role = Role::parse(&cipher.decrypt_lossy(&role)).unwrap_or(Role::Unknown);

        Ok(Some(Account {
            id,
            username: cipher.decrypt_lossy(&enc_username),
            password_hash,
            first_name: cipher.decrypt_lossy(&first_name),
            last_name: cipher.decrypt_lossy(&last_name),
            role,
            registration_date: cipher.decrypt_lossy(&reg_date),
        }))
    }

    /// All accounts, decrypted. A corrupt field shows up as the decryption
    /// sentinel, and a corrupt role as [`Role::Unknown`], rather than
    /// aborting or thinning the listing.
    pub async fn list_accounts(&self) -> VaultResult<Vec<Account>> {
        let rows: Vec<(i64, String, String, String, String, String, String)> = query_as(
            "SELECT id, username, password_hash, first_name, last_name, role, \
                    registration_date \
             FROM accounts ORDER BY id",
        )
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_db_error(e, "accounts"))?;

        let cipher = self.cipher();
        Ok(rows
            .into_iter()
            .map(
                |(id, username, password_hash, first_name, last_name, role, reg_date)| Account {
                    id,
                    username: cipher.decrypt_lossy(&username),
                    password_hash,
                    first_name: cipher.decrypt_lossy(&first_name),
                    last_name: cipher.decrypt_lossy(&last_name),
                    role: Role::parse(&cipher.decrypt_lossy(&role)).unwrap_or(Role::Unknown),
                    registration_date: cipher.decrypt_lossy(&reg_date),
                },
            )
            .collect())
    }

    /// Apply a partial profile update. An empty update is a no-op returning
    /// `Ok(false)`; `Ok(false)` is also the unknown-username result.
    pub async fn update_account(&self, username: &str, update: AccountUpdate) -> VaultResult<bool> {
        if update.is_empty() {
            return Ok(false);
        }
        let Some(current) = self.get_account(username).await? else {
            return Ok(false);
        };

        let first_name = update.first_name.unwrap_or(current.first_name);
        let last_name = update.last_name.unwrap_or(current.last_name);
        let role = update.role.unwrap_or(current.role);

        let cipher = self.cipher();
        let result = query(
            "UPDATE accounts SET first_name = ?, last_name = ?, role = ? \
             WHERE username_hash = ?",
        )
        .bind(cipher.encrypt(&first_name)?)
        .bind(cipher.encrypt(&last_name)?)
        .bind(cipher.encrypt(role.as_str())?)
        .bind(username_lookup_hash(username))
        .execute(self.pool())
        .await
        .map_err(|e| map_db_error(e, "account"))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        self.audit()
            .record(
                username,
                "User account updated",
                "Profile fields changed",
                false,
            )
            .await;
        Ok(true)
    }

    /// Replace the stored password hash.
    pub async fn update_password(&self, username: &str, new_password: &str) -> VaultResult<bool> {
        let password_hash = hash_password(new_password)?;

        let result = query("UPDATE accounts SET password_hash = ? WHERE username_hash = ?")
            .bind(password_hash)
            .bind(username_lookup_hash(username))
            .execute(self.pool())
            .await
            .map_err(|e| map_db_error(e, "account"))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        self.audit()
            .record(username, "Password updated", "User password change", false)
            .await;
        Ok(true)
    }

    /// Generate and store a temporary password, returning it exactly once.
    /// `Ok(None)` when the username is unknown.
    pub async fn reset_password(&self, username: &str) -> VaultResult<Option<String>> {
        let temp_password = generate_temp_password();
        let password_hash = hash_password(&temp_password)?;

        let result = query("UPDATE accounts SET password_hash = ? WHERE username_hash = ?")
            .bind(password_hash)
            .bind(username_lookup_hash(username))
            .execute(self.pool())
            .await
            .map_err(|e| map_db_error(e, "account"))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.audit()
            .record(
                SYSTEM_ACTOR,
                "Password reset",
                &format!("Temporary password issued for: {username}"),
                false,
            )
            .await;
        Ok(Some(temp_password))
    }

    /// Hard-delete an account. `Ok(false)` when the username is unknown.
    pub async fn delete_account(&self, username: &str) -> VaultResult<bool> {
        let result = query("DELETE FROM accounts WHERE username_hash = ?")
            .bind(username_lookup_hash(username))
            .execute(self.pool())
            .await
            .map_err(|e| map_db_error(e, "account"))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        self.audit()
            .record(
                SYSTEM_ACTOR,
                "User account deleted",
                &format!("Username: {username}"),
                false,
            )
            .await;
        Ok(true)
    }
}
