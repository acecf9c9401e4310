//! First-run initialization.
//!
//! Creates the schema and seeds the fixed super-administrator account so a
//! fresh deployment is immediately operable. Idempotent: an existing
//! database passes through untouched.

use tracing::{info, warn};

use crate::auth::Role;
use crate::errors::VaultResult;
use crate::store::Store;

/// Fixed bootstrap credentials. Hard-coded by requirement; the operator is
/// expected to rotate the password after first login.
pub const SUPER_ADMIN_USERNAME: &str = "super_admin";
pub const SUPER_ADMIN_PASSWORD: &str = "Admin_123?";

/// Create the schema if needed and seed the super-administrator when
/// absent. Returns whether the account was created this run.
pub async fn initialize(store: &Store) -> VaultResult<bool> {
    store.initialize().await?;

    if store.get_account(SUPER_ADMIN_USERNAME).await?.is_some() {
        return Ok(false);
    }

    store
        .create_account(
            SUPER_ADMIN_USERNAME,
            SUPER_ADMIN_PASSWORD,
            "Super",
            "Administrator",
            Role::SuperAdmin,
        )
        .await?;

    info!(username = SUPER_ADMIN_USERNAME, "bootstrap super-administrator created");
    warn!("bootstrap credentials are well-known; rotate the password after first login");

    Ok(true)
}
