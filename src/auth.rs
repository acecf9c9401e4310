//! Authorization core: role hierarchy, session state and login throttling.
//!
//! A [`Session`] is an explicit state object owned by the caller; there are
//! no ambient globals, so test harnesses can run several sessions in
//! isolation. Every sensitive operation is gated through [`authorize`],
//! which both denies and writes a suspicious audit entry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::error;

use crate::audit::{AuditLog, UNKNOWN_ACTOR};
use crate::config::SecurityConfig;
use crate::credentials::verify_password;
use crate::errors::{VaultError, VaultResult};
use crate::store::Store;

/// Role hierarchy. Capabilities derive from the role, never from the
/// individual account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Super administrator: full control, including direct restores.
    SuperAdmin,
    /// System administrator: manages engineers, customers and equipment;
    /// restores only through a one-time code.
    SystemAdmin,
    /// Service engineer: may edit operational equipment fields only.
    ServiceEngineer,
    /// Fallback for a stored role that failed to decrypt or parse. Holds no
    /// capabilities, so a damaged account surfaces in listings without
    /// passing any guard.
    Unknown,
}

impl Role {
    /// Storage name, as persisted (encrypted) in account rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::SystemAdmin => "system_admin",
            Role::ServiceEngineer => "service_engineer",
            Role::Unknown => "unknown",
        }
    }

    /// Parse a storage name back into a role.
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "super_admin" => Some(Role::SuperAdmin),
            "system_admin" => Some(Role::SystemAdmin),
            "service_engineer" => Some(Role::ServiceEngineer),
            _ => None,
        }
    }

    /// Human-readable name for console display.
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "Super Administrator",
            Role::SystemAdmin => "System Administrator",
            Role::ServiceEngineer => "Service Engineer",
            Role::Unknown => "Unknown",
        }
    }

    /// Whether this role may create/update/delete/reset accounts of
    /// `target` role. Management never extends upward or laterally.
    pub fn can_manage_role(&self, target: Role) -> bool {
        match self {
            Role::SuperAdmin => matches!(target, Role::SystemAdmin | Role::ServiceEngineer),
            Role::SystemAdmin => target == Role::ServiceEngineer,
            Role::ServiceEngineer | Role::Unknown => false,
        }
    }

    pub fn can_manage_customers(&self) -> bool {
        matches!(self, Role::SuperAdmin | Role::SystemAdmin)
    }

    /// Full equipment CRUD.
    pub fn can_manage_equipment(&self) -> bool {
        matches!(self, Role::SuperAdmin | Role::SystemAdmin)
    }

    /// Editing operational equipment fields (charge, location, mileage,
    /// service status). The only equipment right engineers hold.
    pub fn can_edit_equipment_status(&self) -> bool {
        matches!(
            self,
            Role::SuperAdmin | Role::SystemAdmin | Role::ServiceEngineer
        )
    }

    pub fn can_access_logs(&self) -> bool {
        matches!(self, Role::SuperAdmin | Role::SystemAdmin)
    }

    pub fn can_backup_restore(&self) -> bool {
        matches!(self, Role::SuperAdmin | Role::SystemAdmin)
    }

    /// Restoring without a one-time code.
    pub fn can_restore_directly(&self) -> bool {
        *self == Role::SuperAdmin
    }

    pub fn can_issue_restore_codes(&self) -> bool {
        *self == Role::SuperAdmin
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated identity attached to a session.
#[derive(Debug, Clone)]
pub struct ActiveUser {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

/// Outcome of a login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Authenticated; the session now carries this identity.
    Success(Role),
    /// Username or password was empty. Does not consume a try.
    EmptyInput,
    /// Unknown username or wrong password.
    InvalidCredentials,
    /// The username is blocked by the rolling failure window.
    Throttled,
    /// The per-session try budget is spent.
    SessionExhausted,
}

/// Single active session plus the in-memory throttling state.
///
/// anonymous → authenticated(role) → anonymous (logout or restore-forced).
pub struct Session {
    current: Option<ActiveUser>,
    failed_attempts: HashMap<String, (u32, DateTime<Utc>)>,
    tries_this_session: u32,
    policy: SecurityConfig,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_policy(SecurityConfig::default())
    }

    pub fn with_policy(policy: SecurityConfig) -> Self {
        Self {
            current: None,
            failed_attempts: HashMap::new(),
            tries_this_session: 0,
            policy,
        }
    }

    /// Start a new login session: resets the per-session try budget while
    /// keeping the per-username failure counters, which outlive individual
    /// login sessions.
    pub fn begin_login_session(&mut self) {
        self.tries_this_session = 0;
    }

    /// The authenticated identity, if any.
    pub fn current(&self) -> Option<&ActiveUser> {
        self.current.as_ref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.current.is_some()
    }

    /// Whether `username` is currently blocked. An expired window resets
    /// the counter as a side effect.
    fn is_throttled(&mut self, username: &str) -> bool {
        let key = username.to_lowercase();
        match self.failed_attempts.get(&key) {
            Some(&(count, last_attempt)) => {
                let elapsed = (Utc::now() - last_attempt).num_seconds();
                if elapsed > self.policy.lockout_secs {
                    self.failed_attempts.remove(&key);
                    return false;
                }
                count >= self.policy.max_failed_logins
            }
            None => false,
        }
    }

    fn record_failure(&mut self, username: &str) {
        let key = username.to_lowercase();
        let entry = self.failed_attempts.entry(key).or_insert((0, Utc::now()));
        entry.0 += 1;
        entry.1 = Utc::now();
    }

    fn clear_failures(&mut self, username: &str) {
        self.failed_attempts.remove(&username.to_lowercase());
    }

    /// Authenticate against the store.
    ///
    /// Enforces, in order: non-empty input, the per-session try budget, the
    /// rolling per-username failure window, account lookup and password
    /// verification. Every denied or failed path is audited.
    pub async fn login(
        &mut self,
        store: &Store,
        audit: &AuditLog,
        username: &str,
        password: &str,
    ) -> LoginOutcome {
        let username = username.trim().to_lowercase();
        if username.is_empty() || password.is_empty() {
            return LoginOutcome::EmptyInput;
        }

        if self.tries_this_session >= self.policy.max_session_tries {
            audit
                .record(
                    &username,
                    "Login rejected: session attempt budget exhausted",
                    &format!("Limit: {} tries per session", self.policy.max_session_tries),
                    true,
                )
                .await;
            return LoginOutcome::SessionExhausted;
        }
        self.tries_this_session += 1;

        if self.is_throttled(&username) {
            audit
                .record(
                    &username,
                    "Login blocked due to too many failed attempts",
                    &format!("Lockout window: {} seconds", self.policy.lockout_secs),
                    true,
                )
                .await;
            return LoginOutcome::Throttled;
        }

        let account = match store.get_account(&username).await {
            Ok(account) => account,
            Err(e) => {
                error!("account lookup failed during login: {e}");
                None
            }
        };
        let account_exists = account.is_some();

        let verified = match &account {
            Some(account) => verify_password(password, &account.password_hash).unwrap_or(false),
            None => false,
        };

        if let (Some(account), true) = (account, verified) {
            self.clear_failures(&username);
            self.tries_this_session = 0;
            let role = account.role;
            self.current = Some(ActiveUser {
                id: account.id,
                username: account.username,
                role,
            });

            audit
                .record(&username, "Successful login", &format!("Role: {role}"), false)
                .await;

            LoginOutcome::Success(role)
        } else {
            self.record_failure(&username);

            // First miss in a session is routine; repeats are suspicious.
            let repeat = self.tries_this_session > 1;
            let actor = if account_exists { username.as_str() } else { UNKNOWN_ACTOR };
            audit
                .record(actor, "Failed login attempt", &format!("Username: {username}"), repeat)
                .await;

            LoginOutcome::InvalidCredentials
        }
    }

    /// Clear the session (normal logout). Audited.
    pub async fn logout(&mut self, audit: &AuditLog) {
        if let Some(user) = self.current.take() {
            audit
                .record(&user.username, "User logged out", "Normal logout", false)
                .await;
        }
        self.tries_this_session = 0;
    }

    /// Clear the session without the normal-logout audit trail; used after
    /// a restore replaces the account database.
    pub fn force_logout(&mut self) {
        self.current = None;
        self.tries_this_session = 0;
    }
}

/// Reusable permission guard: checks the active session against a required
/// role set and, on denial, both reports to the caller and writes a
/// suspicious audit entry naming actor, required roles and action.
pub async fn authorize(
    session: &Session,
    audit: &AuditLog,
    required: &[Role],
    action: &str,
) -> VaultResult<ActiveUser> {
    if let Some(user) = session.current() {
        if required.contains(&user.role) {
            return Ok(user.clone());
        }
    }

    let actor = session
        .current()
        .map(|u| u.username.as_str())
        .unwrap_or("Unknown");
    let current_role = session
        .current()
        .map(|u| u.role.as_str())
        .unwrap_or("None");
    let required_names: Vec<&str> = required.iter().map(Role::as_str).collect();

    audit
        .record(
            actor,
            "Unauthorized access attempt",
            &format!(
                "Required: {:?}, Current role: {}, Action: {}",
                required_names, current_role, action
            ),
            true,
        )
        .await;

    Err(VaultError::AccessDenied(format!(
        "insufficient permissions for {action}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_storage_name() {
        for role in [Role::SuperAdmin, Role::SystemAdmin, Role::ServiceEngineer] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn management_never_goes_upward_or_lateral() {
        assert!(Role::SuperAdmin.can_manage_role(Role::SystemAdmin));
        assert!(Role::SuperAdmin.can_manage_role(Role::ServiceEngineer));
        assert!(!Role::SuperAdmin.can_manage_role(Role::SuperAdmin));

        assert!(Role::SystemAdmin.can_manage_role(Role::ServiceEngineer));
        assert!(!Role::SystemAdmin.can_manage_role(Role::SystemAdmin));
        assert!(!Role::SystemAdmin.can_manage_role(Role::SuperAdmin));

        assert!(!Role::ServiceEngineer.can_manage_role(Role::ServiceEngineer));
    }

    #[test]
    fn capability_table_matches_hierarchy() {
        assert!(Role::SuperAdmin.can_restore_directly());
        assert!(!Role::SystemAdmin.can_restore_directly());

        assert!(Role::SystemAdmin.can_backup_restore());
        assert!(!Role::ServiceEngineer.can_backup_restore());

        assert!(!Role::ServiceEngineer.can_access_logs());
        assert!(!Role::ServiceEngineer.can_manage_customers());
        assert!(!Role::ServiceEngineer.can_manage_equipment());
        assert!(Role::ServiceEngineer.can_edit_equipment_status());

        assert!(Role::SuperAdmin.can_issue_restore_codes());
        assert!(!Role::SystemAdmin.can_issue_restore_codes());
    }

    #[test]
    fn unknown_role_holds_no_capabilities() {
        assert!(!Role::Unknown.can_manage_customers());
        assert!(!Role::Unknown.can_manage_equipment());
        assert!(!Role::Unknown.can_edit_equipment_status());
        assert!(!Role::Unknown.can_access_logs());
        assert!(!Role::Unknown.can_backup_restore());
        assert!(!Role::Unknown.can_restore_directly());
        assert!(!Role::Unknown.can_issue_restore_codes());
        for target in [
            Role::SuperAdmin,
            Role::SystemAdmin,
            Role::ServiceEngineer,
            Role::Unknown,
        ] {
            assert!(!Role::Unknown.can_manage_role(target));
        }
        // Not a storable role name; only ever produced as a decode fallback.
        assert_eq!(Role::parse("unknown"), None);
    }

    #[test]
    fn throttle_window_resets_after_expiry() {
        let mut session = Session::new();

        for _ in 0..3 {
            session.record_failure("victim");
        }
        assert!(session.is_throttled("victim"));
        assert!(session.is_throttled("VICTIM"), "throttle keys are case-folded");

        // Backdate the last attempt past the window.
        let entry = session.failed_attempts.get_mut("victim").unwrap();
        entry.1 = Utc::now() - chrono::Duration::seconds(301);
        assert!(!session.is_throttled("victim"));
        assert!(
            !session.failed_attempts.contains_key("victim"),
            "expired window clears the counter"
        );
    }

    #[test]
    fn two_failures_do_not_throttle() {
        let mut session = Session::new();
        session.record_failure("user");
        session.record_failure("user");
        assert!(!session.is_throttled("user"));
        session.record_failure("user");
        assert!(session.is_throttled("user"));
    }
}
