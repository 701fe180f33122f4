//! Demo-mode credentials.
//!
//! A fixed table of accounts consulted when the credential store is
//! unreachable or unconfigured. Demo identities carry a `demo-` id prefix so
//! refreshes can be validated against this table instead of the store.

use subtle::ConstantTimeEq;

use super::permissions::{ROLE_ADMIN, ROLE_CASHIER, ROLE_MANAGER, default_permissions};
use super::validation::normalize_email;
use crate::models::auth::UserIdentity;

/// Id prefix shared by every demo identity.
pub const DEMO_ID_PREFIX: &str = "demo-";

/// Password used outside production when `DEMO_PASSWORD` is unset.
pub const DEFAULT_DEMO_PASSWORD: &str = "demo1234";

struct DemoAccount {
    id: &'static str,
    email: &'static str,
    full_name: &'static str,
    role: &'static str,
}

const DEMO_ACCOUNTS: &[DemoAccount] = &[
    DemoAccount {
        id: "demo-admin",
        email: "admin@barvip.com",
        full_name: "Demo Administrator",
        role: ROLE_ADMIN,
    },
    DemoAccount {
        id: "demo-manager",
        email: "manager@barvip.com",
        full_name: "Demo Manager",
        role: ROLE_MANAGER,
    },
    DemoAccount {
        id: "demo-cashier",
        email: "cashier@barvip.com",
        full_name: "Demo Cashier",
        role: ROLE_CASHIER,
    },
];

/// The demo credential table. Disabled when built without a password.
#[derive(Clone, Default)]
pub struct DemoDirectory {
    password: Option<String>,
}

impl std::fmt::Debug for DemoDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemoDirectory")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl DemoDirectory {
    pub fn new(password: Option<String>) -> Self {
        Self {
            password: password.filter(|p| !p.is_empty()),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.password.is_some()
    }

    /// Match `email`/`password` against the table.
    pub fn authenticate(&self, email: &str, password: &str) -> Option<UserIdentity> {
        let expected = self.password.as_deref()?;
        let email = normalize_email(email);
        let account = DEMO_ACCOUNTS.iter().find(|a| a.email == email)?;
        let matches: bool = password.as_bytes().ct_eq(expected.as_bytes()).into();
        matches.then(|| identity(account))
    }

    /// Demo identity by id, used when refreshing a demo session.
    pub fn identity_for(&self, user_id: &str) -> Option<UserIdentity> {
        if !self.is_enabled() {
            return None;
        }
        DEMO_ACCOUNTS
            .iter()
            .find(|a| a.id == user_id)
            .map(identity)
    }
}

/// Whether `user_id` names a demo identity.
pub fn is_demo_subject(user_id: &str) -> bool {
    user_id.starts_with(DEMO_ID_PREFIX)
}

fn identity(account: &DemoAccount) -> UserIdentity {
    UserIdentity {
        id: account.id.to_string(),
        email: account.email.to_string(),
        full_name: account.full_name.to_string(),
        role: account.role.to_string(),
        display_name: Some(account.full_name.to_string()),
        permissions: default_permissions(account.role),
        is_active: true,
        locked_until: None,
        failed_login_attempts: 0,
        last_login: None,
    }
}
