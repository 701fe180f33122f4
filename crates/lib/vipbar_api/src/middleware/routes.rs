//! Route access table: public paths and per-prefix method/permission rules.

use vipbar_core::auth::permissions::{
    INVENTORY_MANAGE, MEMBERS_MANAGE, MEMBERS_VIEW, POS_ACCESS, PRODUCTS_MANAGE, PRODUCTS_VIEW,
    REPORTS_VIEW, ROLE_ADMIN, SETTINGS_MANAGE, USERS_MANAGE,
};

use super::auth::AuthenticatedUser;

/// Paths served without a session. Entries ending in `/` match as prefixes.
const PUBLIC_PATHS: &[&str] = &[
    "/",
    "/login",
    "/auth/callback",
    "/api/auth/login",
    "/api/auth/logout",
    "/api/auth/csrf",
    "/api/auth/refresh",
    "/api/auth/me",
    "/health",
    "/favicon.ico",
    "/static/",
];

const READ: &[&str] = &["GET", "HEAD"];
const WRITE: &[&str] = &["POST", "PUT", "PATCH", "DELETE"];
const ANY: &[&str] = &["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Authenticated,
    Permission(&'static str),
    Role(&'static str),
}

impl Requirement {
    /// Admins satisfy every requirement.
    pub fn is_met_by(&self, user: &AuthenticatedUser) -> bool {
        match self {
            Requirement::Authenticated => true,
            Requirement::Permission(permission) => user.has_permission(permission),
            Requirement::Role(role) => user.role == *role || user.role == ROLE_ADMIN,
        }
    }

    pub fn describe(&self) -> &'static str {
        match *self {
            Requirement::Authenticated => "authenticated",
            Requirement::Permission(p) => p,
            Requirement::Role(r) => r,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MethodRule {
    pub methods: &'static [&'static str],
    pub requirement: Requirement,
}

#[derive(Debug, Clone, Copy)]
pub struct ProtectedRoute {
    pub prefix: &'static str,
    pub rules: &'static [MethodRule],
}

const fn any(requirement: Requirement) -> MethodRule {
    MethodRule {
        methods: ANY,
        requirement,
    }
}

const fn read(requirement: Requirement) -> MethodRule {
    MethodRule {
        methods: READ,
        requirement,
    }
}

const fn write(requirement: Requirement) -> MethodRule {
    MethodRule {
        methods: WRITE,
        requirement,
    }
}

use Requirement::{Authenticated, Permission, Role};

const PROTECTED: &[ProtectedRoute] = &[
    ProtectedRoute {
        prefix: "/dashboard",
        rules: &[any(Authenticated)],
    },
    ProtectedRoute {
        prefix: "/pos",
        rules: &[any(Permission(POS_ACCESS))],
    },
    ProtectedRoute {
        prefix: "/products",
        rules: &[any(Permission(PRODUCTS_VIEW))],
    },
    ProtectedRoute {
        prefix: "/inventory",
        rules: &[any(Permission(INVENTORY_MANAGE))],
    },
    ProtectedRoute {
        prefix: "/reports",
        rules: &[any(Permission(REPORTS_VIEW))],
    },
    ProtectedRoute {
        prefix: "/members",
        rules: &[any(Permission(MEMBERS_VIEW))],
    },
    ProtectedRoute {
        prefix: "/admin",
        rules: &[any(Role(ROLE_ADMIN))],
    },
    ProtectedRoute {
        prefix: "/settings",
        rules: &[any(Permission(SETTINGS_MANAGE))],
    },
    ProtectedRoute {
        prefix: "/api/products",
        rules: &[read(Permission(PRODUCTS_VIEW)), write(Permission(PRODUCTS_MANAGE))],
    },
    ProtectedRoute {
        prefix: "/api/inventory",
        rules: &[any(Permission(INVENTORY_MANAGE))],
    },
    ProtectedRoute {
        prefix: "/api/reports",
        rules: &[read(Permission(REPORTS_VIEW))],
    },
    ProtectedRoute {
        prefix: "/api/members",
        rules: &[read(Permission(MEMBERS_VIEW)), write(Permission(MEMBERS_MANAGE))],
    },
    ProtectedRoute {
        prefix: "/api/users",
        rules: &[any(Permission(USERS_MANAGE))],
    },
    ProtectedRoute {
        prefix: "/api/settings",
        rules: &[any(Permission(SETTINGS_MANAGE))],
    },
    ProtectedRoute {
        prefix: "/api/pos",
        rules: &[any(Permission(POS_ACCESS))],
    },
    ProtectedRoute {
        prefix: "/api",
        rules: &[any(Authenticated)],
    },
];

pub fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.iter().any(|p| match p.strip_suffix('/') {
        Some(dir) if !dir.is_empty() => path.starts_with(p) || path == dir,
        _ => path == *p,
    })
}

fn matches_prefix(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Longest protected prefix covering `path`.
pub fn lookup(path: &str) -> Option<&'static ProtectedRoute> {
    PROTECTED
        .iter()
        .filter(|r| matches_prefix(path, r.prefix))
        .max_by_key(|r| r.prefix.len())
}

impl ProtectedRoute {
    /// The requirement for `method`, or `None` when the method is not served.
    pub fn requirement_for(&self, method: &str) -> Option<Requirement> {
        self.rules
            .iter()
            .find(|rule| rule.methods.contains(&method))
            .map(|rule| rule.requirement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::AuthSource;
    use vipbar_core::auth::permissions::{ROLE_CASHIER, ROLE_MANAGER, default_permissions};

    fn user(role: &str) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: "u".into(),
            email: "u@bar.com".into(),
            role: role.into(),
            permissions: default_permissions(role),
            full_name: None,
            is_demo: false,
            source: AuthSource::AccessToken,
        }
    }

    #[test]
    fn public_paths() {
        assert!(is_public("/"));
        assert!(is_public("/login"));
        assert!(is_public("/api/auth/login"));
        assert!(is_public("/static/app.css"));
        assert!(!is_public("/dashboard"));
        assert!(!is_public("/loginx"));
        assert!(!is_public("/api/products"));
    }

    #[test]
    fn longest_prefix_wins() {
        assert_eq!(lookup("/api/products/42").map(|r| r.prefix), Some("/api/products"));
        assert_eq!(lookup("/api/anything").map(|r| r.prefix), Some("/api"));
        assert_eq!(lookup("/pos").map(|r| r.prefix), Some("/pos"));
        assert!(lookup("/possum").is_none());
        assert!(lookup("/about").is_none());
    }

    #[test]
    fn method_specific_requirements() {
        let route = lookup("/api/products").unwrap();
        assert_eq!(route.requirement_for("GET"), Some(Permission(PRODUCTS_VIEW)));
        assert_eq!(route.requirement_for("DELETE"), Some(Permission(PRODUCTS_MANAGE)));
        assert_eq!(lookup("/api/reports").unwrap().requirement_for("POST"), None);
    }

    #[test]
    fn admin_satisfies_everything() {
        let admin = user(ROLE_ADMIN);
        let cashier = user(ROLE_CASHIER);
        let manager = user(ROLE_MANAGER);
        assert!(Role(ROLE_ADMIN).is_met_by(&admin));
        assert!(Permission(USERS_MANAGE).is_met_by(&admin));
        assert!(!Role(ROLE_ADMIN).is_met_by(&manager));
        assert!(Permission(POS_ACCESS).is_met_by(&cashier));
        assert!(!Permission(REPORTS_VIEW).is_met_by(&cashier));
    }
}
