//! Roles and permission checks.

use crate::models::auth::PermissionMap;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_MANAGER: &str = "manager";
pub const ROLE_CASHIER: &str = "cashier";

pub const POS_ACCESS: &str = "pos.access";
pub const PRODUCTS_VIEW: &str = "products.view";
pub const PRODUCTS_MANAGE: &str = "products.manage";
pub const INVENTORY_MANAGE: &str = "inventory.manage";
pub const REPORTS_VIEW: &str = "reports.view";
pub const MEMBERS_VIEW: &str = "members.view";
pub const MEMBERS_MANAGE: &str = "members.manage";
pub const USERS_MANAGE: &str = "users.manage";
pub const SETTINGS_MANAGE: &str = "settings.manage";

/// Every permission known to the application.
pub const ALL_PERMISSIONS: &[&str] = &[
    POS_ACCESS,
    PRODUCTS_VIEW,
    PRODUCTS_MANAGE,
    INVENTORY_MANAGE,
    REPORTS_VIEW,
    MEMBERS_VIEW,
    MEMBERS_MANAGE,
    USERS_MANAGE,
    SETTINGS_MANAGE,
];

/// Permission set granted to a role when the profile carries none.
pub fn default_permissions(role: &str) -> PermissionMap {
    let granted: &[&str] = match role {
        ROLE_ADMIN => ALL_PERMISSIONS,
        ROLE_MANAGER => &[
            POS_ACCESS,
            PRODUCTS_VIEW,
            PRODUCTS_MANAGE,
            INVENTORY_MANAGE,
            REPORTS_VIEW,
            MEMBERS_VIEW,
            MEMBERS_MANAGE,
        ],
        ROLE_CASHIER => &[POS_ACCESS, PRODUCTS_VIEW, MEMBERS_VIEW],
        _ => &[],
    };
    ALL_PERMISSIONS
        .iter()
        .map(|p| (p.to_string(), granted.contains(p)))
        .collect()
}

/// Whether `role`/`permissions` grant `permission`. Admin holds everything.
pub fn has_permission(role: &str, permissions: &PermissionMap, permission: &str) -> bool {
    role == ROLE_ADMIN || permissions.get(permission).copied().unwrap_or(false)
}
