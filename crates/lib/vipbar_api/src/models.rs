//! Request and response bodies for the HTTP API.

use serde::{Deserialize, Serialize};
use vipbar_core::auth::demo::is_demo_subject;
use vipbar_core::models::auth::{PermissionMap, UserIdentity};

use crate::middleware::auth::AuthenticatedUser;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// The signed-in user as exposed to the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub display_name: Option<String>,
    pub role: String,
    pub permissions: PermissionMap,
    pub is_demo: bool,
}

impl From<&UserIdentity> for SessionUser {
    fn from(user: &UserIdentity) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            full_name: Some(user.full_name.clone()),
            display_name: user.display_name.clone(),
            role: user.role.clone(),
            permissions: user.permissions.clone(),
            is_demo: is_demo_subject(&user.id),
        }
    }
}

impl From<&AuthenticatedUser> for SessionUser {
    fn from(user: &AuthenticatedUser) -> Self {
        Self {
            id: user.user_id.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            display_name: None,
            role: user.role.clone(),
            permissions: user.permissions.clone(),
            is_demo: user.is_demo,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user: SessionUser,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfResponse {
    pub csrf_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeResponse {
    pub user: SessionUser,
    /// `access_token` or `refresh_token`.
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// `configured` or `not_configured`.
    pub database: String,
    pub demo_mode: bool,
}
