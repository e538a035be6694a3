//! Roles and the static role → permission table

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const READ_ALL: &str = "read:all";
pub const WRITE_ALL: &str = "write:all";
pub const DELETE_ALL: &str = "delete:all";
pub const READ_OWN: &str = "read:own";
pub const WRITE_OWN: &str = "write:own";
pub const MANAGE_USERS: &str = "manage:users";
pub const MANAGE_STRATEGIES: &str = "manage:strategies";
pub const EXECUTE_TRADES: &str = "execute:trades";
pub const VIEW_ANALYTICS: &str = "view:analytics";

const ADMIN_PERMISSIONS: &[&str] = &[
    READ_ALL,
    WRITE_ALL,
    DELETE_ALL,
    MANAGE_USERS,
    MANAGE_STRATEGIES,
    EXECUTE_TRADES,
    VIEW_ANALYTICS,
];

const TRADER_PERMISSIONS: &[&str] = &[
    READ_OWN,
    WRITE_OWN,
    MANAGE_STRATEGIES,
    EXECUTE_TRADES,
    VIEW_ANALYTICS,
];

const VIEWER_PERMISSIONS: &[&str] = &[READ_OWN, VIEW_ANALYTICS];

/// User role. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Trader,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Trader, Role::Viewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Trader => "trader",
            Role::Viewer => "viewer",
        }
    }

    /// Permissions granted to this role
    pub fn permissions(&self) -> &'static [&'static str] {
        match self {
            Role::Admin => ADMIN_PERMISSIONS,
            Role::Trader => TRADER_PERMISSIONS,
            Role::Viewer => VIEWER_PERMISSIONS,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "trader" => Ok(Role::Trader),
            "viewer" => Ok(Role::Viewer),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Resolve the permission set for a stored role name.
///
/// Unknown roles resolve to an empty set; callers must treat that as
/// "not authorized".
pub fn permissions_for(role: &str) -> Vec<String> {
    role.parse::<Role>()
        .map(|r| r.permissions().iter().map(|p| p.to_string()).collect())
        .unwrap_or_default()
}
