//! Permission vocabulary and the guard predicate used by navigation and
//! in-page controls.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// A token from the closed permission vocabulary the backend grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "manage:users")]
    ManageUsers,
    #[serde(rename = "view:reports")]
    ViewReports,
    #[serde(rename = "manage:orders")]
    ManageOrders,
    #[serde(rename = "manage:locations")]
    ManageLocations,
    #[serde(rename = "manage:inventory")]
    ManageInventory,
    #[serde(rename = "manage:shipments")]
    ManageShipments,
    #[serde(rename = "manage:jobs")]
    ManageJobs,
    #[serde(rename = "view:production")]
    ViewProduction,
}

/// Permissions granted to a user. Order carries no meaning.
pub type PermissionSet = BTreeSet<Permission>;

impl Permission {
    pub const ALL: [Permission; 8] = [
        Permission::ManageUsers,
        Permission::ViewReports,
        Permission::ManageOrders,
        Permission::ManageLocations,
        Permission::ManageInventory,
        Permission::ManageShipments,
        Permission::ManageJobs,
        Permission::ViewProduction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ManageUsers => "manage:users",
            Permission::ViewReports => "view:reports",
            Permission::ManageOrders => "manage:orders",
            Permission::ManageLocations => "manage:locations",
            Permission::ManageInventory => "manage:inventory",
            Permission::ManageShipments => "manage:shipments",
            Permission::ManageJobs => "manage:jobs",
            Permission::ViewProduction => "view:production",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown permission: {0}")]
pub struct UnknownPermission(pub String);

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPermission(s.to_string()))
    }
}

/// Decide whether a route or control is available.
///
/// No requirement means the target is open to every authenticated user.
pub fn has_permission(required: Option<Permission>, granted: &PermissionSet) -> bool {
    match required {
        None => true,
        Some(permission) => granted.contains(&permission),
    }
}

/// Deserialize a permission list, dropping tokens outside the vocabulary.
///
/// Newer backends may grant permissions this client does not know about;
/// those can never satisfy a requirement here, so they are skipped rather
/// than failing the whole user payload.
pub(crate) fn deserialize_lenient<'de, D>(deserializer: D) -> Result<PermissionSet, D::Error>
where
    D: Deserializer<'de>,
{
    let tokens = Vec::<String>::deserialize(deserializer)?;
    Ok(tokens
        .into_iter()
        .filter_map(|token| match token.parse::<Permission>() {
            Ok(permission) => Some(permission),
            Err(e) => {
                debug!(error = %e, "Ignoring permission token");
                None
            }
        })
        .collect())
}
