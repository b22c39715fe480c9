//! Route table, navigation menu filtering, and the authentication gate.
//!
//! Per-route permissions are enforced where the menu is built: entries a
//! user lacks the permission for are hidden. [`protect`] only checks that
//! somebody is logged in, so typing the path of a hidden screen still
//! renders it. See [`protect`] for details.

use crate::auth::Session;
use crate::permissions::{has_permission, Permission};

/// Entry point unauthenticated navigation is sent to.
pub const LOGIN_PATH: &str = "/login";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub path: &'static str,
    pub title: &'static str,
    /// Permission needed to see the menu entry. `None` is open to every
    /// authenticated user.
    pub required: Option<Permission>,
    /// Whether the entry appears in the navigation menu at all.
    pub in_menu: bool,
}

impl Route {
    const fn menu(path: &'static str, title: &'static str, required: Option<Permission>) -> Self {
        Self {
            path,
            title,
            required,
            in_menu: true,
        }
    }

    /// True if `path` is this route or one of its detail pages.
    fn matches(&self, path: &str) -> bool {
        if self.path == "/" {
            return path == "/";
        }
        match path.strip_prefix(self.path) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Every screen of the application, in menu order.
pub const ROUTES: &[Route] = &[
    Route::menu("/", "Dashboard", None),
    Route::menu("/inventory", "Inventory", Some(Permission::ManageInventory)),
    Route::menu("/orders", "Orders", Some(Permission::ManageOrders)),
    Route::menu("/shipments", "Shipments", Some(Permission::ManageShipments)),
    Route::menu("/jobs", "Jobs", Some(Permission::ManageJobs)),
    Route::menu("/production", "Production", Some(Permission::ViewProduction)),
    Route::menu("/locations", "Locations", Some(Permission::ManageLocations)),
    Route::menu("/users", "Users", Some(Permission::ManageUsers)),
    Route::menu("/reports", "Reports", Some(Permission::ViewReports)),
    Route::menu("/settings", "Settings", None),
    Route {
        path: LOGIN_PATH,
        title: "Login",
        required: None,
        in_menu: false,
    },
];

/// Find the route serving `path`, preferring the most specific match so
/// `/orders/42` resolves to `/orders`.
pub fn resolve(path: &str) -> Option<&'static Route> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let path = if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    };
    ROUTES
        .iter()
        .filter(|r| r.matches(path))
        .max_by_key(|r| r.path.len())
}

/// Menu entries visible to `session`. Empty when logged out.
pub fn navigation(session: &Session) -> Vec<&'static Route> {
    if !session.is_authenticated() {
        return Vec::new();
    }
    let granted = session.permissions();
    ROUTES
        .iter()
        .filter(|r| r.in_menu && has_permission(r.required, &granted))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Show the requested screen.
    Render(&'static Route),
    /// Send the user elsewhere. The originally requested path is not kept.
    Redirect(&'static str),
    /// No such screen.
    NotFound,
}

/// Gate a navigation on authentication.
///
/// Logged-out users are redirected to [`LOGIN_PATH`] from every path but
/// the login screen itself, whether or not a screen exists there, so the
/// route table is not revealed before login. Logged-in users get the screen
/// they asked for: the route's required permission is not checked here, only
/// in [`navigation`].
pub fn protect(session: &Session, path: &str) -> RouteDecision {
    let route = resolve(path);
    match route {
        Some(route) if route.path == LOGIN_PATH => RouteDecision::Render(route),
        _ if !session.is_authenticated() => RouteDecision::Redirect(LOGIN_PATH),
        Some(route) => RouteDecision::Render(route),
        None => RouteDecision::NotFound,
    }
}

/// Client-side navigation, used for forced redirects.
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}
