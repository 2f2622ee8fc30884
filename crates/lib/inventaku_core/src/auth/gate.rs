//! Route and navigation gating.
//!
//! Turns a [`SessionState`] into the decision a router needs. While the
//! session is still booting the answer is [`Access::Pending`], never a denial,
//! so a page is not bounced to the login screen before validation finishes.

use serde::Serialize;

use super::roles::{self, Role};
use super::session::SessionState;

/// What a route or menu entry requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Any signed-in user.
    Authenticated,
    Role(Role),
    AnyRole(Vec<Role>),
    AllRoles(Vec<Role>),
}

impl Requirement {
    fn satisfied_by(&self, state: &SessionState) -> bool {
        let user = state.user.as_ref();
        match self {
            Requirement::Authenticated => user.is_some(),
            Requirement::Role(role) => roles::has_role(user, role.as_str()),
            Requirement::AnyRole(required) => {
                let tags: Vec<&str> = required.iter().map(|r| r.as_str()).collect();
                roles::has_any_role(user, &tags)
            }
            Requirement::AllRoles(required) => {
                let tags: Vec<&str> = required.iter().map(|r| r.as_str()).collect();
                roles::has_all_roles(user, &tags)
            }
        }
    }
}

/// Gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Access {
    /// Session validation has not finished; show a placeholder.
    Pending,
    Allowed,
    /// Nobody is signed in; redirect to the login route.
    Unauthenticated,
    /// Signed in but missing the required role.
    Forbidden,
}

/// Decide whether `requirement` is met in `state`.
pub fn decide(state: &SessionState, requirement: &Requirement) -> Access {
    if state.booting() {
        return Access::Pending;
    }
    if state.user.is_none() {
        return Access::Unauthenticated;
    }
    if requirement.satisfied_by(state) {
        Access::Allowed
    } else {
        Access::Forbidden
    }
}

/// A navigation entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavItem {
    pub label: &'static str,
    pub path: &'static str,
    pub requirement: Requirement,
}

impl NavItem {
    pub fn new(label: &'static str, path: &'static str, requirement: Requirement) -> Self {
        Self {
            label,
            path,
            requirement,
        }
    }
}

/// Entries of `items` the current session may see.
///
/// Nothing is shown while booting or signed out.
pub fn visible_nav<'a>(state: &SessionState, items: &'a [NavItem]) -> Vec<&'a NavItem> {
    items
        .iter()
        .filter(|item| decide(state, &item.requirement) == Access::Allowed)
        .collect()
}

/// Inventaku's main navigation.
pub fn default_navigation() -> Vec<NavItem> {
    vec![
        NavItem::new("Dashboard", "/dashboard", Requirement::Authenticated),
        NavItem::new("My Loans", "/loans", Requirement::Role(Role::Employee)),
        NavItem::new("Approvals", "/approvals", Requirement::Role(Role::Operator)),
        NavItem::new("Returns", "/returns", Requirement::Role(Role::Operator)),
        NavItem::new("Items", "/items", Requirement::Role(Role::Operator)),
        NavItem::new("Categories", "/categories", Requirement::Role(Role::Operator)),
        NavItem::new("Locations", "/locations", Requirement::Role(Role::Operator)),
        NavItem::new("Units", "/units", Requirement::Role(Role::Operator)),
        NavItem::new("Users", "/users", Requirement::Role(Role::Admin)),
        NavItem::new("Reports", "/reports", Requirement::Role(Role::Admin)),
    ]
}
