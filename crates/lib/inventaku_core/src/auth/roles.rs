//! Role hierarchy and role checks.
//!
//! The hierarchy is keyed by the role the user *holds*: each entry lists every
//! role that holder satisfies. Checks are case-insensitive on both sides and an
//! unknown role never grants anything.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::auth::Identity;

/// Known role tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    Employee,
}

impl Role {
    pub const ALL: &[Role] = &[Role::Admin, Role::Operator, Role::Employee];

    /// Case-insensitive parse; surrounding whitespace is ignored.
    pub fn parse(tag: &str) -> Option<Role> {
        let tag = tag.trim();
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str().eq_ignore_ascii_case(tag))
    }

    /// Lowercase wire tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::Employee => "employee",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::parse(s).ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Returned when parsing a tag that is not a known role.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

/// Held role → roles it satisfies. Every entry contains its own role.
pub static ROLE_HIERARCHY: &[(Role, &[Role])] = &[
    (Role::Admin, &[Role::Admin, Role::Operator, Role::Employee]),
    (Role::Operator, &[Role::Operator, Role::Employee]),
    (Role::Employee, &[Role::Employee]),
];

/// Roles satisfied by `held`.
pub fn satisfied_roles(held: Role) -> &'static [Role] {
    ROLE_HIERARCHY
        .iter()
        .find(|(role, _)| *role == held)
        .map(|(_, satisfied)| *satisfied)
        .unwrap_or(&[])
}

/// Whether holding `held` satisfies a requirement of `required`.
pub fn role_satisfies(held: Role, required: Role) -> bool {
    satisfied_roles(held).contains(&required)
}

/// Whether `user` satisfies the role tag `required`.
///
/// False without a user, for an empty tag, for an unknown held role and for an
/// unknown required role.
pub fn has_role(user: Option<&Identity>, required: &str) -> bool {
    let Some(user) = user else {
        return false;
    };
    if required.trim().is_empty() {
        return false;
    }
    match (user.role(), Role::parse(required)) {
        (Some(held), Some(required)) => role_satisfies(held, required),
        _ => false,
    }
}

/// True iff at least one of `roles` is satisfied. False for an empty list.
pub fn has_any_role<S: AsRef<str>>(user: Option<&Identity>, roles: &[S]) -> bool {
    user.is_some() && roles.iter().any(|r| has_role(user, r.as_ref()))
}

/// True iff every one of `roles` is satisfied. False for an empty list.
pub fn has_all_roles<S: AsRef<str>>(user: Option<&Identity>, roles: &[S]) -> bool {
    user.is_some() && !roles.is_empty() && roles.iter().all(|r| has_role(user, r.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: &str) -> Identity {
        Identity::new("1", "u", role)
    }

    #[test]
    fn hierarchy_is_total_and_reflexive() {
        for role in Role::ALL {
            assert!(
                satisfied_roles(*role).contains(role),
                "{role} must satisfy itself"
            );
        }
        assert_eq!(ROLE_HIERARCHY.len(), Role::ALL.len());
    }

    #[test]
    fn has_role_matches_hierarchy_for_every_pair() {
        let expected = [
            ("admin", "admin", true),
            ("admin", "operator", true),
            ("admin", "employee", true),
            ("operator", "admin", false),
            ("operator", "operator", true),
            ("operator", "employee", true),
            ("employee", "admin", false),
            ("employee", "operator", false),
            ("employee", "employee", true),
        ];
        for (held, required, allowed) in expected {
            let u = user(held);
            assert_eq!(
                has_role(Some(&u), required),
                allowed,
                "held={held} required={required}"
            );
        }
    }

    #[test]
    fn no_user_never_has_a_role() {
        for tag in ["", "admin", "operator", "employee", "anything"] {
            assert!(!has_role(None, tag));
        }
    }

    #[test]
    fn comparison_is_case_insensitive() {
        let u = user("Admin");
        assert!(has_role(Some(&u), "OPERATOR"));
        assert!(has_role(Some(&u), " employee "));
    }

    #[test]
    fn unknown_roles_grant_nothing() {
        let u = user("superuser");
        assert!(!has_role(Some(&u), "employee"));

        let u = user("admin");
        assert!(!has_role(Some(&u), "auditor"));
        assert!(!has_role(Some(&u), ""));
    }

    #[test]
    fn any_and_all() {
        let u = user("operator");
        assert!(has_any_role(Some(&u), &["admin", "employee"]));
        assert!(!has_all_roles(Some(&u), &["admin", "employee"]));
        assert!(has_all_roles(Some(&u), &["operator", "employee"]));

        let empty: [&str; 0] = [];
        assert!(!has_any_role(Some(&u), &empty));
        assert!(!has_all_roles(Some(&u), &empty));
        assert!(!has_any_role(None, &["employee"]));
        assert!(!has_all_roles(None, &["employee"]));
    }

    #[test]
    fn parse_and_display() {
        assert_eq!("OPERATOR".parse::<Role>(), Ok(Role::Operator));
        assert!("guest".parse::<Role>().is_err());
        assert_eq!(Role::Admin.to_string(), "admin");
    }
}
