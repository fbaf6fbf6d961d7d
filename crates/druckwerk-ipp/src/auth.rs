// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Authorization gates: username presence, group membership, and object
// ownership.  The actual credential check happens in the transport; the
// core only consults the resolved username and a group oracle.

use std::collections::HashMap;

/// External auth module interface: group membership lookups.
pub trait GroupResolver: Send + Sync {
    fn user_in_group(&self, user: &str, group: &str) -> bool;
}

/// Grants every membership; the default when no auth module is wired.
#[derive(Debug, Default)]
pub struct AllowAll;

impl GroupResolver for AllowAll {
    fn user_in_group(&self, _user: &str, _group: &str) -> bool {
        true
    }
}

/// Fixed group table, used by tests and simple deployments.
#[derive(Debug, Default)]
pub struct StaticGroups {
    groups: HashMap<String, Vec<String>>,
}

impl StaticGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(mut self, group: &str, user: &str) -> Self {
        self.groups
            .entry(group.to_string())
            .or_default()
            .push(user.to_string());
        self
    }
}

impl GroupResolver for StaticGroups {
    fn user_in_group(&self, user: &str, group: &str) -> bool {
        self.groups
            .get(group)
            .is_some_and(|members| members.iter().any(|m| m.eq_ignore_ascii_case(user)))
    }
}

/// Outcome of an authorization gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    /// No authenticated username: HTTP 401 territory.
    Unauthenticated,
    /// Authenticated but not a member: HTTP 403 territory.
    Forbidden,
}

/// Gate an operation on membership in `group`.  A `None` group means the
/// gate is not configured and everyone passes; an unauthenticated user
/// fails first.
pub fn require_group(
    resolver: &dyn GroupResolver,
    username: Option<&str>,
    group: Option<&str>,
) -> Access {
    let Some(group) = group else {
        return Access::Granted;
    };
    let Some(user) = username.filter(|u| !u.is_empty()) else {
        return Access::Unauthenticated;
    };
    if resolver.user_in_group(user, group) {
        Access::Granted
    } else {
        Access::Forbidden
    }
}

/// Whether `username` may see the private attributes of an object owned
/// by `owner`: the owner themselves, or an admin-group member.
pub fn owns_or_admin(
    resolver: &dyn GroupResolver,
    username: Option<&str>,
    owner: &str,
    admin_group: Option<&str>,
) -> bool {
    match username {
        Some(user) if user.eq_ignore_ascii_case(owner) => true,
        Some(user) => admin_group.is_some_and(|g| resolver.user_in_group(user, g)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_gate_grants_everyone() {
        assert_eq!(require_group(&AllowAll, None, None), Access::Granted);
        assert_eq!(require_group(&AllowAll, Some("x"), None), Access::Granted);
    }

    #[test]
    fn gate_requires_username_then_membership() {
        let groups = StaticGroups::new().with_member("admin", "alice");

        assert_eq!(
            require_group(&groups, None, Some("admin")),
            Access::Unauthenticated
        );
        assert_eq!(
            require_group(&groups, Some(""), Some("admin")),
            Access::Unauthenticated
        );
        assert_eq!(
            require_group(&groups, Some("bob"), Some("admin")),
            Access::Forbidden
        );
        assert_eq!(
            require_group(&groups, Some("Alice"), Some("admin")),
            Access::Granted
        );
    }

    #[test]
    fn ownership_or_admin_grants_private_reads() {
        let groups = StaticGroups::new().with_member("admin", "root");

        assert!(owns_or_admin(&groups, Some("alice"), "alice", None));
        assert!(owns_or_admin(&groups, Some("ALICE"), "alice", None));
        assert!(!owns_or_admin(&groups, Some("bob"), "alice", None));
        assert!(owns_or_admin(&groups, Some("root"), "alice", Some("admin")));
        assert!(!owns_or_admin(&groups, None, "alice", Some("admin")));
    }
}
