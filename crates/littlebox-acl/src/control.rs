//! Grant table and evaluation.

use crate::error::{AclError, Result};
use crate::types::{Action, ResourceKind, Role};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One permission: `role` may `action` on `resource`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grant {
    pub role: Role,
    pub action: Action,
    pub resource: ResourceKind,
}

/// `role` holds every grant of `from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inheritance {
    pub role: Role,
    pub from: Role,
}

/// Serializable form of an [`AccessControl`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub grants: Vec<Grant>,
    #[serde(default)]
    pub inherits: Vec<Inheritance>,
}

/// Role-based grant table.
///
/// `Default` is the [`standard`](Self::standard) hierarchy; use
/// [`empty`](Self::empty) to start from nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessControl {
    grants: BTreeMap<Role, BTreeSet<(Action, ResourceKind)>>,
    parents: BTreeMap<Role, BTreeSet<Role>>,
}

impl AccessControl {
    /// An empty table that denies everything.
    pub fn empty() -> Self {
        Self {
            grants: BTreeMap::new(),
            parents: BTreeMap::new(),
        }
    }

    /// Allow `role` to perform `action` on `resource`.
    pub fn grant(&mut self, role: Role, action: Action, resource: ResourceKind) -> &mut Self {
        self.grants.entry(role).or_default().insert((action, resource));
        self
    }

    /// Remove a direct grant. Inherited grants are unaffected.
    pub fn revoke(&mut self, role: Role, action: Action, resource: ResourceKind) -> &mut Self {
        if let Some(set) = self.grants.get_mut(&role) {
            set.remove(&(action, resource));
        }
        self
    }

    /// Make `role` inherit every grant of `parent`.
    pub fn extend(&mut self, role: Role, parent: Role) -> Result<&mut Self> {
        if role == parent || self.inherits(parent, role) {
            return Err(AclError::Cycle { role, parent });
        }
        self.parents.entry(role).or_default().insert(parent);
        Ok(self)
    }

    /// Whether `role` may perform `action` on `resource`.
    pub fn can(&self, role: Role, action: Action, resource: ResourceKind) -> bool {
        let mut visited = BTreeSet::new();
        self.can_inner(role, (action, resource), &mut visited)
    }

    /// Like [`can`](Self::can), but returns a descriptive error on denial.
    pub fn check(&self, role: Role, action: Action, resource: ResourceKind) -> Result<()> {
        if self.can(role, action, resource) {
            return Ok(());
        }
        tracing::debug!(%role, %action, %resource, "Access denied");
        Err(AclError::Denied {
            role,
            action,
            resource,
        })
    }

    /// Every action `role` may perform on `resource`, inherited ones included.
    pub fn allowed(&self, role: Role, resource: ResourceKind) -> Vec<Action> {
        Action::ALL
            .into_iter()
            .filter(|action| self.can(role, *action, resource))
            .collect()
    }

    /// Build a table from a policy document.
    pub fn from_policy(policy: &Policy) -> Result<Self> {
        let mut acl = Self::empty();
        for grant in &policy.grants {
            acl.grant(grant.role, grant.action, grant.resource);
        }
        for inheritance in &policy.inherits {
            acl.extend(inheritance.role, inheritance.from)?;
        }
        Ok(acl)
    }

    /// Parse a JSON policy document.
    pub fn from_json(json: &str) -> Result<Self> {
        let policy: Policy = serde_json::from_str(json)?;
        Self::from_policy(&policy)
    }

    /// Export the table as a policy document.
    pub fn to_policy(&self) -> Policy {
        let grants = self
            .grants
            .iter()
            .flat_map(|(role, set)| {
                set.iter().map(move |(action, resource)| Grant {
                    role: *role,
                    action: *action,
                    resource: *resource,
                })
            })
            .collect();
        let inherits = self
            .parents
            .iter()
            .flat_map(|(role, parents)| {
                parents.iter().map(move |from| Inheritance {
                    role: *role,
                    from: *from,
                })
            })
            .collect();
        Policy { grants, inherits }
    }

    fn can_inner(
        &self,
        role: Role,
        grant: (Action, ResourceKind),
        visited: &mut BTreeSet<Role>,
    ) -> bool {
        if !visited.insert(role) {
            return false;
        }
        if self.grants.get(&role).is_some_and(|set| set.contains(&grant)) {
            return true;
        }
        self.parents
            .get(&role)
            .into_iter()
            .flatten()
            .any(|parent| self.can_inner(*parent, grant, visited))
    }

    /// Whether `role` (transitively) inherits from `ancestor`.
    fn inherits(&self, role: Role, ancestor: Role) -> bool {
        let mut stack = vec![role];
        let mut visited = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(parents) = self.parents.get(&current) {
                if parents.contains(&ancestor) {
                    return true;
                }
                stack.extend(parents.iter().copied());
            }
        }
        false
    }
}

impl Default for AccessControl {
    fn default() -> Self {
        Self::standard()
    }
}

impl AccessControl {
    /// Viewers read, operators also start and stop containers, admins also
    /// create and delete them.
    pub fn standard() -> Self {
        let mut acl = Self::empty();
        acl.grant(Role::Viewer, Action::Read, ResourceKind::Runtime)
            .grant(Role::Viewer, Action::Read, ResourceKind::Container)
            .grant(Role::Operator, Action::Start, ResourceKind::Container)
            .grant(Role::Operator, Action::Stop, ResourceKind::Container)
            .grant(Role::Admin, Action::Create, ResourceKind::Container)
            .grant(Role::Admin, Action::Delete, ResourceKind::Container);
        // Fresh table, so neither edge can close a cycle.
        acl.parents.entry(Role::Operator).or_default().insert(Role::Viewer);
        acl.parents.entry(Role::Admin).or_default().insert(Role::Operator);
        acl
    }
}
