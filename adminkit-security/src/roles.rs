//! Role graph with transitive permission inheritance.

use std::collections::{HashMap, HashSet};

use crate::error::SecurityError;
use crate::permission::PermissionSet;

/// Conventional name of the role applied when no user is authenticated.
pub const ANONYMOUS_ROLE: &str = "anonymous";

#[derive(Debug, Clone, Default)]
struct RoleDef {
    inherits: Vec<String>,
    grants: Vec<String>,
}

/// A directed acyclic graph of roles.
///
/// A role transitively inherits every permission of the roles it can
/// reach. Cycles are rejected at insertion time so resolution always
/// terminates. Inherited role names that are never defined resolve to an
/// empty grant set.
#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    roles: HashMap<String, RoleDef>,
    anonymous_role: String,
}

impl RoleGraph {
    pub fn new() -> Self {
        Self {
            roles: HashMap::new(),
            anonymous_role: ANONYMOUS_ROLE.to_string(),
        }
    }

    /// Designate the role applied to unauthenticated users.
    pub fn with_anonymous_role(mut self, role: impl Into<String>) -> Self {
        self.anonymous_role = role.into();
        self
    }

    pub fn anonymous_role(&self) -> &str {
        &self.anonymous_role
    }

    /// Define (or redefine) a role.
    ///
    /// Fails with [`SecurityError::CyclicRole`] when the inheritance edges
    /// would close a cycle; the graph is left unchanged in that case.
    pub fn add_role(
        &mut self,
        name: &str,
        inherits: &[&str],
        grants: &[&str],
    ) -> Result<(), SecurityError> {
        let previous = self.roles.insert(
            name.to_string(),
            RoleDef {
                inherits: inherits.iter().map(|s| s.to_string()).collect(),
                grants: grants.iter().map(|s| s.to_string()).collect(),
            },
        );
        if let Some(cycle) = self.find_cycle(name) {
            // Roll back.
            match previous {
                Some(def) => {
                    self.roles.insert(name.to_string(), def);
                }
                None => {
                    self.roles.remove(name);
                }
            }
            return Err(SecurityError::CyclicRole { cycle });
        }
        Ok(())
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    pub fn role_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.roles.keys().cloned().collect();
        names.sort();
        names
    }

    /// All permissions reachable from the given roles, compiled.
    pub fn permissions_of(&self, roles: &[String]) -> PermissionSet {
        let mut visited = HashSet::new();
        let mut grants: Vec<String> = Vec::new();
        let mut stack: Vec<&str> = roles.iter().map(String::as_str).collect();
        while let Some(role) = stack.pop() {
            if !visited.insert(role.to_string()) {
                continue;
            }
            if let Some(def) = self.roles.get(role) {
                grants.extend(def.grants.iter().cloned());
                stack.extend(def.inherits.iter().map(String::as_str));
            }
        }
        PermissionSet::from_grants(grants)
    }

    /// Permissions of the anonymous role.
    pub fn anonymous_permissions(&self) -> PermissionSet {
        self.permissions_of(&[self.anonymous_role.clone()])
    }

    fn find_cycle(&self, start: &str) -> Option<Vec<String>> {
        let mut path = vec![start.to_string()];
        let mut on_path: HashSet<String> = HashSet::new();
        self.dfs(start, &mut path, &mut on_path)
    }

    fn dfs(
        &self,
        role: &str,
        path: &mut Vec<String>,
        on_path: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        if !on_path.insert(role.to_string()) {
            return Some(path.clone());
        }
        if let Some(def) = self.roles.get(role) {
            for parent in &def.inherits {
                path.push(parent.clone());
                if let Some(cycle) = self.dfs(parent, path, on_path) {
                    return Some(cycle);
                }
                path.pop();
            }
        }
        on_path.remove(role);
        None
    }
}
