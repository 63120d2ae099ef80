use crate::models::{Capability, Role, UserProfile};
use std::collections::BTreeMap;

pub fn role_capabilities(role: Role) -> &'static [Capability] {
    match role {
        Role::Lead => &[
            Capability::ViewRecords,
            Capability::EditRecords,
            Capability::ManageModules,
            Capability::ImportExport,
            Capability::TransitionStatus,
        ],
        Role::Member => &[Capability::ViewRecords, Capability::TransitionStatus],
    }
}

/// Source of user identities. Authentication happens before the engine is
/// called; the directory only answers who a username is and what they may do.
pub trait UserDirectory: Send + Sync {
    fn lookup(&self, username: &str) -> Option<UserProfile>;

    fn has_capability(&self, user: &UserProfile, capability: Capability) -> bool {
        role_capabilities(user.role).contains(&capability)
    }

    /// Everyone work can be assigned to, sorted by display name.
    fn members(&self) -> Vec<UserProfile>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    users: BTreeMap<String, UserProfile>,
}

impl StaticUserDirectory {
    pub fn new(users: Vec<UserProfile>) -> Self {
        let users = users
            .into_iter()
            .map(|user| (user.username.trim().to_ascii_lowercase(), user))
            .collect();
        Self { users }
    }
}

impl UserDirectory for StaticUserDirectory {
    fn lookup(&self, username: &str) -> Option<UserProfile> {
        self.users.get(&username.trim().to_ascii_lowercase()).cloned()
    }

    fn members(&self) -> Vec<UserProfile> {
        let mut members: Vec<UserProfile> = self
            .users
            .values()
            .filter(|user| user.role == Role::Member)
            .cloned()
            .collect();
        members.sort_by(|left, right| left.display_name.cmp(&right.display_name));
        members
    }
}
