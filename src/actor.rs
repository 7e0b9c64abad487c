//! Users in their workflow roles, and the actors that own chain links
use super::chain::Chain;
use super::error::WorkflowError;
use super::idea::Idea;
use super::types::{ActorId, GroupId, UserId};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub user_id: UserId,
    pub username: String,
}

/// The user who submitted an idea.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdeaAuthor {
    pub user_id: UserId,
}

/// A user who may approve or reject ideas when an actor admits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Manager {
    pub user_id: UserId,
}

/// The user who owns a chain's structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainEditor {
    pub user_id: UserId,
}

impl IdeaAuthor {
    pub fn can_edit_idea(&self, idea: &Idea) -> bool {
        idea.author() == self
    }
    pub fn can_delete_idea(&self, idea: &Idea) -> bool {
        idea.author() == self
    }
}

impl ChainEditor {
    pub fn can_edit_chain(&self, chain: &Chain) -> bool {
        chain.author() == self
    }
}

impl From<&User> for IdeaAuthor {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id,
        }
    }
}
impl From<&User> for Manager {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id,
        }
    }
}
impl From<&User> for ChainEditor {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerGroup {
    pub group_id: GroupId,
    pub name: String,
    pub managers: Vec<UserId>,
}

impl ManagerGroup {
    pub fn new(group_id: GroupId, name: impl Into<String>, managers: Vec<UserId>) -> Self {
        Self {
            group_id,
            name: name.into(),
            managers,
        }
    }
    pub fn manager_in(&self, manager: &Manager) -> bool {
        self.managers.contains(&manager.user_id)
    }
}

/// Decides who may move an idea off the chain link it owns.
///
/// An actor with no managers and no groups is valid but admits nobody.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    actor_id: Option<ActorId>,
    name: String,
    admissible_managers: BTreeSet<UserId>,
    manager_groups: Vec<ManagerGroup>,
}

impl Actor {
    pub fn new(actor_id: Option<ActorId>, name: impl Into<String>) -> Result<Self, WorkflowError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(WorkflowError::EmptyActorName);
        }

        Ok(Self {
            actor_id,
            name,
            admissible_managers: BTreeSet::new(),
            manager_groups: vec![],
        })
    }
    pub fn with_managers(mut self, managers: impl IntoIterator<Item = UserId>) -> Self {
        self.admissible_managers.extend(managers);
        self
    }
    pub fn with_groups(mut self, groups: impl IntoIterator<Item = ManagerGroup>) -> Self {
        self.manager_groups.extend(groups);
        self
    }
    pub fn actor_id(&self) -> Option<ActorId> {
        self.actor_id
    }
    // store assigns the id on first save
    pub(crate) fn set_actor_id(&mut self, actor_id: ActorId) {
        self.actor_id = Some(actor_id);
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn admissible_managers(&self) -> &BTreeSet<UserId> {
        &self.admissible_managers
    }
    pub fn manager_groups(&self) -> &[ManagerGroup] {
        &self.manager_groups
    }
    pub fn is_manager_in_admissible_managers(&self, manager: &Manager) -> bool {
        self.admissible_managers.contains(&manager.user_id)
    }
    pub fn is_manager_team_member(&self, manager: &Manager) -> bool {
        self.manager_groups.iter().any(|group| group.manager_in(manager))
    }
    pub fn is_valid_actor_for(&self, manager: &Manager) -> bool {
        self.is_manager_in_admissible_managers(manager) || self.is_manager_team_member(manager)
    }
}
