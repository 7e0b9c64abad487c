//! Ideas and their walk along a chain
use super::actor::{IdeaAuthor, Manager};
use super::chain::{Chain, ChainLink};
use super::error::WorkflowError;
use super::meta::ChangeTracking;
use super::types::{ChainLinkId, IdeaId};

/// A submission routed through a chain.
///
/// The idea's state is the link it currently sits on: somewhere in the ordered
/// sequence while in flight, or on one of the chain's technical links once
/// accepted or rejected. Both technical links are terminal.
#[derive(Debug, Clone)]
pub struct Idea {
    idea_id: Option<IdeaId>,
    idea_uid: Option<String>, // minted by the store on first save
    name: String,
    body: String,
    author: IdeaAuthor,
    chain: Chain,
    current_chain_link: ChainLink,
    meta: ChangeTracking,
}

// the read side of an idea, as handed to a presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdeaView {
    pub idea_id: Option<IdeaId>,
    pub idea_uid: Option<String>,
    pub name: String,
    pub body: String,
    pub is_accepted: bool,
    pub is_rejected: bool,
    pub chain_links: Vec<IdeaChainLinkView>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdeaChainLinkView {
    pub chain_link_id: Option<ChainLinkId>,
    pub name: String,
    pub is_current: bool,
}

impl Idea {
    pub const FIRST_POSITION: usize = 1;

    /// Park a new idea on the chain's first link. Empty chains are refused.
    pub fn initialize_new_idea(
        author: IdeaAuthor,
        body: impl Into<String>,
        chain: Chain,
        name: impl Into<String>,
    ) -> Result<Self, WorkflowError> {
        let current_chain_link = chain.first_chain_link()?.clone();

        Ok(Self {
            idea_id: None,
            idea_uid: None,
            name: name.into(),
            body: body.into(),
            author,
            chain,
            current_chain_link,
            meta: ChangeTracking::fresh(),
        })
    }
    pub fn restore(
        idea_id: IdeaId,
        idea_uid: String,
        name: String,
        body: String,
        author: IdeaAuthor,
        chain: Chain,
        current_chain_link: ChainLink,
        meta: ChangeTracking,
    ) -> Self {
        Self {
            idea_id: Some(idea_id),
            idea_uid: Some(idea_uid),
            name,
            body,
            author,
            chain,
            current_chain_link,
            meta,
        }
    }
    pub fn idea_id(&self) -> Option<IdeaId> {
        self.idea_id
    }
    pub fn idea_uid(&self) -> Option<&str> {
        self.idea_uid.as_deref()
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn body(&self) -> &str {
        &self.body
    }
    pub fn author(&self) -> &IdeaAuthor {
        &self.author
    }
    pub fn chain(&self) -> &Chain {
        &self.chain
    }
    pub fn current_chain_link(&self) -> &ChainLink {
        &self.current_chain_link
    }
    pub fn meta(&self) -> &ChangeTracking {
        &self.meta
    }
    pub fn is_new(&self) -> bool {
        self.idea_id.is_none()
    }

    /// Only the first step of the sequence is editable. Accepted and rejected
    /// ideas sit outside the sequence and are never editable.
    pub fn is_editable(&self) -> bool {
        matches!(
            self.chain.element_position(&self.current_chain_link),
            Ok(Self::FIRST_POSITION)
        )
    }
    pub fn update(&mut self, body: &str) {
        if self.body != body {
            self.body = body.to_string();
            self.meta.mark_changed();
        }
    }
    pub fn mark_deleted(&mut self) {
        self.meta.mark_deleted();
    }
    pub fn move_to_next_chain_link(&mut self) -> Result<(), WorkflowError> {
        let next = self
            .chain
            .calc_next_chain_link(&self.current_chain_link)?
            .clone();
        self.current_chain_link = next;
        self.meta.mark_changed();
        Ok(())
    }
    pub fn reject_idea(&mut self) {
        self.current_chain_link = self.chain.reject_chain_link().clone();
        self.meta.mark_changed();
    }
    /// Technical links have no actor, so nobody may act on a finished idea.
    pub fn is_manager_valid_actor(&self, manager: &Manager) -> bool {
        self.current_chain_link
            .actor()
            .is_some_and(|actor| actor.is_valid_actor_for(manager))
    }
    pub fn is_chain_link_current(&self, chain_link: &ChainLink) -> bool {
        self.current_chain_link.same_link(chain_link)
    }
    pub fn is_accepted(&self) -> bool {
        self.is_chain_link_current(self.chain.accept_chain_link())
    }
    pub fn is_rejected(&self) -> bool {
        self.is_chain_link_current(self.chain.reject_chain_link())
    }
    pub fn view(&self) -> IdeaView {
        IdeaView {
            idea_id: self.idea_id,
            idea_uid: self.idea_uid.clone(),
            name: self.name.clone(),
            body: self.body.clone(),
            is_accepted: self.is_accepted(),
            is_rejected: self.is_rejected(),
            chain_links: self
                .chain
                .chain_links()
                .iter()
                .map(|link| IdeaChainLinkView {
                    chain_link_id: link.chain_link_id(),
                    name: link.name().to_string(),
                    is_current: self.is_chain_link_current(link),
                })
                .collect(),
        }
    }

    pub(crate) fn meta_mut(&mut self) -> &mut ChangeTracking {
        &mut self.meta
    }
    pub(crate) fn set_identity(&mut self, idea_id: IdeaId, idea_uid: String) {
        self.idea_id = Some(idea_id);
        self.idea_uid = Some(idea_uid);
    }
}
