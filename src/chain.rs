//! Chains of approval steps and the links they are made of
use super::actor::{Actor, ChainEditor};
use super::error::WorkflowError;
use super::meta::ChangeTracking;
use super::types::{ChainId, ChainLinkId};
use std::collections::HashSet;

/// One approval step. Technical links (accept/reject) have no actor and sit
/// outside the chain's ordered sequence.
#[derive(Debug, Clone)]
pub struct ChainLink {
    chain_link_id: Option<ChainLinkId>,
    actor: Option<Actor>,
    name: String,
    is_technical: bool,
    number_of_related_ideas: u32, // ideas currently parked on this link
    meta: ChangeTracking,
}

// Related idea counts and tracking flags are bookkeeping, not content.
impl PartialEq for ChainLink {
    fn eq(&self, other: &Self) -> bool {
        self.chain_link_id == other.chain_link_id
            && self.actor == other.actor
            && self.name == other.name
    }
}

impl ChainLink {
    pub const ACCEPT: &'static str = "Accepted";
    pub const REJECT: &'static str = "Rejected";

    /// A regular link. Links without an id are new and start out changed.
    pub fn new(
        chain_link_id: Option<ChainLinkId>,
        actor: Actor,
        name: impl Into<String>,
        number_of_related_ideas: u32,
    ) -> Self {
        let mut meta = ChangeTracking::default();
        if chain_link_id.is_none() {
            meta.mark_changed();
        }
        Self {
            chain_link_id,
            actor: Some(actor),
            name: name.into(),
            is_technical: false,
            number_of_related_ideas,
            meta,
        }
    }
    pub fn initialize_technical(name: impl Into<String>) -> Self {
        Self {
            chain_link_id: None,
            actor: None,
            name: name.into(),
            is_technical: true,
            number_of_related_ideas: 0,
            meta: ChangeTracking::fresh(),
        }
    }
    /// Rebuild a link from its stored parts.
    pub fn restore(
        chain_link_id: ChainLinkId,
        actor: Option<Actor>,
        name: String,
        is_technical: bool,
        number_of_related_ideas: u32,
        meta: ChangeTracking,
    ) -> Self {
        Self {
            chain_link_id: Some(chain_link_id),
            actor,
            name,
            is_technical,
            number_of_related_ideas,
            meta,
        }
    }
    pub fn chain_link_id(&self) -> Option<ChainLinkId> {
        self.chain_link_id
    }
    pub fn is_new(&self) -> bool {
        self.chain_link_id.is_none()
    }
    pub fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn is_technical(&self) -> bool {
        self.is_technical
    }
    pub fn number_of_related_ideas(&self) -> u32 {
        self.number_of_related_ideas
    }
    pub fn meta(&self) -> &ChangeTracking {
        &self.meta
    }
    pub fn is_changed(&self) -> bool {
        self.meta.is_changed()
    }
    pub fn is_deleted(&self) -> bool {
        self.meta.is_deleted()
    }
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.meta.mark_changed();
    }
    pub fn set_actor(&mut self, actor: Actor) {
        self.actor = Some(actor);
        self.meta.mark_changed();
    }
    pub fn mark_changed(&mut self) {
        self.meta.mark_changed();
    }
    pub fn mark_for_deletion(&mut self) -> Result<(), WorkflowError> {
        self.ensure_deletable()?;
        self.meta.mark_deleted();
        Ok(())
    }
    fn ensure_deletable(&self) -> Result<(), WorkflowError> {
        if self.number_of_related_ideas > 0 {
            return Err(WorkflowError::ChainLinkCantBeDeleted {
                id: self.chain_link_id,
                related_ideas: self.number_of_related_ideas,
            });
        }
        Ok(())
    }
    /// Same step: by id once persisted, structurally before that.
    pub fn same_link(&self, other: &ChainLink) -> bool {
        match (self.chain_link_id, other.chain_link_id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self == other,
            _ => false,
        }
    }
    fn describe(&self) -> String {
        match self.chain_link_id {
            Some(id) => format!("{}:{}", id, self.name),
            None => format!("new:{}", self.name),
        }
    }
    pub(crate) fn actor_mut(&mut self) -> Option<&mut Actor> {
        self.actor.as_mut()
    }
    pub(crate) fn meta_mut(&mut self) -> &mut ChangeTracking {
        &mut self.meta
    }
    pub(crate) fn set_chain_link_id(&mut self, chain_link_id: ChainLinkId) {
        self.chain_link_id = Some(chain_link_id);
    }
}

/// An ordered approval sequence closed by the accept and reject links.
#[derive(Debug, Clone)]
pub struct Chain {
    chain_id: Option<ChainId>,
    name: String,
    author: ChainEditor,
    chain_links: Vec<ChainLink>, // position 1 is the only editable stage
    accept_chain_link: ChainLink,
    reject_chain_link: ChainLink,
    dropped_chain_links: Vec<ChainLink>,
    meta: ChangeTracking,
}

impl Chain {
    /// Create an empty chain. Missing technical links get the default names.
    pub fn initialize_new(
        author: ChainEditor,
        name: impl Into<String>,
        accept_chain_link: Option<ChainLink>,
        reject_chain_link: Option<ChainLink>,
    ) -> Self {
        Self {
            chain_id: None,
            name: name.into(),
            author,
            chain_links: vec![],
            accept_chain_link: accept_chain_link
                .unwrap_or_else(|| ChainLink::initialize_technical(ChainLink::ACCEPT)),
            reject_chain_link: reject_chain_link
                .unwrap_or_else(|| ChainLink::initialize_technical(ChainLink::REJECT)),
            dropped_chain_links: vec![],
            meta: ChangeTracking::fresh(),
        }
    }
    /// Rebuild a chain from hydrated parts.
    pub fn restore(
        chain_id: ChainId,
        name: String,
        author: ChainEditor,
        chain_links: Vec<ChainLink>,
        accept_chain_link: ChainLink,
        reject_chain_link: ChainLink,
        meta: ChangeTracking,
    ) -> Self {
        Self {
            chain_id: Some(chain_id),
            name,
            author,
            chain_links,
            accept_chain_link,
            reject_chain_link,
            dropped_chain_links: vec![],
            meta,
        }
    }
    pub fn chain_id(&self) -> Option<ChainId> {
        self.chain_id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn author(&self) -> &ChainEditor {
        &self.author
    }
    pub fn chain_links(&self) -> &[ChainLink] {
        &self.chain_links
    }
    pub fn accept_chain_link(&self) -> &ChainLink {
        &self.accept_chain_link
    }
    pub fn reject_chain_link(&self) -> &ChainLink {
        &self.reject_chain_link
    }
    pub fn dropped_chain_links(&self) -> &[ChainLink] {
        &self.dropped_chain_links
    }
    pub fn meta(&self) -> &ChangeTracking {
        &self.meta
    }
    pub fn is_new(&self) -> bool {
        self.chain_id.is_none()
    }
    pub fn mark_deleted(&mut self) {
        self.meta.mark_deleted();
    }

    /// 1-based position inside the ordered sequence. Technical links have none.
    pub fn element_position(&self, chain_link: &ChainLink) -> Result<usize, WorkflowError> {
        self.chain_links
            .iter()
            .position(|link| link.same_link(chain_link))
            .map(|idx| idx + 1)
            .ok_or(WorkflowError::ChainLinkNotInChain)
    }

    pub fn first_chain_link(&self) -> Result<&ChainLink, WorkflowError> {
        self.chain_links
            .first()
            .ok_or(WorkflowError::NoChainLinksInChain)
    }

    /// The approve transition: one step forward, past the last step is acceptance.
    pub fn calc_next_chain_link(
        &self,
        chain_link: &ChainLink,
    ) -> Result<&ChainLink, WorkflowError> {
        let idx = self
            .chain_links
            .iter()
            .position(|link| link.same_link(chain_link))
            .ok_or_else(|| WorkflowError::IncorrectChainLink(chain_link.describe()))?;

        Ok(self
            .chain_links
            .get(idx + 1)
            .unwrap_or(&self.accept_chain_link))
    }

    pub fn chain_link_by_id(&self, chain_link_id: ChainLinkId) -> Option<&ChainLink> {
        let id = Some(chain_link_id);
        if self.accept_chain_link.chain_link_id == id {
            return Some(&self.accept_chain_link);
        }
        if self.reject_chain_link.chain_link_id == id {
            return Some(&self.reject_chain_link);
        }
        self.chain_links.iter().find(|link| link.chain_link_id == id)
    }

    /// Candidates that carry an id must already be links of this chain, once each.
    pub fn validate_chain_links(&self, chain_links: &[ChainLink]) -> Result<(), WorkflowError> {
        let known: HashSet<ChainLinkId> = self
            .chain_links
            .iter()
            .filter_map(|link| link.chain_link_id)
            .collect();
        let mut seen = HashSet::new();

        for candidate in chain_links {
            let Some(id) = candidate.chain_link_id else {
                continue;
            };
            if !known.contains(&id) || !seen.insert(id) {
                return Err(WorkflowError::IncorrectChainLink(candidate.describe()));
            }
        }
        Ok(())
    }

    /// Replace the ordered sequence, diffing old against new by id.
    ///
    /// New links and links whose content differs are marked changed, untouched
    /// links keep their flags, and old links missing from `chain_links` are
    /// marked deleted and moved to `dropped_chain_links`. Every check runs
    /// before the chain is touched, so an error leaves it exactly as it was.
    pub fn replace_chain_links(
        &mut self,
        mut chain_links: Vec<ChainLink>,
    ) -> Result<(), WorkflowError> {
        self.validate_chain_links(&chain_links)?;

        let mut used: HashSet<ChainLinkId> = HashSet::new();
        let mut to_mark = vec![];
        let mut stored_meta = vec![];
        for (idx, link) in chain_links.iter().enumerate() {
            let Some(id) = link.chain_link_id else {
                to_mark.push(idx);
                continue;
            };
            let old = self
                .chain_links
                .iter()
                .find(|old| old.chain_link_id == Some(id))
                .ok_or(WorkflowError::InconsistentChainLink(id))?;
            if link != old {
                to_mark.push(idx);
            }
            // version and timestamps belong to the stored link, not the candidate
            stored_meta.push((idx, old.meta.clone()));
            used.insert(id);
        }

        let is_dropped =
            |link: &ChainLink| link.chain_link_id.is_none_or(|id| !used.contains(&id));
        for old in &self.chain_links {
            if is_dropped(old) {
                old.ensure_deletable()?;
            }
        }

        for (idx, meta) in stored_meta {
            chain_links[idx].meta = meta;
        }
        for idx in &to_mark {
            chain_links[*idx].meta.mark_changed();
        }
        let reordered = self.chain_links.len() != chain_links.len()
            || self
                .chain_links
                .iter()
                .zip(&chain_links)
                .any(|(old, new)| old.chain_link_id != new.chain_link_id);

        let old_links = std::mem::replace(&mut self.chain_links, chain_links);
        for mut old in old_links {
            if is_dropped(&old) {
                old.mark_for_deletion()?;
                self.dropped_chain_links.push(old);
            }
        }
        if reordered || !to_mark.is_empty() {
            self.meta.mark_changed();
        }
        Ok(())
    }

    pub(crate) fn meta_mut(&mut self) -> &mut ChangeTracking {
        &mut self.meta
    }
    pub(crate) fn set_chain_id(&mut self, chain_id: ChainId) {
        self.chain_id = Some(chain_id);
    }
    pub(crate) fn accept_and_reject_mut(&mut self) -> [&mut ChainLink; 2] {
        [&mut self.accept_chain_link, &mut self.reject_chain_link]
    }
    pub(crate) fn chain_links_mut(&mut self) -> &mut [ChainLink] {
        &mut self.chain_links
    }
    pub(crate) fn clear_dropped_chain_links(&mut self) {
        self.dropped_chain_links.clear();
    }
}
