//! Service layer API for the idea workflow
//!
//! Each call is one unit of work: load the aggregates it needs, run the
//! domain operation, then save. Any error returns before the save, so
//! storage never sees a partial change.
use super::actor::{Actor, ChainEditor, IdeaAuthor};
use super::chain::{Chain, ChainLink};
use super::config::ExchangeConfig;
use super::error::{StoreError, WorkflowError};
use super::idea::{Idea, IdeaView};
use super::store::{Directory, Repository, SledStore};
use super::types::{ActorId, ChainId, ChainLinkId, GroupId, IdeaId, UserId};
use super::utils::is_external_uid;
use std::sync::Arc;

/// Who may act on a link, as submitted by a chain editor.
#[derive(Debug, Clone)]
pub struct ActorInput {
    pub name: String,
    pub user_ids: Vec<UserId>,
    pub group_ids: Vec<GroupId>,
}

/// One link as submitted by a chain editor. `chain_link_id` is set when the
/// input refers to a link the chain already has.
#[derive(Debug, Clone)]
pub struct ChainLinkInput {
    pub chain_link_id: Option<ChainLinkId>,
    pub actor: ActorInput,
    pub position_in_list: u32,
    pub name: String,
}

pub struct IdeaService<S> {
    store: S,
    config: ExchangeConfig,
}

impl IdeaService<SledStore> {
    pub fn open(instance: Arc<sled::Db>, config: ExchangeConfig) -> Self {
        let store = SledStore::new(instance, &config.idea_uid_prefix);
        Self::new(store, config)
    }
}

impl<S: Directory + Repository> IdeaService<S> {
    pub fn new(store: S, config: ExchangeConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Submit a new idea; it starts on the chain's first link.
    pub fn create_idea(
        &self,
        author_id: UserId,
        chain_id: ChainId,
        name: &str,
        body: &str,
    ) -> Result<Idea, WorkflowError> {
        let author = IdeaAuthor::from(&self.store.load_user(author_id)?);
        let chain = self.store.load_chain(chain_id)?;

        let mut idea = Idea::initialize_new_idea(author, body, chain, name)?;
        self.store.save_idea(&mut idea)?;

        tracing::info!(
            idea_id = ?idea.idea_id(),
            %chain_id,
            %author_id,
            "idea created"
        );
        Ok(idea)
    }

    /// Replace the body of an idea still on its first link. Author only.
    pub fn edit_idea(
        &self,
        idea_id: IdeaId,
        user_id: UserId,
        body: &str,
    ) -> Result<Idea, WorkflowError> {
        let author = IdeaAuthor::from(&self.store.load_user(user_id)?);
        let mut idea = self.store.load_idea(idea_id)?;

        if !author.can_edit_idea(&idea) {
            tracing::warn!(%idea_id, %user_id, "edit refused: not the author");
            return Err(WorkflowError::PermissionDenied);
        }
        if !idea.is_editable() {
            return Err(WorkflowError::IdeaIsNotEditable);
        }

        idea.update(body);
        self.store.save_idea(&mut idea)?;

        tracing::info!(%idea_id, "idea edited");
        Ok(idea)
    }

    /// Soft-delete an idea. Author only.
    pub fn delete_idea(&self, idea_id: IdeaId, user_id: UserId) -> Result<Idea, WorkflowError> {
        let author = IdeaAuthor::from(&self.store.load_user(user_id)?);
        let mut idea = self.store.load_idea(idea_id)?;

        if !author.can_delete_idea(&idea) {
            tracing::warn!(%idea_id, %user_id, "delete refused: not the author");
            return Err(WorkflowError::PermissionDenied);
        }

        idea.mark_deleted();
        self.store.save_idea(&mut idea)?;

        tracing::info!(%idea_id, "idea deleted");
        Ok(idea)
    }

    /// Approve the idea's current step, moving it one link forward.
    pub fn accept_idea(&self, idea_id: IdeaId, manager_id: UserId) -> Result<Idea, WorkflowError> {
        let mut idea = self.load_for_manager(idea_id, manager_id)?;

        idea.move_to_next_chain_link()?;
        self.store.save_idea(&mut idea)?;

        tracing::info!(
            %idea_id,
            %manager_id,
            chain_link = idea.current_chain_link().name(),
            accepted = idea.is_accepted(),
            "idea accepted"
        );
        Ok(idea)
    }

    /// Send the idea to the chain's reject link.
    pub fn reject_idea(&self, idea_id: IdeaId, manager_id: UserId) -> Result<Idea, WorkflowError> {
        let mut idea = self.load_for_manager(idea_id, manager_id)?;

        idea.reject_idea();
        self.store.save_idea(&mut idea)?;

        tracing::info!(%idea_id, %manager_id, "idea rejected");
        Ok(idea)
    }

    fn load_for_manager(&self, idea_id: IdeaId, manager_id: UserId) -> Result<Idea, WorkflowError> {
        let manager = self.store.load_manager(manager_id)?;
        let idea = self.store.load_idea(idea_id)?;

        if !idea.is_manager_valid_actor(&manager) {
            tracing::warn!(
                %idea_id,
                %manager_id,
                chain_link = idea.current_chain_link().name(),
                "manager is not a valid actor"
            );
            return Err(WorkflowError::HasNoPermissions(manager_id));
        }
        Ok(idea)
    }

    /// Build and store a new chain from editor input, ordered by position.
    pub fn create_chain(
        &self,
        editor_id: UserId,
        name: &str,
        inputs: Vec<ChainLinkInput>,
    ) -> Result<Chain, WorkflowError> {
        let editor = ChainEditor::from(&self.store.load_user(editor_id)?);
        let (accept, reject) = self.config.technical_links();
        let mut chain = Chain::initialize_new(editor, name, Some(accept), Some(reject));

        let chain_links = self.build_chain_links(&chain, inputs)?;
        chain.validate_chain_links(&chain_links)?;
        chain.replace_chain_links(chain_links)?;
        self.store.save_chain(&mut chain)?;

        tracing::info!(
            chain_id = ?chain.chain_id(),
            links = chain.chain_links().len(),
            "chain created"
        );
        Ok(chain)
    }

    /// Restructure an existing chain. Links left out of `inputs` are removed,
    /// which fails while any idea still sits on them.
    pub fn update_chain_links(
        &self,
        chain_id: ChainId,
        editor_id: UserId,
        inputs: Vec<ChainLinkInput>,
    ) -> Result<Chain, WorkflowError> {
        let editor = ChainEditor::from(&self.store.load_user(editor_id)?);
        let mut chain = self.store.load_chain(chain_id)?;

        if !editor.can_edit_chain(&chain) {
            tracing::warn!(%chain_id, %editor_id, "chain edit refused: not the author");
            return Err(WorkflowError::PermissionDenied);
        }

        let chain_links = self.build_chain_links(&chain, inputs)?;
        chain.validate_chain_links(&chain_links)?;
        chain.replace_chain_links(chain_links)?;
        let dropped = chain.dropped_chain_links().len();
        self.store.save_chain(&mut chain)?;

        tracing::info!(
            %chain_id,
            links = chain.chain_links().len(),
            dropped,
            "chain relinked"
        );
        Ok(chain)
    }

    /// Read-side lookup by external uid.
    pub fn idea_view(&self, idea_uid: &str) -> Result<IdeaView, WorkflowError> {
        if !is_external_uid(idea_uid, &self.config.idea_uid_prefix) {
            return Err(StoreError::not_found("idea uid", idea_uid).into());
        }
        let idea_id = self.store.idea_id_by_uid(idea_uid)?;
        let idea = self.store.load_idea(idea_id)?;

        Ok(idea.view())
    }

    /// Every live idea the user has submitted, oldest first.
    pub fn user_ideas(&self, author_id: UserId) -> Result<Vec<IdeaView>, WorkflowError> {
        let author = IdeaAuthor::from(&self.store.load_user(author_id)?);
        let ideas = self
            .store
            .idea_ids_by_author(author.user_id)?
            .into_iter()
            .map(|idea_id| self.store.load_idea(idea_id).map(|idea| idea.view()))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(%author_id, ideas = ideas.len(), "user ideas listed");
        Ok(ideas)
    }

    /// Chains new ideas can be submitted to. Deleted chains are skipped.
    pub fn chains(&self) -> Result<Vec<Chain>, WorkflowError> {
        let chains = self
            .store
            .chain_ids()?
            .into_iter()
            .map(|chain_id| self.store.load_chain(chain_id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(chains)
    }

    fn build_chain_links(
        &self,
        chain: &Chain,
        mut inputs: Vec<ChainLinkInput>,
    ) -> Result<Vec<ChainLink>, WorkflowError> {
        inputs.sort_by_key(|input| input.position_in_list);

        inputs
            .into_iter()
            .map(|input| {
                let existing = input
                    .chain_link_id
                    .and_then(|id| chain.chain_link_by_id(id));
                // an existing link keeps its actor record and its idea count
                let actor_id = existing.and_then(|link| link.actor()).and_then(Actor::actor_id);
                let related = existing.map_or(0, ChainLink::number_of_related_ideas);

                let actor = self.build_actor(actor_id, input.actor)?;
                Ok(ChainLink::new(input.chain_link_id, actor, input.name, related))
            })
            .collect()
    }

    fn build_actor(
        &self,
        actor_id: Option<ActorId>,
        input: ActorInput,
    ) -> Result<Actor, WorkflowError> {
        for user_id in &input.user_ids {
            self.store.load_user(*user_id)?;
        }
        let groups = input
            .group_ids
            .iter()
            .map(|group_id| self.store.load_group(*group_id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Actor::new(actor_id, input.name)?
            .with_managers(input.user_ids)
            .with_groups(groups))
    }
}
