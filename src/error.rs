use crate::types::{ChainLinkId, UserId};

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("User is not the author of this idea or chain")]
    PermissionDenied,
    #[error("Manager {0} cannot act on the idea's current chain link")]
    HasNoPermissions(UserId),
    #[error("Idea has left the first chain link and can no longer be edited")]
    IdeaIsNotEditable,
    #[error("Chain link is not part of the chain's approval sequence")]
    ChainLinkNotInChain,
    #[error("Chain has no chain links configured")]
    NoChainLinksInChain,
    #[error("Chain link {0} does not belong to this chain")]
    IncorrectChainLink(String),
    #[error("Chain link {id:?} is still referenced by {related_ideas} idea(s)")]
    ChainLinkCantBeDeleted {
        id: Option<ChainLinkId>,
        related_ideas: u32,
    },
    #[error("Actor name must not be empty")]
    EmptyActorName,
    #[error("Chain link {0} passed validation but is missing from the chain")]
    InconsistentChainLink(ChainLinkId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} {id} was modified concurrently: expected version {expected}, found {found}")]
    StaleWrite {
        kind: &'static str,
        id: u64,
        expected: u64,
        found: u64,
    },
    #[error("{0} must be saved first")]
    Unsaved(&'static str),
    #[error("stored {kind} {id} is malformed: {reason}")]
    Corrupt {
        kind: &'static str,
        id: u64,
        reason: &'static str,
    },
    #[error(transparent)]
    Sled(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encode(#[from] minicbor::encode::Error<std::convert::Infallible>),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("failed to mint an external uid: {0}")]
    Uid(anyhow::Error),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
