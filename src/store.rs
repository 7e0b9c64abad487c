//! Persistence: storage traits and the sled implementation
//!
//! Everything lives in one sled tree under prefixed keys, with ids encoded
//! big-endian so prefix scans come back in id order:
//!
//! - `user/{id}`, `group/{id}`, `actor/{id}`, `link/{id}`, `chain/{id}`,
//!   `idea/{id}` hold minicbor records;
//! - `uid/{idea_uid}` maps an external uid to its idea id;
//! - `at/{link}{idea}` is an empty marker for every live idea parked on a
//!   link, which is where `number_of_related_ideas` comes from;
//! - `by_author/{user}{idea}` marks every live idea of an author.
//!
//! Aggregates are hydrated eagerly. Saves run in a single transaction that
//! checks the stored version against the one the aggregate was loaded with.
use super::actor::{Actor, ChainEditor, IdeaAuthor, Manager, ManagerGroup, User};
use super::chain::{Chain, ChainLink};
use super::error::StoreError;
use super::idea::Idea;
use super::meta::ChangeTracking;
use super::types::{ActorId, ChainId, ChainLinkId, GroupId, IdeaId, TimeStamp, UserId};
use super::utils::new_external_uid;
use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::sync::Arc;

const USER: &[u8] = b"user/";
const GROUP: &[u8] = b"group/";
const ACTOR: &[u8] = b"actor/";
const LINK: &[u8] = b"link/";
const CHAIN: &[u8] = b"chain/";
const IDEA: &[u8] = b"idea/";
const UID: &[u8] = b"uid/";
const PARKED_AT: &[u8] = b"at/";
const BY_AUTHOR: &[u8] = b"by_author/";

/// Identity lookups the workflow needs.
pub trait Directory {
    fn load_user(&self, user_id: UserId) -> Result<User, StoreError>;
    fn load_group(&self, group_id: GroupId) -> Result<ManagerGroup, StoreError>;
    fn load_manager(&self, user_id: UserId) -> Result<Manager, StoreError> {
        self.load_user(user_id).map(|user| Manager::from(&user))
    }
}

/// Aggregate persistence. `save_*` writes ids, version and timestamps back
/// into the aggregate once the write commits and leaves it untouched otherwise.
pub trait Repository {
    fn load_chain(&self, chain_id: ChainId) -> Result<Chain, StoreError>;
    fn save_chain(&self, chain: &mut Chain) -> Result<(), StoreError>;
    fn load_idea(&self, idea_id: IdeaId) -> Result<Idea, StoreError>;
    fn save_idea(&self, idea: &mut Idea) -> Result<(), StoreError>;
    fn idea_id_by_uid(&self, idea_uid: &str) -> Result<IdeaId, StoreError>;
    /// Live ideas of one author, oldest first.
    fn idea_ids_by_author(&self, author_id: UserId) -> Result<Vec<IdeaId>, StoreError>;
    /// Every chain that has not been deleted, oldest first.
    fn chain_ids(&self) -> Result<Vec<ChainId>, StoreError>;
}

#[derive(Debug, minicbor::Encode, minicbor::Decode)]
struct UserRecord {
    #[n(0)]
    user_id: UserId,
    #[n(1)]
    username: String,
}

#[derive(Debug, minicbor::Encode, minicbor::Decode)]
struct GroupRecord {
    #[n(0)]
    group_id: GroupId,
    #[n(1)]
    name: String,
    #[n(2)]
    user_ids: Vec<UserId>,
}

#[derive(Debug, minicbor::Encode, minicbor::Decode)]
struct ActorRecord {
    #[n(0)]
    actor_id: ActorId,
    #[n(1)]
    name: String,
    #[n(2)]
    manager_ids: Vec<UserId>,
    #[n(3)]
    group_ids: Vec<GroupId>,
}

#[derive(Debug, minicbor::Encode, minicbor::Decode)]
struct ChainLinkRecord {
    #[n(0)]
    chain_link_id: ChainLinkId,
    #[n(1)]
    chain_id: ChainId,
    #[n(2)]
    actor_id: Option<ActorId>,
    #[n(3)]
    name: String,
    #[n(4)]
    is_technical: bool,
    #[n(5)]
    is_deleted: bool,
    #[n(6)]
    version: u64,
    #[n(7)]
    created_at: TimeStamp<Utc>,
    #[n(8)]
    updated_at: TimeStamp<Utc>,
}

#[derive(Debug, minicbor::Encode, minicbor::Decode)]
struct ChainRecord {
    #[n(0)]
    chain_id: ChainId,
    #[n(1)]
    name: String,
    #[n(2)]
    author_id: UserId,
    #[n(3)]
    chain_link_ids: Vec<ChainLinkId>, // approval order
    #[n(4)]
    accept_chain_link_id: ChainLinkId,
    #[n(5)]
    reject_chain_link_id: ChainLinkId,
    #[n(6)]
    is_deleted: bool,
    #[n(7)]
    version: u64,
    #[n(8)]
    created_at: TimeStamp<Utc>,
    #[n(9)]
    updated_at: TimeStamp<Utc>,
}

#[derive(Debug, minicbor::Encode, minicbor::Decode)]
struct IdeaRecord {
    #[n(0)]
    idea_id: IdeaId,
    #[n(1)]
    idea_uid: String,
    #[n(2)]
    name: String,
    #[n(3)]
    body: String,
    #[n(4)]
    author_id: UserId,
    #[n(5)]
    chain_id: ChainId,
    #[n(6)]
    current_chain_link_id: ChainLinkId,
    #[n(7)]
    is_deleted: bool,
    #[n(8)]
    version: u64,
    #[n(9)]
    created_at: TimeStamp<Utc>,
    #[n(10)]
    updated_at: TimeStamp<Utc>,
}

// ids a link will carry once its chain commits
struct LinkPlan {
    chain_link_id: ChainLinkId,
    actor_id: Option<ActorId>,
    written: bool,
}

type Writes = Vec<(Vec<u8>, Vec<u8>)>;

fn key(prefix: &[u8], id: u64) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn parked_key(chain_link_id: ChainLinkId, idea_id: IdeaId) -> Vec<u8> {
    let mut key = key(PARKED_AT, chain_link_id.get());
    key.extend_from_slice(&idea_id.to_key());
    key
}

fn author_key(author_id: UserId, idea_id: IdeaId) -> Vec<u8> {
    let mut key = key(BY_AUTHOR, author_id.get());
    key.extend_from_slice(&idea_id.to_key());
    key
}

// trailing big-endian u64 of an index key
fn trailing_id(key: &[u8], kind: &'static str) -> Result<u64, StoreError> {
    key.len()
        .checked_sub(8)
        .and_then(|start| <[u8; 8]>::try_from(&key[start..]).ok())
        .map(u64::from_be_bytes)
        .ok_or(StoreError::Corrupt {
            kind,
            id: 0,
            reason: "index key does not end in a u64",
        })
}

fn uid_key(idea_uid: &str) -> Vec<u8> {
    let mut key = UID.to_vec();
    key.extend_from_slice(idea_uid.as_bytes());
    key
}

fn abort<E: Into<StoreError>>(err: E) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(err.into())
}

fn from_tx(err: TransactionError<StoreError>) -> StoreError {
    match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => StoreError::Sled(err),
    }
}

pub struct SledStore {
    instance: Arc<sled::Db>,
    idea_uid_prefix: String,
}

impl SledStore {
    pub fn new(instance: Arc<sled::Db>, idea_uid_prefix: &str) -> Self {
        Self {
            instance,
            idea_uid_prefix: idea_uid_prefix.to_string(),
        }
    }

    fn next_id(&self) -> Result<u64, StoreError> {
        // sled ids start at 0; keep 0 free so every stored id is non-zero
        Ok(self.instance.generate_id()? + 1)
    }

    fn get<T>(&self, key: &[u8]) -> Result<Option<T>, StoreError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match self.instance.get(key)? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn fetch<T>(&self, prefix: &[u8], id: u64, kind: &'static str) -> Result<T, StoreError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        self.get(&key(prefix, id))?
            .ok_or_else(|| StoreError::not_found(kind, id))
    }

    /// Register a user so it can be resolved as author, editor or manager.
    pub fn insert_user(&self, username: &str) -> Result<User, StoreError> {
        let user_id = UserId::new(self.next_id()?);
        let record = UserRecord {
            user_id,
            username: username.to_string(),
        };
        self.instance
            .insert(key(USER, user_id.get()), minicbor::to_vec(&record)?)?;
        tracing::debug!(%user_id, username, "user registered");

        Ok(User {
            user_id,
            username: record.username,
        })
    }

    /// Register a manager group.
    pub fn insert_group(
        &self,
        name: &str,
        members: Vec<UserId>,
    ) -> Result<ManagerGroup, StoreError> {
        let group_id = GroupId::new(self.next_id()?);
        let record = GroupRecord {
            group_id,
            name: name.to_string(),
            user_ids: members,
        };
        self.instance
            .insert(key(GROUP, group_id.get()), minicbor::to_vec(&record)?)?;
        tracing::debug!(%group_id, name, "group registered");

        Ok(ManagerGroup::new(group_id, record.name, record.user_ids))
    }

    pub fn load_actor(&self, actor_id: ActorId) -> Result<Actor, StoreError> {
        let record: ActorRecord = self.fetch(ACTOR, actor_id.get(), "actor")?;
        let groups = record
            .group_ids
            .iter()
            .map(|group_id| self.load_group(*group_id))
            .collect::<Result<Vec<_>, _>>()?;

        let actor = Actor::new(Some(actor_id), record.name).map_err(|_| StoreError::Corrupt {
            kind: "actor",
            id: actor_id.get(),
            reason: "empty name",
        })?;
        Ok(actor.with_managers(record.manager_ids).with_groups(groups))
    }

    fn count_related_ideas(&self, chain_link_id: ChainLinkId) -> Result<u32, StoreError> {
        let mut related = 0;
        for entry in self.instance.scan_prefix(key(PARKED_AT, chain_link_id.get())) {
            entry?;
            related += 1;
        }
        Ok(related)
    }

    fn load_chain_link(&self, chain_link_id: ChainLinkId) -> Result<ChainLink, StoreError> {
        let record: ChainLinkRecord = self.fetch(LINK, chain_link_id.get(), "chain link")?;
        let actor = record
            .actor_id
            .map(|actor_id| self.load_actor(actor_id))
            .transpose()?;
        let related = self.count_related_ideas(chain_link_id)?;

        Ok(ChainLink::restore(
            chain_link_id,
            actor,
            record.name,
            record.is_technical,
            related,
            ChangeTracking::stored(
                record.created_at,
                record.updated_at,
                record.version,
                record.is_deleted,
            ),
        ))
    }

    // Allocates missing ids and queues the records of a link that needs writing.
    fn plan_link(
        &self,
        chain_id: ChainId,
        link: &ChainLink,
        now: &TimeStamp<Utc>,
        writes: &mut Writes,
    ) -> Result<LinkPlan, StoreError> {
        let chain_link_id = match link.chain_link_id() {
            Some(id) => id,
            None => ChainLinkId::new(self.next_id()?),
        };
        let actor_id = match link.actor() {
            Some(actor) => Some(match actor.actor_id() {
                Some(id) => id,
                None => ActorId::new(self.next_id()?),
            }),
            None => None,
        };

        let written = link.is_new() || link.is_changed();
        if written {
            if let (Some(actor), Some(actor_id)) = (link.actor(), actor_id) {
                let record = ActorRecord {
                    actor_id,
                    name: actor.name().to_string(),
                    manager_ids: actor.admissible_managers().iter().copied().collect(),
                    group_ids: actor.manager_groups().iter().map(|g| g.group_id).collect(),
                };
                writes.push((key(ACTOR, actor_id.get()), minicbor::to_vec(&record)?));
            }
            let meta = link.meta();
            let record = ChainLinkRecord {
                chain_link_id,
                chain_id,
                actor_id,
                name: link.name().to_string(),
                is_technical: link.is_technical(),
                is_deleted: meta.is_deleted(),
                version: meta.version + 1,
                created_at: meta.created_at.clone().unwrap_or_else(|| now.clone()),
                updated_at: now.clone(),
            };
            writes.push((key(LINK, chain_link_id.get()), minicbor::to_vec(&record)?));
        }

        Ok(LinkPlan {
            chain_link_id,
            actor_id,
            written,
        })
    }

    fn apply_link_plan(link: &mut ChainLink, plan: &LinkPlan, now: &TimeStamp<Utc>) {
        link.set_chain_link_id(plan.chain_link_id);
        if let (Some(actor), Some(actor_id)) = (link.actor_mut(), plan.actor_id) {
            actor.set_actor_id(actor_id);
        }
        if plan.written {
            let version = link.meta().version + 1;
            link.meta_mut().committed(version, now.clone());
        }
    }
}

impl Directory for SledStore {
    fn load_user(&self, user_id: UserId) -> Result<User, StoreError> {
        let record: UserRecord = self.fetch(USER, user_id.get(), "user")?;
        Ok(User {
            user_id: record.user_id,
            username: record.username,
        })
    }

    fn load_group(&self, group_id: GroupId) -> Result<ManagerGroup, StoreError> {
        let record: GroupRecord = self.fetch(GROUP, group_id.get(), "group")?;
        Ok(ManagerGroup::new(record.group_id, record.name, record.user_ids))
    }
}

impl Repository for SledStore {
    fn load_chain(&self, chain_id: ChainId) -> Result<Chain, StoreError> {
        let record: ChainRecord = self.fetch(CHAIN, chain_id.get(), "chain")?;
        if record.is_deleted {
            return Err(StoreError::not_found("chain", chain_id));
        }

        let chain_links = record
            .chain_link_ids
            .iter()
            .map(|id| self.load_chain_link(*id))
            .collect::<Result<Vec<_>, _>>()?;
        let accept = self.load_chain_link(record.accept_chain_link_id)?;
        let reject = self.load_chain_link(record.reject_chain_link_id)?;
        tracing::debug!(
            %chain_id,
            links = chain_links.len(),
            version = record.version,
            "chain loaded"
        );

        Ok(Chain::restore(
            chain_id,
            record.name,
            ChainEditor {
                user_id: record.author_id,
            },
            chain_links,
            accept,
            reject,
            ChangeTracking::stored(
                record.created_at,
                record.updated_at,
                record.version,
                record.is_deleted,
            ),
        ))
    }

    fn save_chain(&self, chain: &mut Chain) -> Result<(), StoreError> {
        let dirty = chain.is_new()
            || chain.meta().is_changed()
            || !chain.dropped_chain_links().is_empty()
            || chain.chain_links().iter().any(|l| l.is_new() || l.is_changed());
        if !dirty {
            return Ok(());
        }

        let now = TimeStamp::new();
        let chain_id = match chain.chain_id() {
            Some(id) => id,
            None => ChainId::new(self.next_id()?),
        };
        let mut writes = Writes::new();

        let link_plans = chain
            .chain_links()
            .iter()
            .map(|link| self.plan_link(chain_id, link, &now, &mut writes))
            .collect::<Result<Vec<_>, _>>()?;
        let accept_plan = self.plan_link(chain_id, chain.accept_chain_link(), &now, &mut writes)?;
        let reject_plan = self.plan_link(chain_id, chain.reject_chain_link(), &now, &mut writes)?;
        for dropped in chain.dropped_chain_links() {
            // never stored, nothing to soft-delete
            if dropped.chain_link_id().is_some() {
                self.plan_link(chain_id, dropped, &now, &mut writes)?;
            }
        }

        let expected = chain.meta().version;
        let record = ChainRecord {
            chain_id,
            name: chain.name().to_string(),
            author_id: chain.author().user_id,
            chain_link_ids: link_plans.iter().map(|p| p.chain_link_id).collect(),
            accept_chain_link_id: accept_plan.chain_link_id,
            reject_chain_link_id: reject_plan.chain_link_id,
            is_deleted: chain.meta().is_deleted(),
            version: expected + 1,
            created_at: chain.meta().created_at.clone().unwrap_or_else(|| now.clone()),
            updated_at: now.clone(),
        };
        let chain_key = key(CHAIN, chain_id.get());
        let chain_bytes = minicbor::to_vec(&record)?;

        self.instance
            .transaction(|tx| {
                let found = match tx.get(&chain_key)? {
                    Some(bytes) => minicbor::decode::<ChainRecord>(&bytes).map_err(abort)?.version,
                    None => 0,
                };
                if found != expected {
                    return Err(abort(StoreError::StaleWrite {
                        kind: "chain",
                        id: chain_id.get(),
                        expected,
                        found,
                    }));
                }
                for (k, v) in &writes {
                    tx.insert(k.as_slice(), v.as_slice())?;
                }
                tx.insert(chain_key.as_slice(), chain_bytes.as_slice())?;
                Ok::<_, ConflictableTransactionError<StoreError>>(())
            })
            .map_err(from_tx)
            .inspect_err(|err| tracing::warn!(%chain_id, error = %err, "chain save aborted"))?;

        chain.set_chain_id(chain_id);
        for (link, plan) in chain.chain_links_mut().iter_mut().zip(&link_plans) {
            Self::apply_link_plan(link, plan, &now);
        }
        let [accept, reject] = chain.accept_and_reject_mut();
        Self::apply_link_plan(accept, &accept_plan, &now);
        Self::apply_link_plan(reject, &reject_plan, &now);
        chain.clear_dropped_chain_links();
        chain.meta_mut().committed(expected + 1, now);
        tracing::debug!(%chain_id, version = expected + 1, "chain saved");

        Ok(())
    }

    fn load_idea(&self, idea_id: IdeaId) -> Result<Idea, StoreError> {
        let record: IdeaRecord = self.fetch(IDEA, idea_id.get(), "idea")?;
        if record.is_deleted {
            return Err(StoreError::not_found("idea", idea_id));
        }

        let chain = self.load_chain(record.chain_id)?;
        let current = chain
            .chain_link_by_id(record.current_chain_link_id)
            .cloned()
            .ok_or(StoreError::Corrupt {
                kind: "idea",
                id: idea_id.get(),
                reason: "current chain link is not part of its chain",
            })?;
        tracing::debug!(%idea_id, version = record.version, "idea loaded");

        Ok(Idea::restore(
            idea_id,
            record.idea_uid,
            record.name,
            record.body,
            IdeaAuthor {
                user_id: record.author_id,
            },
            chain,
            current,
            ChangeTracking::stored(
                record.created_at,
                record.updated_at,
                record.version,
                record.is_deleted,
            ),
        ))
    }

    fn save_idea(&self, idea: &mut Idea) -> Result<(), StoreError> {
        if !idea.is_new() && !idea.meta().is_changed() {
            return Ok(());
        }
        let Some(chain_id) = idea.chain().chain_id() else {
            return Err(StoreError::Unsaved("chain"));
        };
        let Some(current_chain_link_id) = idea.current_chain_link().chain_link_id() else {
            return Err(StoreError::Unsaved("chain link"));
        };

        let now = TimeStamp::new();
        let idea_id = match idea.idea_id() {
            Some(id) => id,
            None => IdeaId::new(self.next_id()?),
        };
        let idea_uid = match idea.idea_uid() {
            Some(uid) => uid.to_string(),
            None => new_external_uid(&self.idea_uid_prefix).map_err(StoreError::Uid)?,
        };
        let is_new = idea.is_new();
        let is_deleted = idea.meta().is_deleted();
        let expected = idea.meta().version;

        let record = IdeaRecord {
            idea_id,
            idea_uid: idea_uid.clone(),
            name: idea.name().to_string(),
            body: idea.body().to_string(),
            author_id: idea.author().user_id,
            chain_id,
            current_chain_link_id,
            is_deleted,
            version: expected + 1,
            created_at: idea.meta().created_at.clone().unwrap_or_else(|| now.clone()),
            updated_at: now.clone(),
        };
        let idea_key = key(IDEA, idea_id.get());
        let idea_bytes = minicbor::to_vec(&record)?;
        let parked = parked_key(current_chain_link_id, idea_id);
        let by_author = author_key(idea.author().user_id, idea_id);
        let uid = uid_key(&idea_uid);

        self.instance
            .transaction(|tx| {
                let stored = match tx.get(&idea_key)? {
                    Some(bytes) => Some(minicbor::decode::<IdeaRecord>(&bytes).map_err(abort)?),
                    None => None,
                };
                let found = stored.as_ref().map_or(0, |s| s.version);
                if found != expected {
                    return Err(abort(StoreError::StaleWrite {
                        kind: "idea",
                        id: idea_id.get(),
                        expected,
                        found,
                    }));
                }
                if let Some(stored) = &stored {
                    tx.remove(parked_key(stored.current_chain_link_id, idea_id))?;
                }
                if is_deleted {
                    tx.remove(by_author.as_slice())?;
                } else {
                    tx.insert(parked.as_slice(), &[] as &[u8])?;
                    tx.insert(by_author.as_slice(), &[] as &[u8])?;
                }
                if is_new {
                    tx.insert(uid.as_slice(), &idea_id.to_key()[..])?;
                }
                tx.insert(idea_key.as_slice(), idea_bytes.as_slice())?;
                Ok::<_, ConflictableTransactionError<StoreError>>(())
            })
            .map_err(from_tx)
            .inspect_err(|err| tracing::warn!(%idea_id, error = %err, "idea save aborted"))?;

        idea.set_identity(idea_id, idea_uid);
        idea.meta_mut().committed(expected + 1, now);
        tracing::debug!(%idea_id, version = expected + 1, "idea saved");

        Ok(())
    }

    fn idea_id_by_uid(&self, idea_uid: &str) -> Result<IdeaId, StoreError> {
        let bytes = self
            .instance
            .get(uid_key(idea_uid))?
            .ok_or_else(|| StoreError::not_found("idea uid", idea_uid))?;
        let raw = <[u8; 8]>::try_from(bytes.as_ref()).map_err(|_| StoreError::Corrupt {
            kind: "idea uid",
            id: 0,
            reason: "index entry is not a u64",
        })?;

        Ok(IdeaId::new(u64::from_be_bytes(raw)))
    }

    fn idea_ids_by_author(&self, author_id: UserId) -> Result<Vec<IdeaId>, StoreError> {
        self.instance
            .scan_prefix(key(BY_AUTHOR, author_id.get()))
            .map(|entry| {
                let (k, _) = entry?;
                trailing_id(&k, "idea author index").map(IdeaId::new)
            })
            .collect()
    }

    fn chain_ids(&self) -> Result<Vec<ChainId>, StoreError> {
        let mut chain_ids = vec![];
        for entry in self.instance.scan_prefix(CHAIN) {
            let (_, bytes) = entry?;
            let record: ChainRecord = minicbor::decode(&bytes)?;
            if !record.is_deleted {
                chain_ids.push(record.chain_id);
            }
        }
        Ok(chain_ids)
    }
}
