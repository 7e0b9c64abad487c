use anyhow::Context;
use idea_exchange::{
    actor::User,
    config::ExchangeConfig,
    error::{StoreError, WorkflowError},
    service::{ActorInput, ChainLinkInput, IdeaService},
    store::{Repository, SledStore},
    types::{ChainId, IdeaId},
};
use sled::open;
use std::sync::Arc;

use tempfile::{TempDir, tempdir}; // Use for test db cleanup.

// Sled holds a file lock on its directory, so every test opens its own
// database under a temp dir that is removed when the guard drops.
struct Harness {
    _dir: TempDir,
    service: IdeaService<SledStore>,
    author: User,
    editor: User,
    first_manager: User,
    second_manager: User,
    outsider: User,
}

fn harness(db_name: &str) -> anyhow::Result<Harness> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let dir = tempdir()?;
    let db = Arc::new(open(dir.path().join(db_name))?);
    let service = IdeaService::open(db, ExchangeConfig::default());

    let store = service.store();
    let author = store.insert_user("author")?;
    let editor = store.insert_user("editor")?;
    let first_manager = store.insert_user("first manager")?;
    let second_manager = store.insert_user("second manager")?;
    let outsider = store.insert_user("outsider")?;

    Ok(Harness {
        _dir: dir,
        service,
        author,
        editor,
        first_manager,
        second_manager,
        outsider,
    })
}

fn link_input(position: u32, name: &str, managers: &[&User]) -> ChainLinkInput {
    ChainLinkInput {
        chain_link_id: None,
        actor: ActorInput {
            name: format!("{name} actor"),
            user_ids: managers.iter().map(|m| m.user_id).collect(),
            group_ids: vec![],
        },
        position_in_list: position,
        name: name.to_string(),
    }
}

fn two_step_chain(h: &Harness) -> anyhow::Result<ChainId> {
    // submitted out of order on purpose; position decides the sequence
    let chain = h.service.create_chain(
        h.editor.user_id,
        "Default",
        vec![
            link_input(2, "Board", &[&h.second_manager]),
            link_input(1, "Team lead", &[&h.first_manager]),
        ],
    )?;
    chain.chain_id().context("chain id missing after save")
}

fn submit(h: &Harness, chain_id: ChainId) -> anyhow::Result<IdeaId> {
    let idea = h
        .service
        .create_idea(h.author.user_id, chain_id, "Storage", "Move to sled")?;
    idea.idea_id().context("idea id missing after save")
}

#[test]
fn create_chain_orders_links_by_position() -> anyhow::Result<()> {
    let h = harness("test_create_chain.db")?;
    let chain_id = two_step_chain(&h)?;

    let chain = h.service.store().load_chain(chain_id)?;
    let names: Vec<&str> = chain.chain_links().iter().map(|l| l.name()).collect();

    assert_eq!(names, vec!["Team lead", "Board"]);
    assert_eq!(chain.accept_chain_link().name(), "Accepted");
    assert_eq!(chain.reject_chain_link().name(), "Rejected");
    assert!(chain.accept_chain_link().chain_link_id().is_some());
    assert!(!chain.meta().is_changed());
    assert_eq!(chain.meta().version, 1);

    Ok(())
}

#[test]
fn submit_and_accept_through_every_link() -> anyhow::Result<()> {
    let h = harness("test_accept_flow.db")?;
    let chain_id = two_step_chain(&h)?;
    let idea_id = submit(&h, chain_id)?;

    let idea = h.service.store().load_idea(idea_id)?;
    assert_eq!(idea.current_chain_link().name(), "Team lead");
    assert!(idea.is_editable());

    // the board cannot act while the team lead holds the idea
    let res = h.service.accept_idea(idea_id, h.second_manager.user_id);
    assert!(matches!(res, Err(WorkflowError::HasNoPermissions(_))));

    let idea = h
        .service
        .accept_idea(idea_id, h.first_manager.user_id)
        .context("Idea failed on first approval: ")?;
    assert_eq!(idea.current_chain_link().name(), "Board");
    assert!(!idea.is_editable());

    let idea = h
        .service
        .accept_idea(idea_id, h.second_manager.user_id)
        .context("Idea failed on second approval: ")?;
    assert!(idea.is_accepted());

    // and the stored copy agrees
    let stored = h.service.store().load_idea(idea_id)?;
    assert!(stored.is_accepted());
    assert!(!stored.is_editable());

    Ok(())
}

#[test]
fn reject_from_second_link() -> anyhow::Result<()> {
    let h = harness("test_reject.db")?;
    let chain_id = two_step_chain(&h)?;
    let idea_id = submit(&h, chain_id)?;

    h.service.accept_idea(idea_id, h.first_manager.user_id)?;
    let idea = h.service.reject_idea(idea_id, h.second_manager.user_id)?;

    assert!(idea.is_rejected());
    assert!(!idea.is_accepted());

    // finished ideas have no actor left to act
    let res = h.service.accept_idea(idea_id, h.second_manager.user_id);
    assert!(matches!(res, Err(WorkflowError::HasNoPermissions(_))));

    Ok(())
}

#[test]
fn outsider_cannot_reject() -> anyhow::Result<()> {
    let h = harness("test_outsider.db")?;
    let chain_id = two_step_chain(&h)?;
    let idea_id = submit(&h, chain_id)?;

    let res = h.service.reject_idea(idea_id, h.outsider.user_id);

    assert!(matches!(res, Err(WorkflowError::HasNoPermissions(id)) if id == h.outsider.user_id));
    assert_eq!(
        h.service.store().load_idea(idea_id)?.current_chain_link().name(),
        "Team lead"
    );

    Ok(())
}

#[test]
fn group_members_can_act() -> anyhow::Result<()> {
    let h = harness("test_group.db")?;
    let group = h
        .service
        .store()
        .insert_group("reviewers", vec![h.outsider.user_id])?;
    let chain = h.service.create_chain(
        h.editor.user_id,
        "Grouped",
        vec![ChainLinkInput {
            chain_link_id: None,
            actor: ActorInput {
                name: "Reviewers".into(),
                user_ids: vec![],
                group_ids: vec![group.group_id],
            },
            position_in_list: 1,
            name: "Review".into(),
        }],
    )?;
    let idea_id = submit(&h, chain.chain_id().context("no chain id")?)?;

    let idea = h.service.accept_idea(idea_id, h.outsider.user_id)?;

    assert!(idea.is_accepted());
    Ok(())
}

#[test]
fn only_author_edits_and_only_on_first_link() -> anyhow::Result<()> {
    let h = harness("test_edit.db")?;
    let chain_id = two_step_chain(&h)?;
    let idea_id = submit(&h, chain_id)?;

    let res = h.service.edit_idea(idea_id, h.outsider.user_id, "hijacked");
    assert!(matches!(res, Err(WorkflowError::PermissionDenied)));

    let idea = h
        .service
        .edit_idea(idea_id, h.author.user_id, "Move to sled with transactions")?;
    assert_eq!(idea.body(), "Move to sled with transactions");
    assert_eq!(idea.meta().version, 2);

    h.service.accept_idea(idea_id, h.first_manager.user_id)?;
    let res = h.service.edit_idea(idea_id, h.author.user_id, "too late");
    assert!(matches!(res, Err(WorkflowError::IdeaIsNotEditable)));

    let stored = h.service.store().load_idea(idea_id)?;
    assert_eq!(stored.body(), "Move to sled with transactions");

    Ok(())
}

#[test]
fn deleted_idea_is_gone() -> anyhow::Result<()> {
    let h = harness("test_delete.db")?;
    let chain_id = two_step_chain(&h)?;
    let idea_id = submit(&h, chain_id)?;

    let res = h.service.delete_idea(idea_id, h.first_manager.user_id);
    assert!(matches!(res, Err(WorkflowError::PermissionDenied)));

    let idea = h.service.delete_idea(idea_id, h.author.user_id)?;
    assert!(idea.meta().is_deleted());

    let res = h.service.store().load_idea(idea_id);
    assert!(matches!(res, Err(StoreError::NotFound { kind: "idea", .. })));

    Ok(())
}

#[test]
fn empty_chain_refuses_ideas() -> anyhow::Result<()> {
    let h = harness("test_empty_chain.db")?;
    let chain = h.service.create_chain(h.editor.user_id, "Empty", vec![])?;

    let res = h.service.create_idea(
        h.author.user_id,
        chain.chain_id().context("no chain id")?,
        "Nowhere",
        "to go",
    );

    assert!(matches!(res, Err(WorkflowError::NoChainLinksInChain)));
    Ok(())
}

#[test]
fn link_in_use_cannot_be_removed() -> anyhow::Result<()> {
    let h = harness("test_relink_guard.db")?;
    let chain_id = two_step_chain(&h)?;
    submit(&h, chain_id)?;

    let chain = h.service.store().load_chain(chain_id)?;
    let first = &chain.chain_links()[0];
    let board = &chain.chain_links()[1];
    assert_eq!(first.number_of_related_ideas(), 1);

    // keep the board, drop the team lead that holds the idea
    let keep_board = ChainLinkInput {
        chain_link_id: board.chain_link_id(),
        ..link_input(1, "Board", &[&h.second_manager])
    };
    let res = h
        .service
        .update_chain_links(chain_id, h.editor.user_id, vec![keep_board]);
    assert!(matches!(res, Err(WorkflowError::ChainLinkCantBeDeleted { .. })));

    // nothing reached storage
    let stored = h.service.store().load_chain(chain_id)?;
    assert_eq!(stored.chain_links().len(), 2);
    assert_eq!(stored.meta().version, 1);

    Ok(())
}

#[test]
fn unused_link_can_be_removed_and_renamed_links_kept() -> anyhow::Result<()> {
    let h = harness("test_relink.db")?;
    let chain_id = two_step_chain(&h)?;
    let idea_id = submit(&h, chain_id)?;

    let chain = h.service.store().load_chain(chain_id)?;
    let first_id = chain.chain_links()[0].chain_link_id();
    let board_id = chain.chain_links()[1].chain_link_id();

    let inputs = vec![
        ChainLinkInput {
            chain_link_id: first_id,
            ..link_input(1, "Team lead review", &[&h.first_manager])
        },
        link_input(2, "Legal", &[&h.outsider]),
    ];
    let chain = h
        .service
        .update_chain_links(chain_id, h.editor.user_id, inputs)?;
    assert!(chain.dropped_chain_links().is_empty());
    assert_eq!(chain.meta().version, 2);

    let stored = h.service.store().load_chain(chain_id)?;
    let names: Vec<&str> = stored.chain_links().iter().map(|l| l.name()).collect();
    assert_eq!(names, vec!["Team lead review", "Legal"]);
    assert_eq!(stored.chain_links()[0].chain_link_id(), first_id);
    assert!(stored.chain_links().iter().all(|l| l.chain_link_id() != board_id));

    // the parked idea follows the renamed link and the new sequence
    let idea = h.service.accept_idea(idea_id, h.first_manager.user_id)?;
    assert_eq!(idea.current_chain_link().name(), "Legal");

    Ok(())
}

#[test]
fn foreign_link_is_refused() -> anyhow::Result<()> {
    let h = harness("test_foreign_link.db")?;
    let chain_id = two_step_chain(&h)?;
    let other_id = two_step_chain(&h)?;
    let other = h.service.store().load_chain(other_id)?;

    let stolen = ChainLinkInput {
        chain_link_id: other.chain_links()[0].chain_link_id(),
        ..link_input(1, "Stolen", &[&h.first_manager])
    };
    let res = h
        .service
        .update_chain_links(chain_id, h.editor.user_id, vec![stolen]);

    assert!(matches!(res, Err(WorkflowError::IncorrectChainLink(_))));
    Ok(())
}

#[test]
fn only_chain_author_can_relink() -> anyhow::Result<()> {
    let h = harness("test_relink_author.db")?;
    let chain_id = two_step_chain(&h)?;

    let res = h.service.update_chain_links(chain_id, h.author.user_id, vec![]);

    assert!(matches!(res, Err(WorkflowError::PermissionDenied)));
    Ok(())
}

#[test]
fn stale_idea_write_is_refused() -> anyhow::Result<()> {
    let h = harness("test_stale.db")?;
    let chain_id = two_step_chain(&h)?;
    let idea_id = submit(&h, chain_id)?;

    let store = h.service.store();
    let mut first = store.load_idea(idea_id)?;
    let mut second = store.load_idea(idea_id)?;

    first.update("first writer");
    store.save_idea(&mut first)?;

    second.update("second writer");
    let res = store.save_idea(&mut second);
    assert!(matches!(
        res,
        Err(StoreError::StaleWrite {
            kind: "idea",
            expected: 1,
            found: 2,
            ..
        })
    ));
    assert_eq!(store.load_idea(idea_id)?.body(), "first writer");

    Ok(())
}

#[test]
fn idea_view_by_uid() -> anyhow::Result<()> {
    let h = harness("test_view.db")?;
    let chain_id = two_step_chain(&h)?;
    let idea = h
        .service
        .create_idea(h.author.user_id, chain_id, "Storage", "Move to sled")?;
    let uid = idea.idea_uid().context("uid missing after save")?.to_string();
    assert!(uid.starts_with("idea_1"));

    h.service
        .accept_idea(idea.idea_id().context("no id")?, h.first_manager.user_id)?;
    let view = h.service.idea_view(&uid)?;

    assert_eq!(view.name, "Storage");
    assert_eq!(view.idea_uid.as_deref(), Some(uid.as_str()));
    let current: Vec<(&str, bool)> = view
        .chain_links
        .iter()
        .map(|l| (l.name.as_str(), l.is_current))
        .collect();
    assert_eq!(current, vec![("Team lead", false), ("Board", true)]);

    let res = h.service.idea_view("idea_unknown");
    assert!(matches!(
        res,
        Err(WorkflowError::Store(StoreError::NotFound { .. }))
    ));

    Ok(())
}

#[test]
fn unknown_ids_are_not_found() -> anyhow::Result<()> {
    let h = harness("test_not_found.db")?;

    let res = h
        .service
        .create_idea(h.author.user_id, ChainId::new(9_999), "x", "y");
    assert!(matches!(
        res,
        Err(WorkflowError::Store(StoreError::NotFound { kind: "chain", .. }))
    ));

    let res = h.service.accept_idea(IdeaId::new(9_999), h.first_manager.user_id);
    assert!(matches!(
        res,
        Err(WorkflowError::Store(StoreError::NotFound { kind: "idea", .. }))
    ));

    Ok(())
}

#[test]
fn relinked_link_keeps_its_history() -> anyhow::Result<()> {
    let h = harness("test_link_history.db")?;
    let chain_id = two_step_chain(&h)?;

    let chain = h.service.store().load_chain(chain_id)?;
    let first_id = chain.chain_links()[0].chain_link_id();
    let board_id = chain.chain_links()[1].chain_link_id();
    let created_at = chain.chain_links()[0].meta().created_at.clone();
    assert!(created_at.is_some());
    assert_eq!(chain.chain_links()[0].meta().version, 1);

    for (version, name) in [(2, "Team lead triage"), (3, "Team lead sign-off")] {
        let inputs = vec![
            ChainLinkInput {
                chain_link_id: first_id,
                ..link_input(1, name, &[&h.first_manager])
            },
            ChainLinkInput {
                chain_link_id: board_id,
                ..link_input(2, "Board", &[&h.second_manager])
            },
        ];
        h.service
            .update_chain_links(chain_id, h.editor.user_id, inputs)?;

        let stored = h.service.store().load_chain(chain_id)?;
        let first = &stored.chain_links()[0];
        assert_eq!(first.name(), name);
        assert_eq!(first.meta().version, version);
        assert_eq!(first.meta().created_at, created_at);
    }

    // the board was never edited
    let stored = h.service.store().load_chain(chain_id)?;
    assert_eq!(stored.chain_links()[1].meta().version, 1);
    assert_eq!(stored.meta().version, 3);

    Ok(())
}

#[test]
fn stale_chain_write_is_refused() -> anyhow::Result<()> {
    let h = harness("test_stale_chain.db")?;
    let chain_id = two_step_chain(&h)?;

    let store = h.service.store();
    let mut first = store.load_chain(chain_id)?;
    let mut second = store.load_chain(chain_id)?;

    first.replace_chain_links(vec![])?;
    store.save_chain(&mut first)?;

    second.replace_chain_links(vec![])?;
    let res = store.save_chain(&mut second);
    assert!(matches!(
        res,
        Err(StoreError::StaleWrite {
            kind: "chain",
            expected: 1,
            found: 2,
            ..
        })
    ));
    assert!(store.load_chain(chain_id)?.chain_links().is_empty());

    Ok(())
}

#[test]
fn user_ideas_lists_live_ideas_of_one_author() -> anyhow::Result<()> {
    let h = harness("test_user_ideas.db")?;
    let chain_id = two_step_chain(&h)?;

    let dropped = h
        .service
        .create_idea(h.author.user_id, chain_id, "Dropped", "never mind")?;
    h.service
        .create_idea(h.author.user_id, chain_id, "Storage", "Move to sled")?;
    h.service
        .create_idea(h.author.user_id, chain_id, "Logging", "Use tracing")?;
    h.service
        .create_idea(h.outsider.user_id, chain_id, "Elsewhere", "not mine")?;
    h.service.delete_idea(
        dropped.idea_id().context("no idea id")?,
        h.author.user_id,
    )?;

    let ideas = h.service.user_ideas(h.author.user_id)?;
    let names: Vec<&str> = ideas.iter().map(|idea| idea.name.as_str()).collect();
    assert_eq!(names, vec!["Storage", "Logging"]);

    assert!(h.service.user_ideas(h.editor.user_id)?.is_empty());
    let res = h.service.user_ideas(idea_exchange::types::UserId::new(9_999));
    assert!(matches!(
        res,
        Err(WorkflowError::Store(StoreError::NotFound { kind: "user", .. }))
    ));

    Ok(())
}

#[test]
fn chains_skips_deleted_chains() -> anyhow::Result<()> {
    let h = harness("test_chains.db")?;
    let kept_id = two_step_chain(&h)?;
    let deleted_id = two_step_chain(&h)?;

    let store = h.service.store();
    let mut deleted = store.load_chain(deleted_id)?;
    deleted.mark_deleted();
    store.save_chain(&mut deleted)?;

    let chain_ids: Vec<Option<ChainId>> = h
        .service
        .chains()?
        .iter()
        .map(|chain| chain.chain_id())
        .collect();
    assert_eq!(chain_ids, vec![Some(kept_id)]);

    Ok(())
}

#[test]
fn technical_link_names_come_from_config() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db = Arc::new(open(dir.path().join("test_link_names.db"))?);
    let config = ExchangeConfig::new()
        .set_accept_link_name("Approved")
        .set_reject_link_name("Declined");
    let service = IdeaService::open(db, config);
    let editor = service.store().insert_user("editor")?;
    let manager = service.store().insert_user("manager")?;

    let chain = service.create_chain(
        editor.user_id,
        "Named",
        vec![link_input(1, "Review", &[&manager])],
    )?;
    let chain_id = chain.chain_id().context("no chain id")?;
    let idea = service.create_idea(editor.user_id, chain_id, "Storage", "Move to sled")?;
    let idea = service.accept_idea(idea.idea_id().context("no idea id")?, manager.user_id)?;

    // acceptance follows the link, whatever it is called
    assert!(idea.is_accepted());
    assert_eq!(idea.current_chain_link().name(), "Approved");
    assert_eq!(
        service.store().load_chain(chain_id)?.reject_chain_link().name(),
        "Declined"
    );

    Ok(())
}
