//! End-to-end persistence through the file-backed table: reopen, counter
//! continuity, pretty-number contexts, locking.

use revstore::{
    Collaborators, CustomData, PrettyNumber, Revisionable, RevisionableId, RevisionError,
    RevisionNumber, RevisionStorage, RevisionTable, StateGraph, TableStorage, TypeDefinition,
    TypeId, TypeRegistry, UserId,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

const DAVE: UserId = UserId(4);

fn users() -> Arc<dyn revstore::UserProvider> {
    Arc::new(revstore::PermissiveUserProvider)
}

fn page_registry() -> (TypeRegistry, TypeId) {
    let mut builder = StateGraph::builder();
    let draft = builder
        .register_state("draft", "Draft", "badge", true, true)
        .unwrap();
    let live = builder
        .register_state("live", "Live", "badge", false, false)
        .unwrap();
    builder.add_dependency(draft, live);
    let mut registry = TypeRegistry::new();
    let page = TypeId::new("page");
    registry.register(page.clone(), TypeDefinition::new(builder.build()));
    (registry, page)
}

fn context(site: &str) -> CustomData {
    let mut ctx = CustomData::new();
    ctx.insert("site".to_string(), json!(site));
    ctx
}

fn attach(table: &Arc<RevisionTable>, id: u64, site: &str) -> Box<TableStorage> {
    Box::new(TableStorage::attach(
        Arc::clone(table),
        RevisionableId(id),
        context(site),
        users(),
    ))
}

#[test]
fn test_reopen_preserves_history() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pages.rvt");
    let (registry, page) = page_registry();

    {
        let table = RevisionTable::open(&path).unwrap();
        let mut record = Revisionable::create(
            RevisionableId(1),
            &registry,
            &page,
            attach(&table, 1, "docs"),
            Collaborators::default(),
            DAVE,
            "dave",
        )
        .unwrap();
        record.start_transaction(DAVE, "dave", None).unwrap();
        record.set_custom_key("title", json!("Welcome")).unwrap();
        record.set_state("live").unwrap();
        record.end_transaction().unwrap();
    }

    let table = RevisionTable::open(&path).unwrap();
    let record = Revisionable::open(
        RevisionableId(1),
        &registry,
        &page,
        attach(&table, 1, "docs"),
        Collaborators::default(),
    )
    .unwrap();

    assert_eq!(record.revision(), RevisionNumber(2));
    assert_eq!(record.state_name(), "live");
    assert_eq!(record.custom_value("title"), Some(&json!("Welcome")));
    assert_eq!(record.count_revisions().unwrap(), 2);
}

#[test]
fn test_revision_numbers_survive_undo_and_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pages.rvt");
    let (registry, page) = page_registry();

    {
        let table = RevisionTable::open(&path).unwrap();
        let mut record = Revisionable::create(
            RevisionableId(1),
            &registry,
            &page,
            attach(&table, 1, "docs"),
            Collaborators::default(),
            DAVE,
            "dave",
        )
        .unwrap();
        record.make_state("live", DAVE, "dave", None).unwrap();
        record.undo_revision().unwrap();
        assert_eq!(record.revision(), RevisionNumber(1));
    }

    // The removed number 2 is burned for good.
    let table = RevisionTable::open(&path).unwrap();
    let mut record = Revisionable::open(
        RevisionableId(1),
        &registry,
        &page,
        attach(&table, 1, "docs"),
        Collaborators::default(),
    )
    .unwrap();
    record.make_state("live", DAVE, "dave", None).unwrap();
    assert_eq!(record.revision(), RevisionNumber(3));
}

#[test]
fn test_pretty_numbers_scoped_by_context() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pages.rvt");
    let (registry, page) = page_registry();
    let table = RevisionTable::open(&path).unwrap();

    let mut same_site = Vec::new();
    for id in 1..=2 {
        let record = Revisionable::create(
            RevisionableId(id),
            &registry,
            &page,
            attach(&table, id, "docs"),
            Collaborators::default(),
            DAVE,
            "dave",
        )
        .unwrap();
        same_site.push(record.selected_data().pretty);
    }
    // Same context: the sequence continues across records.
    assert_eq!(same_site, vec![PrettyNumber(1), PrettyNumber(2)]);

    // A different context starts its own sequence.
    let other = Revisionable::create(
        RevisionableId(3),
        &registry,
        &page,
        attach(&table, 3, "blog"),
        Collaborators::default(),
        DAVE,
        "dave",
    )
    .unwrap();
    assert_eq!(other.selected_data().pretty, PrettyNumber(1));
}

#[test]
fn test_table_lock_is_exclusive() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pages.rvt");

    let _held = RevisionTable::open(&path).unwrap();
    let second = RevisionTable::open(&path);
    assert!(matches!(second, Err(RevisionError::Locked)));
}

#[test]
fn test_corrupt_file_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pages.rvt");
    std::fs::write(&path, b"not a revision table").unwrap();

    let result = RevisionTable::open(&path);
    assert!(matches!(result, Err(RevisionError::InvalidFormat(_))));
}

#[test]
fn test_data_keys_persist() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pages.rvt");
    let (registry, page) = page_registry();

    {
        let table = RevisionTable::open(&path).unwrap();
        let record = Revisionable::create(
            RevisionableId(1),
            &registry,
            &page,
            attach(&table, 1, "docs"),
            Collaborators::default(),
            DAVE,
            "dave",
        )
        .unwrap();
        record
            .storage()
            .write_data_key(RevisionNumber(1), "preview", json!("png-bytes"))
            .unwrap();
    }

    let table = RevisionTable::open(&path).unwrap();
    let storage = attach(&table, 1, "docs");
    assert_eq!(
        storage
            .read_data_key(RevisionNumber(1), "preview")
            .unwrap(),
        Some(json!("png-bytes"))
    );
}

#[test]
fn test_simulated_transaction_burns_numbers_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pages.rvt");
    let (registry, page) = page_registry();

    {
        let table = RevisionTable::open(&path).unwrap();
        let mut record = Revisionable::create(
            RevisionableId(1),
            &registry,
            &page,
            attach(&table, 1, "docs"),
            Collaborators::default(),
            DAVE,
            "dave",
        )
        .unwrap();

        record.start_transaction(DAVE, "dave", None).unwrap();
        record.simulate(true).unwrap();
        record.set_part_changed("body", true).unwrap();
        record.end_transaction().unwrap();
        assert_eq!(record.revision(), RevisionNumber(1));
    }

    let table = RevisionTable::open(&path).unwrap();
    let mut record = Revisionable::open(
        RevisionableId(1),
        &registry,
        &page,
        attach(&table, 1, "docs"),
        Collaborators::default(),
    )
    .unwrap();
    record.make_state("live", DAVE, "dave", None).unwrap();
    // Number 2 went to the simulated mint and is never reused.
    assert_eq!(record.revision(), RevisionNumber(3));
}
