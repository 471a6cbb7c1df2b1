//! Delete policies: restrict, cascade, depth bounds, and cycles.

use entimap_core::{
    AttrKind, AttributeDef, CoreError, DatabaseConfig, DeletePolicy, ModelSchema, Registry,
};
use entimap_testkit::prelude::*;

#[test]
fn restrict_blocks_while_children_live() {
    let db = TestDb::catalog();
    let vendor = db.seed_vendor("acme");
    let item = db.seed_item(vendor, "SKU-1", "anvil", 10.0, 1, "iron");

    let mut session = db.session();
    let handle = session.get("vendor", vendor).unwrap().expect("vendor");
    match session.delete(&handle).unwrap_err() {
        CoreError::ReferentialIntegrity {
            model,
            pk,
            relation,
        } => {
            assert_eq!(model, "vendor");
            assert_eq!(pk, vendor);
            assert_eq!(relation, "items");
        }
        other => panic!("unexpected error: {other}"),
    }

    // Remove the child and the delete goes through.
    let child = session.get("item", item).unwrap().expect("item");
    session.delete(&child).unwrap();
    assert_eq!(session.delete(&handle).unwrap(), 1);
    assert!(session.get("vendor", vendor).unwrap().is_none());
}

#[test]
fn stale_referrer_does_not_block_a_restricted_delete() {
    let db = TestDb::catalog();
    let vendor = db.seed_vendor("acme");
    let item = db.seed_item(vendor, "SKU-1", "anvil", 10.0, 1, "iron");

    // Drop the child's record out of band, leaving its index entries.
    db.store().del(&format!("item:{item}")).unwrap();

    let mut session = db.session();
    let handle = session.get("vendor", vendor).unwrap().expect("vendor");
    assert_eq!(session.delete(&handle).unwrap(), 1);
}

#[test]
fn cascade_removes_the_whole_chain() {
    let db = TestDb::blog();
    let author = db.seed_thread("ada", 2, 3);
    let posts = db.referrers("author", "posts", author).unwrap();

    let mut session = db.session();
    let handle = session.get("author", author).unwrap().expect("author");
    // 1 author + 2 posts + 6 comments.
    assert_eq!(session.delete(&handle).unwrap(), 9);

    let mut check = db.passthrough_session();
    assert!(check.get("author", author).unwrap().is_none());
    for post in posts {
        assert!(check.get("post", post).unwrap().is_none());
    }
    let report = audit_database(&db).unwrap();
    assert!(report.is_clean(), "{:?}", report.problems);
}

#[test]
fn cascade_poisons_loaded_child_handles() {
    let db = TestDb::blog();
    let author = db.seed_thread("ada", 1, 1);
    let posts = db.referrers("author", "posts", author).unwrap();

    let mut session = db.session();
    let post = session.get("post", posts[0]).unwrap().expect("post");
    let handle = session.get("author", author).unwrap().expect("author");
    session.delete(&handle).unwrap();

    assert!(post.borrow().is_deleted());
    assert!(matches!(
        session.save(&post).unwrap_err(),
        CoreError::EntityDeleted { .. }
    ));
}

#[test]
fn cascade_depth_is_bounded() {
    let db = TestDb::with_config(
        blog_registry(),
        DatabaseConfig::new().with_max_cascade_depth(1),
    );
    let author = db.seed_thread("ada", 1, 1);

    let mut session = db.session();
    let handle = session.get("author", author).unwrap().expect("author");
    match session.delete(&handle).unwrap_err() {
        CoreError::CascadeDepthExceeded { limit } => assert_eq!(limit, 1),
        other => panic!("unexpected error: {other}"),
    }

    // Planning aborted before anything was removed.
    assert!(session.get("author", author).unwrap().is_some());
    let report = audit_database(&db).unwrap();
    assert!(report.is_clean(), "{:?}", report.problems);
}

#[test]
fn self_referential_cycles_terminate() {
    let mut registry = Registry::new();
    registry
        .register(
            ModelSchema::new("category")
                .attribute(AttributeDef::new("label", AttrKind::Text).prefix())
                .foreign_key("parent_id", "category")
                .one_to_many("children", "category", DeletePolicy::Cascade),
        )
        .unwrap();
    let db = TestDb::new(registry);

    let mut session = db.session();
    let a = session.new_entity("category").unwrap();
    a.borrow_mut().set("label", "a").unwrap();
    session.save(&a).unwrap();
    let b = session.new_entity("category").unwrap();
    b.borrow_mut().set("label", "b").unwrap();
    b.borrow_mut()
        .set("parent_id", i64::try_from(a.borrow().pk()).unwrap())
        .unwrap();
    session.save(&b).unwrap();
    a.borrow_mut()
        .set("parent_id", i64::try_from(b.borrow().pk()).unwrap())
        .unwrap();
    session.save(&a).unwrap();

    // Deleting either node takes the cycle down exactly once.
    assert_eq!(session.delete(&a).unwrap(), 2);
    let report = audit_database(&db).unwrap();
    assert!(report.is_clean(), "{:?}", report.problems);
}

#[test]
fn referrers_lists_only_live_children() {
    let db = TestDb::catalog();
    let vendor = db.seed_vendor("acme");
    let keep = db.seed_item(vendor, "SKU-1", "anvil", 10.0, 1, "iron");
    let gone = db.seed_item(vendor, "SKU-2", "rope", 5.0, 2, "hemp");

    let mut session = db.session();
    let handle = session.get("item", gone).unwrap().expect("item");
    session.delete(&handle).unwrap();

    let referrers = db.referrers("vendor", "items", vendor).unwrap();
    assert_eq!(referrers, vec![keep]);

    assert!(matches!(
        db.referrers("vendor", "ghosts", vendor).unwrap_err(),
        CoreError::QueryUsage { .. }
    ));
}
