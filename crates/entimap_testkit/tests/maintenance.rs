//! Crash compensation and stale index cleanup.

use std::sync::Arc;

use entimap_core::{
    clean_old_index, CoreError, Database, DatabaseConfig, StaleSource, WriteMode,
};
use entimap_store::{InMemoryStore, StoreBackend, StoreError};
use entimap_testkit::prelude::*;

fn fallback_db_on(fault: &Arc<FaultStore>) -> Database {
    Database::new(
        Arc::clone(fault) as Arc<dyn StoreBackend>,
        catalog_registry(),
        DatabaseConfig::new().with_write_mode(WriteMode::Fallback),
    )
    .expect("open database")
}

#[test]
fn fallback_crash_before_data_releases_the_claimed_marker() {
    let fault = Arc::new(FaultStore::wrap(Arc::new(InMemoryStore::new())));
    let db = fallback_db_on(&fault);

    let mut session = db.session();
    let item = session.new_entity("item").unwrap();
    item.borrow_mut().set("sku", "SKU-TORN").unwrap();
    item.borrow_mut().set("name", "torn").unwrap();
    let pk = item.borrow().pk();

    // Mutation 1 claims the sku marker; mutation 2 is the first write
    // of the record itself.
    fault.arm(2);
    let err = session.save(&item).unwrap_err();
    assert!(matches!(err, CoreError::Store(StoreError::Backend(_))));

    // The claim was compensated and nothing of the entity persisted.
    assert!(fault.hget("item:sku:uidx", "SKU-TORN").unwrap().is_none());
    assert!(!fault.exists(&format!("item:{pk}")).unwrap());

    // A retry rebuilds the whole write from scratch.
    fault.disarm();
    session.save(&item).unwrap();
    assert!(session.get_by("item", "sku", "SKU-TORN").unwrap().is_some());
    let report = audit_database(&db).unwrap();
    assert!(report.is_clean(), "{:?}", report.problems);
}

#[test]
fn fallback_crash_mid_index_is_visible_and_heals_on_retry() {
    let fault = Arc::new(FaultStore::wrap(Arc::new(InMemoryStore::new())));
    let db = fallback_db_on(&fault);

    let mut session = db.session();
    let item = session.new_entity("item").unwrap();
    item.borrow_mut().set("sku", "SKU-TORN").unwrap();
    item.borrow_mut().set("name", "torn").unwrap();
    let pk = item.borrow().pk();

    // Die after the record fields are written but before the index
    // writes finish: marker, two record fields, then boom.
    fault.arm(5);
    assert!(session.save(&item).is_err());

    // The marker was released, the half-written record is flagged.
    assert!(fault.hget("item:sku:uidx", "SKU-TORN").unwrap().is_none());
    assert!(fault.exists(&format!("item:{pk}")).unwrap());
    let report = audit_model(&db, "item").unwrap();
    assert!(!report.is_clean());

    fault.disarm();
    session.save(&item).unwrap();
    let report = audit_database(&db).unwrap();
    assert!(report.is_clean(), "{:?}", report.problems);
}

#[test]
fn atomic_crash_leaves_no_trace_at_all() {
    let fault = Arc::new(FaultStore::wrap(Arc::new(InMemoryStore::new())));
    let db = Database::new(
        Arc::clone(&fault) as Arc<dyn StoreBackend>,
        catalog_registry(),
        DatabaseConfig::new(),
    )
    .unwrap();

    let mut session = db.session();
    let item = session.new_entity("item").unwrap();
    item.borrow_mut().set("sku", "SKU-ATOMIC").unwrap();
    let pk = item.borrow().pk();

    fault.arm(1);
    assert!(session.save(&item).is_err());
    assert!(!fault.exists(&format!("item:{pk}")).unwrap());
    assert!(fault.hget("item:sku:uidx", "SKU-ATOMIC").unwrap().is_none());

    fault.disarm();
    session.save(&item).unwrap();
    let report = audit_database(&db).unwrap();
    assert!(report.is_clean(), "{:?}", report.problems);
}

#[test]
fn sweep_cleans_out_of_band_deletions() {
    let db = TestDb::catalog();
    let vendor = db.seed_vendor("acme");
    let keep = db.seed_item(vendor, "SKU-1", "anvil", 10.0, 1, "iron");
    let dead_a = db.seed_item(vendor, "SKU-2", "rope", 5.0, 2, "hemp");
    let dead_b = db.seed_item(vendor, "SKU-3", "tarp", 7.0, 3, "canvas");

    for pk in [dead_a, dead_b] {
        db.store().del(&format!("item:{pk}")).unwrap();
    }
    let before = audit_model(&db, "item").unwrap();
    assert!(!before.is_clean());

    let report = clean_old_index(&db, None).unwrap();
    let swept: Vec<u64> = report
        .stale
        .iter()
        .filter(|e| e.source == StaleSource::Footprint)
        .map(|e| e.pk)
        .collect();
    assert!(swept.contains(&dead_a) && swept.contains(&dead_b));
    assert!(!swept.contains(&keep));
    assert!(report
        .stale
        .iter()
        .any(|e| matches!(e.source, StaleSource::UniqueMarker { .. })));

    let after = audit_database(&db).unwrap();
    assert!(after.is_clean(), "{:?}", after.problems);
    assert!(clean_old_index(&db, None).unwrap().is_clean());

    // The survivor is untouched.
    let mut session = db.session();
    assert_eq!(
        session.get_by("item", "sku", "SKU-1").unwrap().unwrap().borrow().pk(),
        keep
    );
}

#[test]
fn sweep_scoped_to_one_model_skips_the_rest() {
    let db = TestDb::catalog();
    let vendor_pk = db.seed_vendor("doomed");
    let other_vendor = db.seed_vendor("acme");
    let item_pk = db.seed_item(other_vendor, "SKU-1", "anvil", 10.0, 1, "iron");

    db.store().del(&format!("vendor:{vendor_pk}")).unwrap();
    db.store().del(&format!("item:{item_pk}")).unwrap();

    let scoped = clean_old_index(&db, Some("item")).unwrap();
    assert!(scoped.stale.iter().all(|e| e.model == "item"));
    assert!(!audit_model(&db, "vendor").unwrap().is_clean());

    let rest = clean_old_index(&db, None).unwrap();
    assert!(rest.stale.iter().all(|e| e.model == "vendor"));
    assert!(audit_database(&db).unwrap().is_clean());
}
