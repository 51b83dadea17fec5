use std::collections::BTreeSet;
use std::time::Duration;

use facepos_core::sequencer::COUNTER_FILE;
use facepos_core::user_store::USERS_DIR;
use facepos_core::{
    Cart, Database, DbError, Embedding, EnrollPolicy, LineItem, NewUser, StoreConfig,
    SENTINEL_LABEL,
};
use proptest::prelude::*;
use tempfile::TempDir;

const DIM: usize = 64;

fn open_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(StoreConfig::new(dir.path().join("userdb"))).unwrap();
    (dir, db)
}

fn user(local: &str) -> NewUser {
    NewUser::new(format!("User {local}"), "5550000", format!("{local}@shop.io")).unwrap()
}

fn uniform(v: f32) -> Embedding {
    Embedding::new(vec![v; DIM])
}

fn cart(items: &[(&str, u64, u32)]) -> Cart {
    items
        .iter()
        .map(|&(name, price, count)| {
            (
                name.to_string(),
                LineItem {
                    name: name.to_string(),
                    price: price.into(),
                    count,
                },
            )
        })
        .collect()
}

#[test]
fn test_idempotent_enrollment_keeps_first_embedding() {
    let (_dir, db) = open_db();
    db.enroll(&user("ann"), &uniform(0.0), EnrollPolicy::Preserve).unwrap();
    db.enroll(&user("ann"), &uniform(0.5), EnrollPolicy::Preserve).unwrap();

    let stats = db.stats().unwrap();
    assert_eq!(stats.labels, 2);
    assert_eq!(stats.embeddings, 2);

    // The first embedding is the one matched exactly.
    let v = db.validate(&uniform(0.0)).unwrap();
    assert_eq!(v.label, "ann");
    assert_eq!(v.score, 1.0);
}

#[test]
fn test_sentinel_rejection() {
    let (_dir, db) = open_db();
    db.enroll(&user("ann"), &uniform(0.0), EnrollPolicy::Preserve).unwrap();

    let v = db.validate(&uniform(127.5)).unwrap();
    assert_eq!(v.label, SENTINEL_LABEL);
    assert!(!v.accepted());
    assert!(v.user.is_none());
}

#[test]
fn test_empty_store_rejects_everything() {
    let (_dir, db) = open_db();
    let v = db.validate(&uniform(0.0)).unwrap();
    assert_eq!(v.label, SENTINEL_LABEL);
    assert!(!v.accepted());
}

#[test]
fn test_threshold_boundary() {
    let (_dir, db) = open_db();
    let enrolled = db.enroll(&user("ann"), &uniform(0.0), EnrollPolicy::Preserve).unwrap();

    let exact = db.validate(&uniform(0.0)).unwrap();
    assert_eq!(exact.score, 1.0);
    assert_eq!(exact.user.as_ref(), Some(&enrolled));

    let boundary = db.validate(&uniform(0.2)).unwrap();
    assert_eq!(boundary.score, 0.8);
    assert!(boundary.accepted());

    let below = db.validate(&uniform(0.20001)).unwrap();
    assert!(below.score < 0.8);
    assert!(!below.accepted());
    assert_eq!(below.label, "ann");
}

#[test]
fn test_order_sequencing_from_existing_counter() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("userdb");
    std::fs::create_dir_all(root.join(USERS_DIR)).unwrap();
    std::fs::write(root.join(COUNTER_FILE), "17").unwrap();
    let db = Database::open(StoreConfig::new(&root)).unwrap();
    db.enroll(&user("ann"), &uniform(0.0), EnrollPolicy::Preserve).unwrap();

    let items = cart(&[("Burger", 10, 1), ("Burger L", 30, 2)]);
    let ids: Vec<u64> = (0..5)
        .map(|_| db.record_order("ann@shop.io", &items).unwrap().unwrap())
        .collect();
    assert_eq!(ids, vec![17, 18, 19, 20, 21]);

    let record = db.user("ann").unwrap();
    assert_eq!(record.history.len(), 5);
    assert_eq!(record.history[2].id, Some(19));
    let names: Vec<&str> = record.history[0].orders.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, ["Burger", "Burger L"]);
}

#[test]
fn test_empty_cart_is_a_no_op() {
    let (dir, db) = open_db();
    db.enroll(&user("ann"), &uniform(0.0), EnrollPolicy::Preserve).unwrap();
    db.record_order("ann@shop.io", &cart(&[("Burger", 10, 1)])).unwrap();

    let path = dir.path().join("userdb/users/ann.json");
    let before = std::fs::read(&path).unwrap();
    let counter_before = db.stats().unwrap().next_order_id;

    assert_eq!(db.record_order("ann@shop.io", &Cart::new()).unwrap(), None);
    // An empty cart never resolves the user, so even an unknown email is fine.
    assert_eq!(db.record_order("nobody", &Cart::new()).unwrap(), None);

    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert_eq!(db.stats().unwrap().next_order_id, counter_before);
}

#[test]
fn test_invalid_email_aborts_order() {
    let (_dir, db) = open_db();
    assert!(matches!(
        db.record_order("no-at-sign", &cart(&[("Burger", 10, 1)])),
        Err(DbError::InvalidEmail(_))
    ));
}

#[test]
fn test_reopen_keeps_everything() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::new(dir.path().join("userdb"));
    {
        let db = Database::open(config.clone()).unwrap();
        db.enroll(&user("ann"), &uniform(0.0), EnrollPolicy::Preserve).unwrap();
        db.record_order("ann@shop.io", &cart(&[("Burger", 10, 1)])).unwrap();
    }
    let db = Database::open(config).unwrap();
    let v = db.validate(&uniform(0.05)).unwrap();
    assert!(v.accepted());
    assert_eq!(v.user.unwrap().history.len(), 1);
    assert_eq!(db.record_order("ann@shop.io", &cart(&[("Fries", 5, 1)])).unwrap(), Some(1));
}

#[test]
fn test_concurrent_distinct_enrollments_lose_nothing() {
    let (_dir, db) = open_db();
    std::thread::scope(|s| {
        for i in 0..8 {
            let db = &db;
            s.spawn(move || {
                db.enroll(&user(&format!("u{i}")), &uniform(i as f32), EnrollPolicy::Preserve)
                    .unwrap();
            });
        }
    });
    let stats = db.stats().unwrap();
    assert_eq!(stats.labels, 9);
    assert_eq!(stats.users, 8);
    for i in 0..8 {
        assert_eq!(db.validate(&uniform(i as f32)).unwrap().label, format!("u{i}"));
    }
}

#[test]
fn test_concurrent_orders_get_distinct_ids() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::new(dir.path().join("userdb"));
    config.lock_timeout = Duration::from_secs(10);
    let db = Database::open(config).unwrap();
    for i in 0..4 {
        db.enroll(&user(&format!("u{i}")), &uniform(i as f32), EnrollPolicy::Preserve)
            .unwrap();
    }

    let ids: Vec<u64> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..16)
            .map(|n| {
                let db = &db;
                s.spawn(move || {
                    db.record_order(&format!("u{}@shop.io", n % 4), &cart(&[("Burger", 10, 1)]))
                        .unwrap()
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let distinct: BTreeSet<u64> = ids.iter().copied().collect();
    assert_eq!(distinct, (0..16).collect::<BTreeSet<u64>>());
    let total: usize = (0..4).map(|i| db.user(&format!("u{i}")).unwrap().history.len()).sum();
    assert_eq!(total, 16);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_concurrent_same_identifier_enrolls_once(
        offsets in prop::collection::vec(0.0f32..1.0, 2..8)
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::new(dir.path().join("userdb"));
        config.lock_timeout = Duration::from_secs(10);
        let db = Database::open(config).unwrap();

        std::thread::scope(|s| {
            for &offset in &offsets {
                let db = &db;
                s.spawn(move || {
                    db.enroll(&user("ann"), &uniform(offset), EnrollPolicy::Preserve).unwrap();
                });
            }
        });

        let stats = db.stats().unwrap();
        prop_assert_eq!(stats.labels, 2);
        prop_assert_eq!(stats.embeddings, 2);
        prop_assert_eq!(stats.users, 1);

        // The surviving row is exactly one of the submitted embeddings.
        let hits = offsets
            .iter()
            .filter(|&&o| db.validate(&uniform(o)).unwrap().score == 1.0)
            .count();
        prop_assert!(hits >= 1);
    }

    #[test]
    fn prop_sequential_orders_strictly_increase(n in 1usize..12, start in 0u64..1000) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("userdb");
        std::fs::create_dir_all(root.join(USERS_DIR)).unwrap();
        std::fs::write(root.join(COUNTER_FILE), start.to_string()).unwrap();
        let db = Database::open(StoreConfig::new(&root)).unwrap();
        db.enroll(&user("ann"), &uniform(0.0), EnrollPolicy::Preserve).unwrap();

        let ids: Vec<u64> = (0..n)
            .map(|_| db.record_order("ann@shop.io", &cart(&[("Burger", 10, 1)])).unwrap().unwrap())
            .collect();
        prop_assert_eq!(ids.first().copied(), Some(start));
        prop_assert!(ids.windows(2).all(|w| w[1] > w[0]));
    }
}
