//! Integration tests for the kind-table store
//!
//! Tests can be filtered by database backend using the DATABASE_BACKEND environment variable:
//! - `DATABASE_BACKEND=sqlite cargo test` - Run only SQLite tests
//! - `DATABASE_BACKEND=postgres DATABASE_URL=postgres://... cargo test` - Run only PostgreSQL tests
//! - By default, SQLite tests run and PostgreSQL tests run when DATABASE_URL points at Postgres

use cidrgeo::storage::{PostgresStorage, SqliteStorage, Storage, StorageError};
use cidrgeo::{Attributes, CidrBlock, EncodedAddress, GeoAttributes, GeoRow, IpVersion, Kind, KindRow};
use std::sync::Arc;

/// Get the database backend to test from environment variable
fn should_test_backend(backend: &str) -> bool {
    match std::env::var("DATABASE_BACKEND") {
        Ok(val) => val.to_lowercase() == backend.to_lowercase(),
        Err(_) => true, // Test all backends if not specified
    }
}

/// Helper to create SQLite test storage
async fn create_sqlite_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

/// Helper to create PostgreSQL test storage
async fn create_postgres_storage() -> Option<Arc<dyn Storage>> {
    let db_url = std::env::var("DATABASE_URL").ok()?;
    if !db_url.starts_with("postgres") {
        return None;
    }
    let storage = PostgresStorage::new(&db_url, 5).await.ok()?;
    storage.init().await.ok()?;
    Some(Arc::new(storage))
}

fn block(cidr: &str) -> CidrBlock {
    CidrBlock::from_network(cidr.parse().unwrap())
}

fn country(cidr: &str, code: &str) -> KindRow {
    KindRow::new(
        block(cidr),
        Attributes::Country {
            country: code.to_string(),
        },
    )
}

fn city(cidr: &str, name: &str) -> KindRow {
    KindRow::new(
        block(cidr),
        Attributes::City {
            city: name.to_string(),
        },
    )
}

fn geo_row(cidr: &str, asn: i64, city: &str) -> GeoRow {
    GeoRow::new(
        block(cidr),
        GeoAttributes {
            country: "JP".to_string(),
            asn,
            provider: "Mukogawa2 Net.".to_string(),
            city: city.to_string(),
        },
    )
}

/// Snapshot of every kind-row for a CIDR, in `Kind::ALL` order
async fn snapshot(storage: &Arc<dyn Storage>, version: IpVersion, cidr: &str) -> Vec<Option<KindRow>> {
    let mut rows = Vec::new();
    for kind in Kind::ALL {
        rows.push(storage.find_by_cidr(kind, version, cidr).await.unwrap());
    }
    rows
}

#[tokio::test]
async fn test_insert_and_find_by_cidr() {
    let storage = create_sqlite_storage().await;

    let row = country("192.168.1.0/24", "JP");
    let inserted = storage.insert(&row).await.unwrap();
    assert_eq!(inserted, row);

    let found = storage
        .find_by_cidr(Kind::Country, IpVersion::V4, "192.168.1.0/24")
        .await
        .unwrap();
    assert_eq!(found, Some(row));

    // Other kind-tables are untouched by a single-kind insert
    let asn = storage
        .find_by_cidr(Kind::Asn, IpVersion::V4, "192.168.1.0/24")
        .await
        .unwrap();
    assert!(asn.is_none());
}

#[tokio::test]
async fn test_insert_duplicate_key() {
    let storage = create_sqlite_storage().await;

    storage.insert(&country("192.168.1.0/24", "JP")).await.unwrap();
    let err = storage
        .insert(&country("192.168.1.0/24", "US"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::DuplicateKey(ref c) if c == "192.168.1.0/24"));

    let stored = storage
        .find_by_cidr(Kind::Country, IpVersion::V4, "192.168.1.0/24")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.attrs,
        Attributes::Country {
            country: "JP".to_string()
        }
    );
}

#[tokio::test]
async fn test_concurrent_insert_same_block() {
    if !should_test_backend("sqlite") {
        return;
    }

    let storage = create_sqlite_storage().await;
    let mut handles = vec![];

    for i in 0..10 {
        let storage_clone = Arc::clone(&storage);
        let handle = tokio::spawn(async move {
            storage_clone
                .insert(&city("10.0.0.0/8", &format!("city{}", i)))
                .await
        });
        handles.push(handle);
    }

    // Exactly one should succeed, others should hit the key constraint
    let mut success_count = 0;
    let mut duplicate_count = 0;

    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => success_count += 1,
            Err(StorageError::DuplicateKey(_)) => duplicate_count += 1,
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    assert_eq!(success_count, 1, "Exactly one insert should succeed");
    assert_eq!(duplicate_count, 9, "All others should be duplicates");
}

#[tokio::test]
async fn test_update_rewrites_every_column() {
    let storage = create_sqlite_storage().await;
    storage.insert(&country("192.168.3.0/24", "JP")).await.unwrap();

    let moved = country("192.168.4.0/23", "US");
    storage.update("192.168.3.0/24", &moved).await.unwrap();

    assert!(storage
        .find_by_cidr(Kind::Country, IpVersion::V4, "192.168.3.0/24")
        .await
        .unwrap()
        .is_none());
    let stored = storage
        .find_by_cidr(Kind::Country, IpVersion::V4, "192.168.4.0/23")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, moved);
    assert_eq!(stored.block.prefix_len, 23);
}

#[tokio::test]
async fn test_update_missing_row_is_not_found() {
    let storage = create_sqlite_storage().await;
    let err = storage
        .update("192.168.3.0/24", &country("192.168.3.0/24", "JP"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[tokio::test]
async fn test_update_onto_existing_block_is_duplicate() {
    let storage = create_sqlite_storage().await;
    storage.insert(&country("192.168.1.0/24", "JP")).await.unwrap();
    storage.insert(&country("192.168.3.0/24", "US")).await.unwrap();

    let err = storage
        .update("192.168.3.0/24", &country("192.168.1.0/24", "US"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::DuplicateKey(_)));

    // Both rows keep their original contents
    let first = storage
        .find_by_cidr(Kind::Country, IpVersion::V4, "192.168.1.0/24")
        .await
        .unwrap();
    assert_eq!(first, Some(country("192.168.1.0/24", "JP")));
    let second = storage
        .find_by_cidr(Kind::Country, IpVersion::V4, "192.168.3.0/24")
        .await
        .unwrap();
    assert_eq!(second, Some(country("192.168.3.0/24", "US")));
}

#[tokio::test]
async fn test_delete_is_noop_when_absent() {
    let storage = create_sqlite_storage().await;
    storage.insert(&country("192.168.1.0/24", "JP")).await.unwrap();

    assert!(!storage
        .delete(Kind::Country, IpVersion::V4, "192.168.9.0/24")
        .await
        .unwrap());
    assert!(storage
        .delete(Kind::Country, IpVersion::V4, "192.168.1.0/24")
        .await
        .unwrap());
    assert!(!storage
        .delete(Kind::Country, IpVersion::V4, "192.168.1.0/24")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_composite_insert_writes_all_kinds() {
    let storage = create_sqlite_storage().await;
    let record = geo_row("192.168.3.0/24", 10001, "兵庫県宝塚市");
    storage.insert_composite(&record).await.unwrap();

    let rows = snapshot(&storage, IpVersion::V4, "192.168.3.0/24").await;
    let expected: Vec<Option<KindRow>> = record.rows().into_iter().map(Some).collect();
    assert_eq!(rows, expected);
}

#[tokio::test]
async fn test_composite_insert_duplicate_leaves_no_partial_rows() {
    let storage = create_sqlite_storage().await;

    // Only the city table already holds the block
    storage.insert(&city("192.168.3.0/24", "兵庫県伊丹市")).await.unwrap();

    let err = storage
        .insert_composite(&geo_row("192.168.3.0/24", 10001, "兵庫県宝塚市"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::DuplicateKey(_)));

    let rows = snapshot(&storage, IpVersion::V4, "192.168.3.0/24").await;
    assert_eq!(rows[0], None);
    assert_eq!(rows[1], None);
    assert_eq!(rows[2], Some(city("192.168.3.0/24", "兵庫県伊丹市")));
}

#[tokio::test]
async fn test_composite_insert_existing_composite() {
    let storage = create_sqlite_storage().await;
    let original = geo_row("192.168.3.0/24", 10001, "兵庫県宝塚市");
    storage.insert_composite(&original).await.unwrap();

    let err = storage
        .insert_composite(&geo_row("192.168.3.0/24", 10002, "兵庫県伊丹市"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::DuplicateKey(_)));

    let rows = snapshot(&storage, IpVersion::V4, "192.168.3.0/24").await;
    let expected: Vec<Option<KindRow>> = original.rows().into_iter().map(Some).collect();
    assert_eq!(rows, expected);
}

#[tokio::test]
async fn test_composite_update() {
    let storage = create_sqlite_storage().await;
    storage
        .insert_composite(&geo_row("192.168.3.0/24", 10001, "兵庫県宝塚市"))
        .await
        .unwrap();

    let updated = geo_row("192.168.3.0/24", 10002, "兵庫県伊丹市");
    storage
        .update_composite("192.168.3.0/24", &updated)
        .await
        .unwrap();

    let rows = snapshot(&storage, IpVersion::V4, "192.168.3.0/24").await;
    let expected: Vec<Option<KindRow>> = updated.rows().into_iter().map(Some).collect();
    assert_eq!(rows, expected);
}

#[tokio::test]
async fn test_composite_update_with_missing_kind_changes_nothing() {
    let storage = create_sqlite_storage().await;
    let original = geo_row("192.168.3.0/24", 10001, "兵庫県宝塚市");
    storage.insert_composite(&original).await.unwrap();
    storage
        .delete(Kind::City, IpVersion::V4, "192.168.3.0/24")
        .await
        .unwrap();

    let err = storage
        .update_composite("192.168.3.0/24", &geo_row("192.168.5.0/24", 10002, "兵庫県伊丹市"))
        .await
        .unwrap_err();
    match err {
        StorageError::IncompleteComposite { cidr, missing } => {
            assert_eq!(cidr, "192.168.3.0/24");
            assert_eq!(missing, vec![Kind::City]);
        }
        other => panic!("Unexpected error: {:?}", other),
    }

    let rows = snapshot(&storage, IpVersion::V4, "192.168.3.0/24").await;
    assert_eq!(rows[0], Some(original.rows()[0].clone()));
    assert_eq!(rows[1], Some(original.rows()[1].clone()));
    assert_eq!(rows[2], None);
    assert_eq!(
        snapshot(&storage, IpVersion::V4, "192.168.5.0/24").await,
        vec![None, None, None]
    );
}

#[tokio::test]
async fn test_composite_update_collision_rolls_back() {
    let storage = create_sqlite_storage().await;
    let original = geo_row("10.0.0.0/8", 64496, "Springfield");
    storage.insert_composite(&original).await.unwrap();
    let asn_only = KindRow::new(
        block("11.0.0.0/8"),
        Attributes::Asn {
            asn: 64511,
            provider: "Other Transit".to_string(),
        },
    );
    storage.insert(&asn_only).await.unwrap();

    // The country row moves first; the asn row then collides
    let err = storage
        .update_composite("10.0.0.0/8", &geo_row("11.0.0.0/8", 64497, "Shelbyville"))
        .await
        .unwrap_err();
    match err {
        StorageError::DuplicateKey(cidr) => assert_eq!(cidr, "11.0.0.0/8"),
        other => panic!("Unexpected error: {:?}", other),
    }

    let expected: Vec<Option<KindRow>> = original.rows().into_iter().map(Some).collect();
    assert_eq!(snapshot(&storage, IpVersion::V4, "10.0.0.0/8").await, expected);
    assert_eq!(
        snapshot(&storage, IpVersion::V4, "11.0.0.0/8").await,
        vec![None, Some(asn_only), None]
    );
}

#[tokio::test]
async fn test_composite_writes_need_city_tables() {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init_kinds(&[Kind::Country, Kind::Asn]).await.unwrap();

    let record = geo_row("192.168.3.0/24", 10001, "兵庫県宝塚市");
    let err = storage.insert_composite(&record).await.unwrap_err();
    assert!(matches!(err, StorageError::MissingTable("city_v4")));
    assert_eq!(
        err.to_string(),
        "table city_v4 has not been initialised; composite writes need all three kinds"
    );

    let err = storage
        .delete_composite(IpVersion::V6, "2001:db8::/32")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::MissingTable("city_v6")));

    // Nothing reached the tables that do exist
    assert!(storage
        .find_by_cidr(Kind::Country, IpVersion::V4, "192.168.3.0/24")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_composite_delete() {
    let storage = create_sqlite_storage().await;
    storage
        .insert_composite(&geo_row("192.168.3.0/24", 10001, "兵庫県宝塚市"))
        .await
        .unwrap();
    storage
        .insert_composite(&geo_row("192.168.1.0/24", 10000, "兵庫県尼崎市"))
        .await
        .unwrap();

    storage
        .delete_composite(IpVersion::V4, "192.168.3.0/24")
        .await
        .unwrap();

    assert_eq!(
        snapshot(&storage, IpVersion::V4, "192.168.3.0/24").await,
        vec![None, None, None]
    );
    assert!(snapshot(&storage, IpVersion::V4, "192.168.1.0/24")
        .await
        .iter()
        .all(Option::is_some));
}

#[tokio::test]
async fn test_composite_delete_absent_is_not_found() {
    let storage = create_sqlite_storage().await;
    let existing = geo_row("192.168.1.0/24", 10000, "兵庫県尼崎市");
    storage.insert_composite(&existing).await.unwrap();

    let err = storage
        .delete_composite(IpVersion::V4, "192.168.3.0/24")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));

    let rows = snapshot(&storage, IpVersion::V4, "192.168.1.0/24").await;
    let expected: Vec<Option<KindRow>> = existing.rows().into_iter().map(Some).collect();
    assert_eq!(rows, expected);
}

#[tokio::test]
async fn test_composite_delete_partial_removes_nothing() {
    let storage = create_sqlite_storage().await;
    storage.insert(&country("192.168.3.0/24", "JP")).await.unwrap();
    storage.insert(&city("192.168.3.0/24", "兵庫県宝塚市")).await.unwrap();

    let err = storage
        .delete_composite(IpVersion::V4, "192.168.3.0/24")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::IncompleteComposite { .. }));

    let rows = snapshot(&storage, IpVersion::V4, "192.168.3.0/24").await;
    assert!(rows[0].is_some());
    assert!(rows[1].is_none());
    assert!(rows[2].is_some());
}

#[tokio::test]
async fn test_has_table_without_city() {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init_kinds(&[Kind::Country, Kind::Asn]).await.unwrap();

    assert!(storage.has_table(Kind::Country, IpVersion::V4).await.unwrap());
    assert!(storage.has_table(Kind::Asn, IpVersion::V6).await.unwrap());
    assert!(!storage.has_table(Kind::City, IpVersion::V4).await.unwrap());
    assert!(!storage.has_table(Kind::City, IpVersion::V6).await.unwrap());
}

#[tokio::test]
async fn test_find_containing_per_kind() {
    let storage = create_sqlite_storage().await;
    storage.insert(&country("192.168.1.0/24", "JP")).await.unwrap();
    storage.insert(&country("192.168.3.0/24", "US")).await.unwrap();
    storage.insert(&city("192.168.0.0/16", "兵庫県尼崎市")).await.unwrap();

    let query = EncodedAddress::encode("192.168.3.2".parse().unwrap());
    let rows = storage.find_containing(&query, &Kind::ALL).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], country("192.168.3.0/24", "US"));
    assert_eq!(rows[1], city("192.168.0.0/16", "兵庫県尼崎市"));

    let outside = EncodedAddress::encode("10.0.0.1".parse().unwrap());
    assert!(storage
        .find_containing(&outside, &Kind::ALL)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_find_containing_ipv6() {
    let storage = create_sqlite_storage().await;
    storage.insert(&country("2001:240::/32", "JP")).await.unwrap();
    storage.insert(&country("192.168.1.0/24", "US")).await.unwrap();

    let query = EncodedAddress::encode("2001:240:bb81::10:180".parse().unwrap());
    let rows = storage.find_containing(&query, &[Kind::Country]).await.unwrap();
    assert_eq!(rows, vec![country("2001:240::/32", "JP")]);
}

#[tokio::test]
async fn test_postgres_composite_lifecycle() {
    if !should_test_backend("postgres") {
        return;
    }
    let Some(storage) = create_postgres_storage().await else {
        return;
    };

    let cidr = "2001:db8:4242::/48";
    storage
        .delete_composite(IpVersion::V6, cidr)
        .await
        .ok();

    let record = geo_row(cidr, 64500, "Testville");
    storage.insert_composite(&record).await.unwrap();
    let err = storage.insert_composite(&record).await.unwrap_err();
    assert!(matches!(err, StorageError::DuplicateKey(_)));

    let query = EncodedAddress::encode("2001:db8:4242::1".parse().unwrap());
    let rows = storage.find_containing(&query, &Kind::ALL).await.unwrap();
    assert_eq!(rows.len(), 3);

    storage.delete_composite(IpVersion::V6, cidr).await.unwrap();
    assert_eq!(snapshot(&storage, IpVersion::V6, cidr).await, vec![None, None, None]);
}
