//! Tests for the streaming load engine

mod common;

use common::{MemoryDatabase, PURCHASES_HEADER, USERS_HEADER, table, write_csv};
use tempfile::tempdir;
use tunnel_ingest::load::{self, LoadError};
use tunnel_ingest::remote::{LocalFs, list_data_files};
use tunnel_ingest::tables;
use tunnel_ingest::config::TablesSection;
use tunnel_ingest::database::DatabaseError;

#[tokio::test]
async fn test_load_empty_directory_is_noop() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("users")).unwrap();
    let fs = LocalFs::rooted(dir.path());
    let mut db = MemoryDatabase::standard();
    db.seed("raw.users_raw", &[&["1", "ada", "ada@example.com"]]);

    let result = load::load_directory(&mut db, &fs, "/users", &table("raw.users_raw"), "UTF8")
        .await
        .unwrap();

    assert_eq!(result.files, 0);
    assert_eq!(result.rows, 0);
    assert_eq!(db.row_count("raw.users_raw"), 1);
    assert_eq!(db.begins, 0);
}

#[tokio::test]
async fn test_load_missing_directory_is_noop() {
    let dir = tempdir().unwrap();
    let fs = LocalFs::rooted(dir.path());
    let mut db = MemoryDatabase::standard();

    let result = load::load_directory(
        &mut db,
        &fs,
        "/does/not/exist",
        &table("raw.users_raw"),
        "UTF8",
    )
    .await
    .unwrap();

    assert_eq!(result.files, 0);
    assert_eq!(db.row_count("raw.users_raw"), 0);
}

#[tokio::test]
async fn test_load_all_rows_in_file_order() {
    let dir = tempdir().unwrap();
    let users = dir.path().join("users");
    write_csv(&users, "b.csv", USERS_HEADER, &["3,cy,cy@x", "4,di,di@x", "5,ed,ed@x"]);
    write_csv(&users, "a.csv", USERS_HEADER, &["1,ada,ada@x", "2,bo,bo@x"]);
    write_csv(&users, "c.CSV", USERS_HEADER, &["6,fa,fa@x"]);
    write_csv(&users, "notes.txt", "not,a,csv", &["x,y,z"]);

    let fs = LocalFs::rooted(dir.path());
    let mut db = MemoryDatabase::standard();
    db.seed("raw.users_raw", &[&["0", "zed", "zed@x"]]);

    let result = load::load_directory(&mut db, &fs, "/users", &table("raw.users_raw"), "utf-8")
        .await
        .unwrap();

    assert_eq!(result.files, 3);
    assert_eq!(result.rows, 6);
    assert_eq!(db.row_count("raw.users_raw"), 1 + 6);
    assert_eq!(db.ids("raw.users_raw"), vec!["0", "1", "2", "3", "4", "5", "6"]);
    assert_eq!(db.begins, 1);
    assert_eq!(db.commits, 1);
    assert!(!db.in_transaction());
}

#[tokio::test]
async fn test_malformed_last_file_rolls_back_whole_directory() {
    let dir = tempdir().unwrap();
    let users = dir.path().join("users");
    write_csv(&users, "1.csv", USERS_HEADER, &["1,ada,ada@x", "2,bo,bo@x"]);
    write_csv(&users, "2.csv", USERS_HEADER, &["3,cy,cy@x"]);
    write_csv(&users, "3.csv", USERS_HEADER, &["4,di,di@x", "5,ed"]);

    let fs = LocalFs::rooted(dir.path());
    let mut db = MemoryDatabase::standard();
    db.seed("raw.users_raw", &[&["0", "zed", "zed@x"]]);
    let before = db.row_count("raw.users_raw");

    let err = load::load_directory(&mut db, &fs, "/users", &table("raw.users_raw"), "UTF8")
        .await
        .unwrap_err();

    match err {
        LoadError::File { file, source, .. } => {
            assert_eq!(file, "/users/3.csv");
            assert!(matches!(source, DatabaseError::CopyFailed { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(db.row_count("raw.users_raw"), before);
    assert_eq!(db.ids("raw.users_raw"), vec!["0"]);
    assert_eq!(db.commits, 0);
    assert_eq!(db.rollbacks, 1);
    assert!(!db.in_transaction());
}

#[tokio::test]
async fn test_header_only_file_counts_as_loaded() {
    let dir = tempdir().unwrap();
    let purchases = dir.path().join("purchases");
    write_csv(&purchases, "empty.csv", PURCHASES_HEADER, &[]);

    let fs = LocalFs::rooted(dir.path());
    let mut db = MemoryDatabase::standard();

    let result = load::load_directory(
        &mut db,
        &fs,
        "/purchases",
        &table("raw.purchases_raw"),
        "UTF8",
    )
    .await
    .unwrap();

    assert_eq!(result.files, 1);
    assert_eq!(result.rows, 0);
    assert_eq!(db.commits, 1);
}

#[tokio::test]
async fn test_quoted_fields_load_intact() {
    let dir = tempdir().unwrap();
    let users = dir.path().join("users");
    write_csv(
        &users,
        "quoted.csv",
        USERS_HEADER,
        &["1,\"Lovelace, Ada\",ada@x", "2,\"Bo \"\"B\"\" Diddley\",bo@x"],
    );

    let fs = LocalFs::rooted(dir.path());
    let mut db = MemoryDatabase::standard();

    load::load_directory(&mut db, &fs, "/users", &table("raw.users_raw"), "UTF8")
        .await
        .unwrap();

    let rows = db.rows("raw.users_raw");
    assert_eq!(rows[0][1], "Lovelace, Ada");
    assert_eq!(rows[1][1], "Bo \"B\" Diddley");
}

#[tokio::test]
async fn test_unknown_encoding_is_rejected_before_loading() {
    let dir = tempdir().unwrap();
    let users = dir.path().join("users");
    write_csv(&users, "a.csv", USERS_HEADER, &["1,ada,ada@x"]);

    let fs = LocalFs::rooted(dir.path());
    let mut db = MemoryDatabase::standard();
    let files = list_data_files(&fs, "/users").await.unwrap();

    let err = load::load(&mut db, &fs, &table("raw.users_raw"), &files, "EBCDIC")
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::Invalid(_)));
    assert_eq!(db.begins, 0);
    assert_eq!(db.row_count("raw.users_raw"), 0);
}

#[tokio::test]
async fn test_missing_file_rolls_back() {
    let dir = tempdir().unwrap();
    let users = dir.path().join("users");
    write_csv(&users, "a.csv", USERS_HEADER, &["1,ada,ada@x"]);
    write_csv(&users, "b.csv", USERS_HEADER, &["2,bo,bo@x"]);

    let fs = LocalFs::rooted(dir.path());
    let mut db = MemoryDatabase::standard();
    let files = list_data_files(&fs, "/users").await.unwrap();
    std::fs::remove_file(users.join("b.csv")).unwrap();

    let err = load::load(&mut db, &fs, &table("raw.users_raw"), &files, "UTF8")
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::Remote(_)));
    assert_eq!(db.row_count("raw.users_raw"), 0);
    assert_eq!(db.rollbacks, 1);
}

#[tokio::test]
async fn test_truncate_then_load_is_idempotent() {
    let dir = tempdir().unwrap();
    let users = dir.path().join("users");
    write_csv(&users, "a.csv", USERS_HEADER, &["1,ada,ada@x", "2,bo,bo@x"]);
    write_csv(&users, "b.csv", USERS_HEADER, &["3,cy,cy@x"]);

    let fs = LocalFs::rooted(dir.path());
    let mut db = MemoryDatabase::standard();
    let tables_config = TablesSection::default();

    let mut counts = Vec::new();
    for _ in 0..2 {
        tables::truncate_all(&mut db, &tables_config).await.unwrap();
        load::load_directory(&mut db, &fs, "/users", &tables_config.users_staging, "UTF8")
            .await
            .unwrap();
        counts.push(db.row_count("raw.users_raw"));
    }

    assert_eq!(counts, vec![3, 3]);
    assert_eq!(db.ids("raw.users_raw"), vec!["1", "2", "3"]);
}
