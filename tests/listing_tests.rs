//! Tests for the remote file lister

use tempfile::tempdir;
use tunnel_ingest::remote::{FileKind, LocalFs, list_data_files};

#[tokio::test]
async fn test_listing_filters_and_sorts() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    for name in ["a.csv", "A.CSV", "b.txt", "readme.md"] {
        std::fs::write(data.join(name), "id\n").unwrap();
    }

    let fs = LocalFs::rooted(dir.path());
    let files = list_data_files(&fs, "/data").await.unwrap();

    let paths: Vec<&str> = files.iter().map(|f| f.path()).collect();
    assert_eq!(paths, vec!["/data/A.CSV", "/data/a.csv"]);
    assert!(files.iter().all(|f| f.kind() == FileKind::Csv));
}

#[tokio::test]
async fn test_listing_missing_directory_is_empty() {
    let dir = tempdir().unwrap();
    let fs = LocalFs::rooted(dir.path());

    let files = list_data_files(&fs, "/data/user_data").await.unwrap();

    assert!(files.is_empty());
}

#[tokio::test]
async fn test_listing_is_sorted_by_full_path() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    for name in ["users_10.csv", "users_2.csv", "users_1.csv"] {
        std::fs::write(data.join(name), "id\n").unwrap();
    }

    let fs = LocalFs::rooted(dir.path());
    let files = list_data_files(&fs, "/data/").await.unwrap();

    let names: Vec<&str> = files.iter().map(|f| f.file_name()).collect();
    assert_eq!(names, vec!["users_1.csv", "users_10.csv", "users_2.csv"]);
    assert_eq!(files[0].path(), "/data/users_1.csv");
}

#[tokio::test]
async fn test_listing_unrooted_absolute_path() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("x.csv"), "id\n").unwrap();
    let root = dir.path().to_str().unwrap();

    let files = list_data_files(&LocalFs::new(), root).await.unwrap();

    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path(), format!("{}/x.csv", root.trim_end_matches('/')));
}
