#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use std::io::Write as _;
use std::path::{Path, PathBuf};

use dbfs::snapshot::RowEncoder;
use dbfs::source::{DataSource as _, LoadPolicy, SourceError, read_table_list};
use tempfile::NamedTempFile;

use common::{MockSource, USERS_TWO_ROWS};

fn list_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[tokio::test]
async fn reads_one_name_per_line() {
    let file = list_file("users\norders\n");
    let names = read_table_list(file.path()).await.unwrap();
    assert_eq!(names, ["orders", "users"]);
}

#[tokio::test]
async fn skips_blank_lines_and_duplicates() {
    let file = list_file("users\n\n  \norders\r\nusers\n");
    let names = read_table_list(file.path()).await.unwrap();
    assert_eq!(names, ["orders", "users"]);
}

#[tokio::test]
async fn last_line_without_newline_counts() {
    let file = list_file("users");
    assert_eq!(read_table_list(file.path()).await.unwrap(), ["users"]);
}

#[tokio::test]
async fn empty_path_is_rejected() {
    assert!(matches!(
        read_table_list(Path::new("")).await,
        Err(SourceError::EmptyListPath)
    ));
}

#[tokio::test]
async fn missing_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope");
    match read_table_list(&path).await {
        Err(SourceError::ListFile { path: p, source }) => {
            assert_eq!(p, path);
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("expected ListFile error, got {other:?}"),
    }
}

#[tokio::test]
async fn zero_length_file_is_rejected() {
    let file = list_file("");
    assert!(matches!(
        read_table_list(file.path()).await,
        Err(SourceError::EmptyListFile(p)) if p == file.path()
    ));
}

#[tokio::test]
async fn by_list_policy_loads_listed_tables() {
    let source = MockSource::new();
    source.set_table("app", "users", USERS_TWO_ROWS);
    source.set_table("app", "orders", "1;10;\n");
    source.set_table("app", "audit", "x;\n");

    let file = list_file("users\norders\n");
    let policy = LoadPolicy::ByList(file.path().to_path_buf());
    let snapshot = source.load(&policy).await.unwrap();

    let names: Vec<_> = snapshot.names().collect();
    assert_eq!(names, ["orders", "users"]);
    assert_eq!(
        snapshot.get("users").unwrap().content().as_ref(),
        USERS_TWO_ROWS.as_bytes()
    );
    assert_eq!(snapshot.get("users").unwrap().row_count(), 2);
}

#[tokio::test]
async fn by_list_policy_rereads_the_file() {
    let source = MockSource::new();
    source.set_table("app", "users", USERS_TWO_ROWS);
    source.set_table("app", "orders", "1;10;\n");

    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir.path().join("tables");
    std::fs::write(&path, "users\n").unwrap();
    let policy = LoadPolicy::ByList(path.clone());
    assert_eq!(source.load(&policy).await.unwrap().len(), 1);

    std::fs::write(&path, "users\norders\n").unwrap();
    assert_eq!(source.load(&policy).await.unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_listed_table_fails_the_whole_load() {
    let source = MockSource::new();
    source.set_table("app", "users", USERS_TWO_ROWS);
    let file = list_file("users\nghost\n");
    let result = source
        .load(&LoadPolicy::ByList(file.path().to_path_buf()))
        .await;
    assert!(matches!(result, Err(SourceError::Unavailable(_))));
}

#[tokio::test]
async fn empty_owner_is_rejected() {
    let source = MockSource::new();
    let result = source.load(&LoadPolicy::ByOwner(String::new())).await;
    assert!(matches!(result, Err(SourceError::EmptyOwner)));
}

#[test]
fn null_fields_render_empty_and_separators_are_not_escaped() {
    let mut encoder = RowEncoder::new();
    encoder.push_row([Some("1"), None, Some("a;b")]);
    encoder.push_row([Some("2"), Some("line\nbreak"), None]);
    let (rows, content) = encoder.finish();
    assert_eq!(rows, 2);
    assert_eq!(content.as_ref(), b"1;;a;b;\n2;line\nbreak;;\n");
}
