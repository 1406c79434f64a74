//! Baseline import and the status projection against it.

use weft::{BaseEntry, FileStatus, FileType, WorkTree, WorkTreeConfig, ROOT_FILE_ID};

fn work_tree(replica_id: u32) -> WorkTree {
    WorkTree::new(WorkTreeConfig::new(replica_id)).unwrap()
}

#[test]
fn imported_entries_are_unchanged_and_local_creates_are_new() {
    let mut tree = work_tree(1);
    tree.append_base_entries(vec![BaseEntry::dir(1, "src")]).unwrap();

    let entries = tree.entries(Some(false), None);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "src");
    assert_eq!(entries[0].file_type, FileType::Directory);
    assert_eq!(entries[0].status, FileStatus::Unchanged);
    assert!(entries[0].visible);

    let src = tree.file_id_for_path("src").unwrap();
    tree.create_directory(src, "util").unwrap();

    let entries = tree.entries(Some(false), None);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].name, "util");
    assert_eq!(entries[1].depth, 2);
    assert_eq!(entries[1].status, FileStatus::New);
}

#[test]
fn baseline_streams_across_multiple_calls() {
    let mut tree = work_tree(1);
    tree.append_base_entries(vec![
        BaseEntry::dir(1, "a"),
        BaseEntry::dir(2, "b"),
    ])
    .unwrap();
    tree.append_base_entries(vec![
        BaseEntry::file(3, "deep.txt"),
        BaseEntry::file(1, "top.txt"),
    ])
    .unwrap();

    assert!(tree.file_id_for_path("a/b/deep.txt").is_ok());
    assert!(tree.file_id_for_path("top.txt").is_ok());
}

#[test]
fn replicas_importing_the_same_baseline_agree_on_file_ids() {
    let entries = vec![
        BaseEntry::dir(1, "src"),
        BaseEntry::file(2, "lib.rs"),
        BaseEntry::file(1, "Cargo.toml"),
    ];

    let mut replica_1 = work_tree(1);
    let mut replica_2 = work_tree(2);
    replica_1.append_base_entries(entries.clone()).unwrap();
    replica_2.append_base_entries(entries).unwrap();

    // No operation exchange happened, yet base ids line up.
    assert_eq!(
        replica_1.file_id_for_path("src/lib.rs").unwrap(),
        replica_2.file_id_for_path("src/lib.rs").unwrap()
    );

    // So operations referencing base files merge directly.
    let lib = replica_1.file_id_for_path("src/lib.rs").unwrap();
    let root = ROOT_FILE_ID;
    let op = replica_1.rename(lib, root, "lib.rs").unwrap();
    replica_2.apply_ops(vec![op]);
    assert_eq!(replica_2.path_for_file_id(lib).unwrap(), "lib.rs");
}

#[test]
fn status_tracks_rename_remove_and_modify_against_the_baseline() {
    let mut tree = work_tree(1);
    tree.append_base_entries(vec![
        BaseEntry::file(1, "renamed.txt"),
        BaseEntry::file(1, "removed.txt"),
        BaseEntry::file(1, "modified.txt"),
    ])
    .unwrap();

    let renamed = tree.file_id_for_path("renamed.txt").unwrap();
    tree.rename(renamed, ROOT_FILE_ID, "renamed2.txt").unwrap();
    let removed = tree.file_id_for_path("removed.txt").unwrap();
    tree.remove(removed).unwrap();
    let modified = tree.file_id_for_path("modified.txt").unwrap();
    let buffer = tree.open_text_file(modified, "body").unwrap();
    tree.edit(buffer, &[0..0], "new ").unwrap();

    let status_of = |name: &str| {
        tree.entries(Some(true), None)
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.status)
    };
    assert_eq!(status_of("renamed2.txt"), Some(FileStatus::Renamed));
    assert_eq!(status_of("removed.txt"), Some(FileStatus::Removed));
    assert_eq!(status_of("modified.txt"), Some(FileStatus::Modified));
}
