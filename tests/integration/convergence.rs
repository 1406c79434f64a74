//! Multi-replica convergence through the public work tree surface.

use weft::{Error, WorkTree, WorkTreeConfig, ROOT_FILE_ID};

fn work_tree(replica_id: u32) -> WorkTree {
    WorkTree::new(WorkTreeConfig::new(replica_id)).unwrap()
}

/// Ship operations both ways until neither replica has anything new for the
/// other. Fixups emitted while merging are shipped on later rounds.
fn sync(a: &mut WorkTree, b: &mut WorkTree) {
    for _ in 0..10 {
        let to_b = a.ops_since(&b.version());
        let to_a = b.ops_since(&a.version());
        if to_b.is_empty() && to_a.is_empty() {
            return;
        }
        b.apply_ops(to_b);
        a.apply_ops(to_a);
    }
    panic!("replicas failed to quiesce");
}

/// Pairwise pump for any number of replicas.
fn sync_all(replicas: &mut [WorkTree]) {
    for _ in 0..16 {
        let mut progress = false;
        for sender in 0..replicas.len() {
            for receiver in 0..replicas.len() {
                if sender == receiver {
                    continue;
                }
                let version = replicas[receiver].version();
                let ops = replicas[sender].ops_since(&version);
                if !ops.is_empty() {
                    progress = true;
                    replicas[receiver].apply_ops(ops);
                }
            }
        }
        if !progress {
            return;
        }
    }
    panic!("replicas failed to quiesce");
}

#[test]
fn create_and_rename_race_resolves_to_the_renamed_path() {
    let mut replica_1 = work_tree(1);
    let mut replica_2 = work_tree(2);

    let (a, _) = replica_1.create_directory(ROOT_FILE_ID, "a").unwrap();
    sync(&mut replica_1, &mut replica_2);

    // Replica 1 creates /a/x.txt while replica 2 renames /a to /b.
    let (x, _) = replica_1.new_text_file(a, "x.txt").unwrap();
    replica_2.rename(a, ROOT_FILE_ID, "b").unwrap();
    sync(&mut replica_1, &mut replica_2);

    assert_eq!(replica_1.path_for_file_id(x).unwrap(), "b/x.txt");
    assert_eq!(replica_2.path_for_file_id(x).unwrap(), "b/x.txt");
}

#[test]
fn three_way_same_name_create_race_converges() {
    let mut replicas = [work_tree(1), work_tree(2), work_tree(3)];
    for replica in replicas.iter_mut() {
        replica.new_text_file(ROOT_FILE_ID, "notes.txt").unwrap();
    }
    sync_all(&mut replicas);

    let entries = replicas[0].entries(Some(false), None);
    assert_eq!(entries, replicas[1].entries(Some(false), None));
    assert_eq!(entries, replicas[2].entries(Some(false), None));

    // All three files survive under distinct names, one of them unsuffixed.
    assert_eq!(entries.len(), 3);
    let names: std::collections::HashSet<&str> =
        entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names.len(), 3);
    assert!(names.contains("notes.txt"));
}

#[test]
fn same_name_create_and_move_race_converges() {
    let mut replica_1 = work_tree(1);
    let mut replica_2 = work_tree(2);

    let (dir, _) = replica_1.create_directory(ROOT_FILE_ID, "b").unwrap();
    let (stray, _) = replica_1.new_text_file(ROOT_FILE_ID, "x.txt").unwrap();
    sync(&mut replica_1, &mut replica_2);

    // Replica 1 creates a fresh b/x.txt while replica 2 moves the existing
    // file into b under the same name.
    let (fresh, _) = replica_1.new_text_file(dir, "x.txt").unwrap();
    replica_2.rename(stray, dir, "x.txt").unwrap();
    sync(&mut replica_1, &mut replica_2);

    assert_eq!(
        replica_1.entries(Some(false), None),
        replica_2.entries(Some(false), None)
    );
    let fresh_path = replica_1.path_for_file_id(fresh).unwrap();
    let stray_path = replica_1.path_for_file_id(stray).unwrap();
    assert_ne!(fresh_path, stray_path);
    assert!(fresh_path.starts_with("b/"));
    assert!(stray_path.starts_with("b/"));
}

#[test]
fn replicas_with_the_same_operations_list_the_same_entries() {
    let mut replica_1 = work_tree(1);
    let mut replica_2 = work_tree(2);

    let (docs, _) = replica_1.create_directory(ROOT_FILE_ID, "docs").unwrap();
    replica_1.new_text_file(docs, "a.txt").unwrap();
    let (src, _) = replica_2.create_directory(ROOT_FILE_ID, "src").unwrap();
    let (main, _) = replica_2.new_text_file(src, "main.rs").unwrap();
    replica_2.remove(main).unwrap();

    sync(&mut replica_1, &mut replica_2);

    assert_eq!(
        replica_1.entries(Some(true), None),
        replica_2.entries(Some(true), None)
    );
    assert_eq!(
        replica_1.entries(Some(false), None),
        replica_2.entries(Some(false), None)
    );
}

#[test]
fn concurrent_text_edits_converge_to_the_same_buffer() {
    let mut replica_1 = work_tree(1);
    let mut replica_2 = work_tree(2);

    let (file, _) = replica_1.new_text_file(ROOT_FILE_ID, "shared.txt").unwrap();
    let buffer_1 = replica_1.open_text_file(file, "the quick fox").unwrap();
    sync(&mut replica_1, &mut replica_2);
    let buffer_2 = replica_2.open_text_file(file, "the quick fox").unwrap();

    replica_1.edit(buffer_1, &[10..10], "brown ").unwrap();
    replica_2.edit(buffer_2, &[0..3], "a").unwrap();
    sync(&mut replica_1, &mut replica_2);

    let text_1 = replica_1.text(buffer_1).unwrap();
    let text_2 = replica_2.text(buffer_2).unwrap();
    assert_eq!(text_1, text_2);
    assert_eq!(text_1, "a quick brown fox");
}

#[test]
fn remove_and_edit_race_preserves_the_edit_in_the_tombstone() {
    let mut replica_1 = work_tree(1);
    let mut replica_2 = work_tree(2);

    let (file, _) = replica_1.new_text_file(ROOT_FILE_ID, "f.txt").unwrap();
    let buffer_1 = replica_1.open_text_file(file, "v1").unwrap();
    sync(&mut replica_1, &mut replica_2);
    let buffer_2 = replica_2.open_text_file(file, "v1").unwrap();

    replica_1.edit(buffer_1, &[0..2], "v2").unwrap();
    replica_2.remove(file).unwrap();
    sync(&mut replica_1, &mut replica_2);

    // Removal wins for visibility on both replicas.
    assert!(matches!(
        replica_1.path_for_file_id(file),
        Err(Error::InvalidTarget(_))
    ));
    assert!(replica_1.entries(Some(false), None).is_empty());
    // The racing edit is retained in the tombstoned node's buffer.
    assert_eq!(replica_1.text(buffer_1).unwrap(), "v2");
    assert_eq!(replica_2.text(buffer_2).unwrap(), "v2");
}

#[test]
fn changes_since_reports_the_spans_a_peer_has_not_seen() {
    let mut replica = work_tree(1);
    let (file, _) = replica.new_text_file(ROOT_FILE_ID, "f.txt").unwrap();
    let buffer = replica.open_text_file(file, "hello world").unwrap();

    let before = replica.version();
    replica.edit(buffer, &[6..11], "there").unwrap();

    let changes = replica.changes_since(buffer, &before).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].text, "there");
    assert_eq!(changes[0].range.start, weft::Point::new(0, 6));
    assert_eq!(changes[0].range.end, weft::Point::new(0, 11));
}
