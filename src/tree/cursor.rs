//! Entry projection
//!
//! Projects the replicated registers into the depth-first entry listing an
//! embedder renders. Projection is read-only and deterministic: two replicas
//! with the same register state produce the same listing.

use super::{FileId, FileStatus, FileType, Tree, ROOT_FILE_ID};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One row of a depth-first listing of the tree.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub file_id: FileId,
    pub file_type: FileType,
    /// 1 for entries directly under the root.
    pub depth: usize,
    pub name: String,
    pub status: FileStatus,
    /// False for tombstoned entries and everything beneath them.
    pub visible: bool,
}

impl Tree {
    /// Depth-first listing of the tree, children in name order.
    ///
    /// With `show_deleted`, tombstoned entries and their subtrees are
    /// included with `visible: false`. `descend_into` restricts expansion to
    /// the given directories; other directories are reported collapsed.
    pub fn entries(
        &self,
        show_deleted: bool,
        descend_into: Option<&HashSet<FileId>>,
    ) -> Vec<Entry> {
        let mut entries = Vec::new();
        self.push_entries(ROOT_FILE_ID, true, 1, show_deleted, descend_into, &mut entries);
        entries
    }

    fn push_entries(
        &self,
        parent_id: FileId,
        parent_visible: bool,
        depth: usize,
        show_deleted: bool,
        descend_into: Option<&HashSet<FileId>>,
        entries: &mut Vec<Entry>,
    ) {
        for (name, child_id, placement_visible) in self.child_placements(parent_id) {
            let Ok(file_type) = self.file_type(child_id) else {
                continue;
            };
            let (status, own_visible) = self.entry_status(child_id);
            let visible = parent_visible && own_visible && placement_visible;
            if !visible && !show_deleted {
                continue;
            }
            entries.push(Entry {
                file_id: child_id,
                file_type,
                depth,
                name,
                status,
                visible,
            });
            if file_type == FileType::Directory
                && descend_into.map_or(true, |dirs| dirs.contains(&child_id))
            {
                self.push_entries(
                    child_id,
                    visible,
                    depth + 1,
                    show_deleted,
                    descend_into,
                    entries,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time;
    use crate::tree::BaseEntry;

    fn names(entries: &[Entry]) -> Vec<(usize, &str)> {
        entries
            .iter()
            .map(|e| (e.depth, e.name.as_str()))
            .collect()
    }

    #[test]
    fn test_listing_is_depth_first_in_name_order() {
        let mut tree = Tree::new(1);
        let mut lamport = time::Lamport::new(1);
        let (dir, _) = tree
            .create_file(ROOT_FILE_ID, "src", FileType::Directory, &mut lamport)
            .unwrap();
        tree.create_file(dir, "lib.rs", FileType::Text, &mut lamport)
            .unwrap();
        tree.create_file(dir, "main.rs", FileType::Text, &mut lamport)
            .unwrap();
        tree.create_file(ROOT_FILE_ID, "README.md", FileType::Text, &mut lamport)
            .unwrap();

        let entries = tree.entries(false, None);
        assert_eq!(
            names(&entries),
            vec![
                (1, "README.md"),
                (1, "src"),
                (2, "lib.rs"),
                (2, "main.rs"),
            ]
        );
    }

    #[test]
    fn test_statuses_against_baseline() {
        let mut tree = Tree::new(1);
        let mut lamport = time::Lamport::new(1);
        tree.append_base_entries(
            vec![
                BaseEntry::file(1, "kept.txt"),
                BaseEntry::file(1, "moved.txt"),
                BaseEntry::file(1, "gone.txt"),
                BaseEntry::file(1, "edited.txt"),
            ],
            &mut lamport,
        )
        .unwrap();

        let moved = tree.file_id_for_path("moved.txt").unwrap();
        tree.rename(moved, ROOT_FILE_ID, "moved2.txt", &mut lamport)
            .unwrap();
        let gone = tree.file_id_for_path("gone.txt").unwrap();
        tree.remove(gone, &mut lamport).unwrap();
        let edited = tree.file_id_for_path("edited.txt").unwrap();
        tree.open_text_file(edited, "old").unwrap();
        tree.edit(edited, &[0..3], "new", &mut lamport).unwrap();
        tree.create_file(ROOT_FILE_ID, "fresh.txt", FileType::Text, &mut lamport)
            .unwrap();

        let by_name = |entries: &[Entry], name: &str| {
            entries
                .iter()
                .find(|e| e.name == name)
                .map(|e| (e.status, e.visible))
        };

        let entries = tree.entries(false, None);
        assert_eq!(
            by_name(&entries, "kept.txt"),
            Some((FileStatus::Unchanged, true))
        );
        assert_eq!(
            by_name(&entries, "moved2.txt"),
            Some((FileStatus::Renamed, true))
        );
        assert_eq!(
            by_name(&entries, "edited.txt"),
            Some((FileStatus::Modified, true))
        );
        assert_eq!(
            by_name(&entries, "fresh.txt"),
            Some((FileStatus::New, true))
        );
        assert_eq!(by_name(&entries, "gone.txt"), None);

        let entries = tree.entries(true, None);
        assert_eq!(
            by_name(&entries, "gone.txt"),
            Some((FileStatus::Removed, false))
        );
    }

    #[test]
    fn test_renamed_and_modified_combines() {
        let mut tree = Tree::new(1);
        let mut lamport = time::Lamport::new(1);
        tree.append_base_entries(vec![BaseEntry::file(1, "a.txt")], &mut lamport)
            .unwrap();
        let file = tree.file_id_for_path("a.txt").unwrap();
        tree.open_text_file(file, "x").unwrap();
        tree.edit(file, &[0..1], "y", &mut lamport).unwrap();
        tree.rename(file, ROOT_FILE_ID, "b.txt", &mut lamport)
            .unwrap();

        let entries = tree.entries(false, None);
        assert_eq!(entries[0].status, FileStatus::RenamedAndModified);
    }

    #[test]
    fn test_subtree_of_removed_directory_is_invisible() {
        let mut tree = Tree::new(1);
        let mut lamport = time::Lamport::new(1);
        let (dir, _) = tree
            .create_file(ROOT_FILE_ID, "dir", FileType::Directory, &mut lamport)
            .unwrap();
        tree.create_file(dir, "inner.txt", FileType::Text, &mut lamport)
            .unwrap();
        tree.remove(dir, &mut lamport).unwrap();

        assert!(tree.entries(false, None).is_empty());

        let entries = tree.entries(true, None);
        assert_eq!(names(&entries), vec![(1, "dir"), (2, "inner.txt")]);
        assert!(entries.iter().all(|e| !e.visible));
    }

    #[test]
    fn test_descend_into_collapses_other_directories() {
        let mut tree = Tree::new(1);
        let mut lamport = time::Lamport::new(1);
        let (open_dir, _) = tree
            .create_file(ROOT_FILE_ID, "open", FileType::Directory, &mut lamport)
            .unwrap();
        let (closed_dir, _) = tree
            .create_file(ROOT_FILE_ID, "closed", FileType::Directory, &mut lamport)
            .unwrap();
        tree.create_file(open_dir, "a.txt", FileType::Text, &mut lamport)
            .unwrap();
        tree.create_file(closed_dir, "b.txt", FileType::Text, &mut lamport)
            .unwrap();

        let mut expanded = HashSet::new();
        expanded.insert(open_dir);
        let entries = tree.entries(false, Some(&expanded));
        assert_eq!(
            names(&entries),
            vec![(1, "closed"), (1, "open"), (2, "a.txt")]
        );
    }
}
