//! End-to-end resets against an in-memory I/O provider.

use std::sync::Arc;
use weft::io::testing::InMemoryProvider;
use weft::{BaseEntry, BaselineId, FileStatus, IoProvider, SharedWorkTree, WorkTreeConfig};

fn provider() -> InMemoryProvider {
    let mut provider = InMemoryProvider::new();
    provider.insert(
        V1,
        vec![
            BaseEntry::dir(1, "src"),
            BaseEntry::file(2, "main.rs"),
            BaseEntry::file(1, "README.md"),
        ],
        &[("src/main.rs", "fn main() {}\n"), ("README.md", "# v1\n")],
    );
    provider.insert(
        V2,
        vec![
            BaseEntry::dir(1, "src"),
            BaseEntry::file(2, "main.rs"),
            BaseEntry::file(2, "lib.rs"),
            BaseEntry::file(1, "README.md"),
        ],
        &[
            ("src/main.rs", "fn main() {}\n"),
            ("src/lib.rs", "pub fn lib() {}\n"),
            ("README.md", "# v2\n"),
        ],
    );
    provider
}

const V1: BaselineId = [1; 20];
const V2: BaselineId = [2; 20];

#[tokio::test]
async fn reset_establishes_a_new_epoch() {
    let shared = SharedWorkTree::new(WorkTreeConfig::new(1)).unwrap();
    let io: Arc<dyn IoProvider> = Arc::new(provider());

    shared.reset(io.clone(), V1).await.unwrap();
    shared.with(|tree| {
        assert!(tree.file_id_for_path("src/main.rs").is_ok());
        assert!(tree.file_id_for_path("src/lib.rs").is_err());
    });

    shared.reset(io, V2).await.unwrap();
    shared.with(|tree| {
        assert!(tree.file_id_for_path("src/lib.rs").is_ok());
        // The new epoch is fully re-baselined.
        assert!(tree
            .entries(Some(true), None)
            .iter()
            .all(|e| e.status == FileStatus::Unchanged));
    });
}

#[tokio::test]
async fn reset_rebases_unsaved_edits_onto_the_new_baseline() {
    let shared = SharedWorkTree::new(WorkTreeConfig::new(1)).unwrap();
    let io: Arc<dyn IoProvider> = Arc::new(provider());

    shared.reset(io.clone(), V1).await.unwrap();
    let readme = shared.with(|tree| {
        let file = tree.file_id_for_path("README.md").unwrap();
        let buffer = tree.open_text_file(file, "# v1\n").unwrap();
        tree.edit(buffer, &[5..5], "work in progress\n").unwrap();
        buffer
    });

    let ops = shared.reset(io, V2).await.unwrap();
    assert_eq!(ops.len(), 1);

    shared.with(|tree| {
        assert_eq!(tree.text(readme).unwrap(), "# v1\nwork in progress\n");
        let file = tree.file_id_for_path("README.md").unwrap();
        let entry = tree
            .entries(Some(false), None)
            .into_iter()
            .find(|e| e.file_id == file)
            .unwrap();
        assert_eq!(entry.status, FileStatus::Modified);
    });
}

#[tokio::test]
async fn reset_leaves_pristine_buffers_on_the_new_baseline_text() {
    let shared = SharedWorkTree::new(WorkTreeConfig::new(1)).unwrap();
    let io: Arc<dyn IoProvider> = Arc::new(provider());

    shared.reset(io.clone(), V1).await.unwrap();
    let readme = shared.with(|tree| {
        let file = tree.file_id_for_path("README.md").unwrap();
        tree.open_text_file(file, "# v1\n").unwrap()
    });

    let ops = shared.reset(io, V2).await.unwrap();
    assert!(ops.is_empty());
    shared.with(|tree| {
        assert_eq!(tree.text(readme).unwrap(), "# v2\n");
    });
}
