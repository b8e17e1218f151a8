mod common;

use common::shortcut_to;
use pipl_category::{FileWalker, PiplError, SearchOptions};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, b"MZ").unwrap();
}

fn walk(options: &SearchOptions) -> HashSet<PathBuf> {
    FileWalker::new(options).unwrap().collect()
}

/// root 下有 3 个插件和 2 个其他文件；outside 中的插件只能通过快捷方式到达
fn create_test_tree() -> (TempDir, PathBuf, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("Plug-ins");
    let outside = temp_dir.path().join("Shared");

    touch(&root.join("Blur.8bf"));
    touch(&root.join("Filters").join("Sharpen.8BF"));
    touch(&root.join("Filters").join("Noise").join("Grain.8bf"));
    touch(&root.join("readme.txt"));
    touch(&root.join("Filters").join("Sharpen.dll"));
    touch(&outside.join("Extra.8bf"));

    std::fs::write(
        root.join("Shared.lnk"),
        shortcut_to(&outside.join("Extra.8bf").to_string_lossy()),
    )
    .unwrap();

    (temp_dir, root, outside)
}

#[test]
fn test_shortcut_adds_one_result() {
    let (_temp_dir, root, outside) = create_test_tree();

    let with_shortcuts = walk(&SearchOptions::new(&root));
    let without_shortcuts = walk(&SearchOptions::new(&root).dereference_shortcuts(false));

    assert_eq!(without_shortcuts.len(), 3);
    assert_eq!(with_shortcuts.len(), 4);
    assert!(with_shortcuts.contains(&outside.join("Extra.8bf")));
}

#[test]
fn test_shortcut_to_directory() {
    let (_temp_dir, root, outside) = create_test_tree();
    std::fs::remove_file(root.join("Shared.lnk")).unwrap();
    std::fs::write(root.join("Folder.lnk"), shortcut_to(&outside.to_string_lossy())).unwrap();
    touch(&outside.join("Nested").join("Deep.8bf"));

    let found = walk(&SearchOptions::new(&root));
    assert!(found.contains(&outside.join("Extra.8bf")));
    assert!(found.contains(&outside.join("Nested").join("Deep.8bf")));
    assert_eq!(found.len(), 5);
}

#[test]
fn test_shortcut_chain_stops_after_one_level() {
    let (temp_dir, root, _outside) = create_test_tree();
    let chained = temp_dir.path().join("Chained");
    touch(&chained.join("Far.8bf"));

    let second = temp_dir.path().join("Second.lnk");
    std::fs::write(&second, shortcut_to(&chained.to_string_lossy())).unwrap();
    std::fs::write(root.join("First.lnk"), shortcut_to(&second.to_string_lossy())).unwrap();

    let found = walk(&SearchOptions::new(&root));
    assert!(!found.contains(&chained.join("Far.8bf")));
    assert_eq!(found.len(), 4);
}

#[test]
fn test_broken_shortcut_ignored() {
    let (_temp_dir, root, _outside) = create_test_tree();
    std::fs::write(root.join("Broken.lnk"), b"not a shortcut").unwrap();
    std::fs::write(root.join("Dangling.lnk"), shortcut_to("/nowhere/Gone.8bf")).unwrap();

    assert_eq!(walk(&SearchOptions::new(&root)).len(), 4);
}

#[test]
fn test_top_only() {
    let (_temp_dir, root, _outside) = create_test_tree();
    let options = SearchOptions::new(&root).recursive(false).dereference_shortcuts(false);

    let found: Vec<PathBuf> = FileWalker::new(&options).unwrap().collect();
    assert_eq!(found, vec![root.join("Blur.8bf")]);
}

#[test]
fn test_results_are_absolute() {
    let (_temp_dir, root, _outside) = create_test_tree();
    assert!(walk(&SearchOptions::new(&root)).iter().all(|p| p.is_absolute()));
}

#[test]
fn test_missing_root() {
    let temp_dir = TempDir::new().unwrap();
    let result = FileWalker::new(&SearchOptions::new(temp_dir.path().join("missing")));
    assert!(matches!(result, Err(PiplError::NotFound(_))));
}

#[test]
fn test_root_is_a_file() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("Blur.8bf");
    touch(&file);

    let result = FileWalker::new(&SearchOptions::new(&file));
    assert!(matches!(result, Err(PiplError::IoFailure { .. })));
}

#[cfg(unix)]
#[test]
fn test_symlinked_directory_not_followed() {
    let (temp_dir, root, _outside) = create_test_tree();
    let linked = temp_dir.path().join("Linked");
    touch(&linked.join("Linked.8bf"));
    std::os::unix::fs::symlink(&linked, root.join("Linked")).unwrap();

    let found = walk(&SearchOptions::new(&root));
    assert!(!found.iter().any(|p| p.ends_with("Linked.8bf")));
}
