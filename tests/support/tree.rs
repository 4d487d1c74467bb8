// ABOUTME: Helpers for building and comparing local directory trees in tests.
// ABOUTME: Converts between on-disk trees and RemoteNode values.

use super::remote::RemoteNode;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Write `node` to disk at `path`.
pub fn write_tree(path: &Path, node: &RemoteNode) {
    match node {
        RemoteNode::File { data, .. } => fs::write(path, data).unwrap(),
        RemoteNode::Dir { children, .. } => {
            fs::create_dir_all(path).unwrap();
            for (name, child) in children {
                write_tree(&path.join(name), child);
            }
        }
    }
}

/// Read the tree rooted at `path`, ignoring modes.
pub fn read_tree(path: &Path) -> RemoteNode {
    let metadata = fs::metadata(path).unwrap();
    if metadata.is_file() {
        return RemoteNode::file(fs::read(path).unwrap());
    }
    let mut children = BTreeMap::new();
    for entry in fs::read_dir(path).unwrap() {
        let entry = entry.unwrap();
        children.insert(
            entry.file_name().to_string_lossy().into_owned(),
            read_tree(&entry.path()),
        );
    }
    RemoteNode::Dir {
        mode: 0o755,
        children,
    }
}

/// Same tree with every mode reset, for structural comparison.
pub fn without_modes(node: &RemoteNode) -> RemoteNode {
    match node {
        RemoteNode::File { data, .. } => RemoteNode::file(data.clone()),
        RemoteNode::Dir { children, .. } => RemoteNode::Dir {
            mode: 0o755,
            children: children
                .iter()
                .map(|(name, child)| (name.clone(), without_modes(child)))
                .collect(),
        },
    }
}

/// Deterministic, non-repeating-looking content of `len` bytes.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed as u32) as u8)
        .collect()
}
