use std::collections::HashMap;

use crate::models::{EntryType, FileNode, NodeKind, RawTreeEntry};

struct Slot {
    name: String,
    path: String,
    kind: NodeKind,
    size: Option<u64>,
    children: Vec<usize>,
}

/// Rebuilds the hierarchy from a flat listing in any order.
///
/// Parents that never appear in the listing (e.g. after truncation) are
/// synthesized as directories.
pub fn build_tree(entries: &[RawTreeEntry]) -> Vec<FileNode> {
    let mut slots: Vec<Slot> = Vec::with_capacity(entries.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(entries.len());
    let mut roots: Vec<usize> = Vec::new();

    for entry in entries {
        let path = entry.path.trim_matches('/');
        if path.is_empty() {
            continue;
        }
        let slot = attach(path, &mut slots, &mut index, &mut roots);
        slots[slot].kind = match entry.entry_type {
            EntryType::Blob => NodeKind::File,
            EntryType::Tree | EntryType::Commit => NodeKind::Directory,
        };
        slots[slot].size = entry.size;
    }

    let mut tree: Vec<FileNode> = roots.iter().map(|&i| materialize(i, &slots)).collect();
    sort_nodes(&mut tree);
    tree
}

fn attach(
    path: &str,
    slots: &mut Vec<Slot>,
    index: &mut HashMap<String, usize>,
    roots: &mut Vec<usize>,
) -> usize {
    if let Some(&existing) = index.get(path) {
        return existing;
    }

    let (parent, name) = match path.rsplit_once('/') {
        Some((parent, name)) => (Some(parent), name),
        None => (None, path),
    };

    let slot = slots.len();
    slots.push(Slot {
        name: name.to_string(),
        path: path.to_string(),
        kind: NodeKind::Directory,
        size: None,
        children: Vec::new(),
    });
    index.insert(path.to_string(), slot);

    match parent {
        Some(parent) => {
            let parent_slot = attach(parent, slots, index, roots);
            slots[parent_slot].children.push(slot);
        }
        None => roots.push(slot),
    }
    slot
}

fn materialize(slot: usize, slots: &[Slot]) -> FileNode {
    let s = &slots[slot];
    let mut children: Vec<FileNode> = s.children.iter().map(|&c| materialize(c, slots)).collect();
    sort_nodes(&mut children);
    FileNode {
        name: s.name.clone(),
        path: s.path.clone(),
        kind: s.kind,
        size: s.size,
        children,
    }
}

fn sort_nodes(nodes: &mut [FileNode]) {
    nodes.sort_by(|a, b| {
        let a_dir = a.kind == NodeKind::Directory;
        let b_dir = b.kind == NodeKind::Directory;
        b_dir.cmp(&a_dir).then_with(|| a.name.cmp(&b.name))
    });
}

/// Indented listing for prompts, capped at `max_lines`.
pub fn render_tree(nodes: &[FileNode], max_lines: usize) -> String {
    fn walk(nodes: &[FileNode], depth: usize, out: &mut Vec<String>, max: usize) {
        for node in nodes {
            if out.len() >= max {
                return;
            }
            let suffix = if node.kind == NodeKind::Directory { "/" } else { "" };
            out.push(format!("{}{}{}", "  ".repeat(depth), node.name, suffix));
            walk(&node.children, depth + 1, out, max);
        }
    }

    let mut lines = Vec::new();
    walk(nodes, 0, &mut lines, max_lines);
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<RawTreeEntry> {
        vec![
            RawTreeEntry::tree("a"),
            RawTreeEntry::tree("a/b"),
            RawTreeEntry::blob("a/b/c.txt", 12),
        ]
    }

    fn assert_nested(tree: &[FileNode]) {
        assert_eq!(tree.len(), 1);
        let a = &tree[0];
        assert_eq!(a.path, "a");
        assert_eq!(a.kind, NodeKind::Directory);
        let b = &a.children[0];
        assert_eq!(b.path, "a/b");
        let c = &b.children[0];
        assert_eq!(c.name, "c.txt");
        assert_eq!(c.kind, NodeKind::File);
        assert_eq!(c.size, Some(12));
    }

    #[test]
    fn test_every_permutation_builds_same_tree() {
        let base = entries();
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let shuffled: Vec<RawTreeEntry> = order.iter().map(|&i| base[i].clone()).collect();
            assert_nested(&build_tree(&shuffled));
        }
    }

    #[test]
    fn test_missing_parents_are_synthesized() {
        let tree = build_tree(&[RawTreeEntry::blob("src/github/client.rs", 10)]);
        assert_eq!(tree[0].path, "src");
        assert!(tree[0].find("src/github/client.rs").is_some());
    }

    #[test]
    fn test_directories_sort_first() {
        let tree = build_tree(&[
            RawTreeEntry::blob("README.md", 1),
            RawTreeEntry::blob("Cargo.toml", 1),
            RawTreeEntry::tree("src"),
        ]);
        let names: Vec<&str> = tree.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["src", "Cargo.toml", "README.md"]);
    }

    #[test]
    fn test_render_tree_caps_lines() {
        let tree = build_tree(&entries());
        assert_eq!(render_tree(&tree, 10), "a/\n  b/\n    c.txt");
        assert_eq!(render_tree(&tree, 2), "a/\n  b/");
    }
}
