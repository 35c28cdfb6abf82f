use crate::io;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::io::{Read, Write};

#[derive(Debug, Default, Clone)]
struct TrieNode {
    segment: String,
    is_leaf: bool,
    children: BTreeMap<String, TrieNode>,
}

/// Trie over '/'-separated path segments. `""` and `"/"` address the root.
/// Leaf nodes mark the keys that own a bitmap in the enclosing field group.
#[derive(Debug, Default, Clone)]
pub struct PathTrie {
    root: TrieNode,
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.trim_start_matches('/')
        .split('/')
        .filter(|seg| !seg.is_empty())
}

impl PathTrie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(&mut self, path: &str) {
        let mut node = &mut self.root;
        for seg in split_path(path) {
            node = node.children.entry(seg.to_string()).or_insert_with(|| TrieNode {
                segment: seg.to_string(),
                ..TrieNode::default()
            });
        }
        node.is_leaf = true;
    }

    fn find_node(&self, path: &str) -> Option<&TrieNode> {
        let mut node = &self.root;
        for seg in split_path(path) {
            node = node.children.get(seg)?;
        }
        Some(node)
    }

    /// Inserts into `out` the reconstructed path of every leaf within `depth`
    /// levels below the node at `prefix` (`-1` = unbounded). A leaf at the
    /// start node itself contributes too; the root leaf reports as `"/"`.
    pub fn collect_bitmap_keys(&self, prefix: &str, depth: i32, out: &mut BTreeSet<String>) {
        let Some(start) = self.find_node(prefix) else {
            return;
        };
        let mut buffer = if prefix.is_empty() || prefix == "/" {
            String::new()
        } else {
            let mut p = prefix.to_string();
            if !p.starts_with('/') {
                p.insert(0, '/');
            }
            while p.len() > 1 && p.ends_with('/') {
                p.pop();
            }
            p
        };
        Self::collect_recursive(start, 0, depth, out, &mut buffer);
    }

    fn collect_recursive(
        node: &TrieNode,
        current_depth: i32,
        max_depth: i32,
        out: &mut BTreeSet<String>,
        buffer: &mut String,
    ) {
        if node.is_leaf {
            if buffer.is_empty() || buffer == "/" {
                out.insert("/".to_string());
            } else {
                out.insert(buffer.clone());
            }
        }
        if max_depth != -1 && current_depth >= max_depth {
            return;
        }
        for (segment, child) in &node.children {
            let saved = buffer.len();
            if buffer.is_empty() || buffer == "/" {
                buffer.clear();
            }
            buffer.push('/');
            buffer.push_str(segment);
            Self::collect_recursive(child, current_depth + 1, max_depth, out, buffer);
            buffer.truncate(saved);
        }
    }

    pub fn serialize_into<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        Self::serialize_node(&self.root, w)
    }

    fn serialize_node<W: Write>(node: &TrieNode, w: &mut W) -> std::io::Result<()> {
        io::write_str(w, node.segment.as_bytes())?;
        io::write_bool(w, node.is_leaf)?;
        io::write_u32(w, node.children.len() as u32)?;
        for child in node.children.values() {
            Self::serialize_node(child, w)?;
        }
        Ok(())
    }

    pub fn deserialize_from<R: Read>(r: &mut R) -> std::io::Result<Self> {
        Ok(Self {
            root: Self::parse_node(r)?,
        })
    }

    fn parse_node<R: Read>(r: &mut R) -> std::io::Result<TrieNode> {
        let segment = io::read_utf8(r)?;
        let is_leaf = io::read_bool(r)?;
        let child_count = io::read_u32(r)?;
        let mut children = BTreeMap::new();
        for _ in 0..child_count {
            let child = Self::parse_node(r)?;
            children.insert(child.segment.clone(), child);
        }
        Ok(TrieNode {
            segment,
            is_leaf,
            children,
        })
    }
}
