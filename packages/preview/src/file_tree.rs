// ABOUTME: In-memory tree of generated project files
// ABOUTME: Built from the backend manifest and written to a sandbox root on mount

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileNode {
    File(String),
    Directory(FileTree),
}

/// Ordered mapping from path segment to file content or a nested tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTree {
    entries: BTreeMap<String, FileNode>,
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a manifest (string leaf = file, object = directory).
    ///
    /// Returns `None` if the manifest itself is not an object. Entries with
    /// any other JSON type, or with names that are not a single path segment,
    /// are skipped with a warning.
    pub fn from_manifest(manifest: &Value) -> Option<Self> {
        let object = manifest.as_object()?;
        let mut tree = FileTree::new();

        for (name, value) in object {
            if !is_valid_segment(name) {
                warn!("Skipping manifest entry with invalid name '{}'", name);
                continue;
            }
            match value {
                Value::String(content) => {
                    tree.insert(name.clone(), FileNode::File(content.clone()));
                }
                Value::Object(_) => {
                    if let Some(child) = FileTree::from_manifest(value) {
                        tree.insert(name.clone(), FileNode::Directory(child));
                    }
                }
                other => {
                    warn!(
                        "Skipping manifest entry '{}' with unsupported type {}",
                        name,
                        json_type(other)
                    );
                }
            }
        }

        Some(tree)
    }

    pub fn insert(&mut self, name: impl Into<String>, node: FileNode) {
        self.entries.insert(name.into(), node);
    }

    pub fn get(&self, name: &str) -> Option<&FileNode> {
        self.entries.get(name)
    }

    /// Look up a `/` separated path.
    pub fn lookup(&self, path: &str) -> Option<&FileNode> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let mut node = self.entries.get(segments.next()?)?;
        for segment in segments {
            match node {
                FileNode::Directory(tree) => node = tree.entries.get(segment)?,
                FileNode::File(_) => return None,
            }
        }
        Some(node)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FileNode)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of files across every level.
    pub fn file_count(&self) -> usize {
        self.entries
            .values()
            .map(|node| match node {
                FileNode::File(_) => 1,
                FileNode::Directory(tree) => tree.file_count(),
            })
            .sum()
    }

    /// Write every file under `root`, overwriting existing files. Files
    /// already on disk but absent from the tree are left alone.
    pub async fn write_to(&self, root: &Path) -> std::io::Result<()> {
        let mut pending: Vec<(PathBuf, &FileTree)> = vec![(root.to_path_buf(), self)];

        while let Some((dir, tree)) = pending.pop() {
            tokio::fs::create_dir_all(&dir).await?;
            for (name, node) in &tree.entries {
                let path = dir.join(name);
                match node {
                    FileNode::File(content) => tokio::fs::write(&path, content).await?,
                    FileNode::Directory(child) => pending.push((path, child)),
                }
            }
        }

        Ok(())
    }
}

fn is_valid_segment(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_manifest_nested_and_skips_unsupported() {
        let manifest = json!({
            "package.json": "{\"name\":\"site\"}",
            "src": {
                "main.tsx": "render()",
                "components": { "Hero.tsx": "export {}" },
                "weird": 42
            },
            "list": ["a", "b"],
            "..": "escape"
        });

        let tree = FileTree::from_manifest(&manifest).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.file_count(), 3);
        assert_eq!(
            tree.lookup("src/components/Hero.tsx"),
            Some(&FileNode::File("export {}".to_string()))
        );
        assert!(tree.lookup("src/weird").is_none());
        assert!(tree.get("..").is_none());
    }

    #[test]
    fn test_from_manifest_rejects_non_object() {
        assert!(FileTree::from_manifest(&json!(null)).is_none());
        assert!(FileTree::from_manifest(&json!("text")).is_none());
    }

    #[tokio::test]
    async fn test_write_to_overwrites_and_keeps_extra_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        tokio::fs::write(root.join("index.html"), "old").await.unwrap();
        tokio::fs::write(root.join("keep.txt"), "keep").await.unwrap();

        let tree = FileTree::from_manifest(&json!({
            "index.html": "new",
            "src": { "app.js": "1" }
        }))
        .unwrap();
        tree.write_to(root).await.unwrap();

        assert_eq!(std::fs::read_to_string(root.join("index.html")).unwrap(), "new");
        assert_eq!(std::fs::read_to_string(root.join("src/app.js")).unwrap(), "1");
        assert_eq!(std::fs::read_to_string(root.join("keep.txt")).unwrap(), "keep");
    }
}
