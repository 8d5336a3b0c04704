//! Lazily loaded view of the remote repository tree.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use codescope_client::Backend;
use codescope_core::types::{FileKind, FileNode};

use crate::error::ChatError;

/// Remote file tree. Each directory is listed at most once; later expansions
/// reuse the children fetched the first time.
pub struct FileBrowser {
    backend: Arc<dyn Backend>,
    root: Mutex<Option<FileNode>>,
}

impl FileBrowser {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            root: Mutex::new(None),
        }
    }

    /// List `path` and make it the root of the tree, replacing any previous
    /// root. Loading the current root again returns it as is, expanded
    /// directories included.
    pub async fn load_root(&self, path: &str) -> Result<FileNode, ChatError> {
        let mut root = self.root.lock().await;
        if let Some(current) = root.as_ref().filter(|node| node.path == path) {
            return Ok(current.clone());
        }
        let entries = self.backend.list_dir(path).await?;

        let node = FileNode {
            name: display_name(path),
            kind: FileKind::Directory,
            path: path.to_string(),
            children: Some(entries.into_iter().map(FileNode::from).collect()),
            loaded: true,
        };
        debug!(path, children = node.children.as_ref().map_or(0, Vec::len), "Loaded root");

        *root = Some(node.clone());
        Ok(node)
    }

    /// Children of the directory at `path`, fetching them on first use.
    pub async fn expand(&self, path: &str) -> Result<Vec<FileNode>, ChatError> {
        let mut root = self.root.lock().await;
        let tree = root
            .as_mut()
            .ok_or_else(|| ChatError::Precondition("no directory loaded".to_string()))?;
        let node = find_mut(tree, path)
            .ok_or_else(|| ChatError::Precondition(format!("not in the loaded tree: {}", path)))?;

        if !node.is_dir() {
            return Err(ChatError::Precondition(format!(
                "not a directory: {}",
                path
            )));
        }
        if node.loaded {
            return Ok(node.children.clone().unwrap_or_default());
        }

        let entries = self.backend.list_dir(path).await?;
        let children: Vec<FileNode> = entries.into_iter().map(FileNode::from).collect();
        debug!(path, children = children.len(), "Expanded directory");

        node.children = Some(children.clone());
        node.loaded = true;
        Ok(children)
    }

    /// Children of `path`: expanded in place when it is part of the loaded
    /// tree, otherwise loaded as a new root.
    pub async fn list(&self, path: &str) -> Result<Vec<FileNode>, ChatError> {
        let in_tree = {
            let mut root = self.root.lock().await;
            root.as_mut().is_some_and(|tree| find_mut(tree, path).is_some())
        };
        if in_tree {
            return self.expand(path).await;
        }
        Ok(self.load_root(path).await?.children.unwrap_or_default())
    }

    /// Fetch the content of a remote file.
    pub async fn read(&self, path: &str) -> Result<String, ChatError> {
        Ok(self.backend.read_file(path).await?)
    }

    /// Snapshot of the current tree.
    pub async fn root(&self) -> Option<FileNode> {
        self.root.lock().await.clone()
    }
}

fn find_mut<'a>(node: &'a mut FileNode, path: &str) -> Option<&'a mut FileNode> {
    if node.path == path {
        return Some(node);
    }
    node.children
        .as_mut()?
        .iter_mut()
        .find_map(|child| find_mut(child, path))
}

fn display_name(path: &str) -> String {
    let trimmed = path.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(path)
        .to_string()
}
