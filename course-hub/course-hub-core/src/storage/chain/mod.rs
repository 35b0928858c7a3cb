//! Ordered document chain for one course.
//!
//! Every document lives in its own file named `<code><title><next>`, so the
//! directory listing alone is enough to recover the order: start at the
//! root code and follow each node's `next` code until the null marker. No
//! index file exists.
//!
//! In memory the chain is an ordered vector of nodes. A node's predecessor
//! and successor are its neighbours in that vector; only the forward link is
//! written to disk. Structural mutations rename the affected files before
//! the vector is updated.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::{ContentStore, FsContentStore};
use crate::error::{ChainError, Result};

mod name;


pub use name::{NodeCode, NodeName, CODE_WIDTH, NULL_CODE};

/// A titled document read back from the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub contents: String,
}

/// One entry of the chain. Its file name is derived from these fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainNode {
    code: NodeCode,
    title: String,
    next: Option<NodeCode>,
}

impl ChainNode {
    pub fn code(&self) -> NodeCode {
        self.code
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Code of the following node, `None` at the end of the chain.
    pub fn next_code(&self) -> Option<NodeCode> {
        self.next
    }

    pub fn file_name(&self) -> String {
        name::encode(self.code, &self.title, self.next)
    }
}

impl From<NodeName> for ChainNode {
    fn from(n: NodeName) -> Self {
        Self {
            code: n.code,
            title: n.title,
            next: n.next,
        }
    }
}

pub struct DocumentChain {
    store: Box<dyn ContentStore>,
    nodes: Vec<ChainNode>,
    next_code: Option<NodeCode>,
    orphans: Vec<String>,
}

impl std::fmt::Debug for DocumentChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentChain")
            .field("location", &self.store.location())
            .field("nodes", &self.nodes)
            .field("next_code", &self.next_code)
            .field("orphans", &self.orphans)
            .finish()
    }
}

impl DocumentChain {
    /// Start a new chain in `folder` holding only the root document.
    pub fn create(folder: impl Into<PathBuf>, root_title: &str, root_contents: &str) -> Result<Self> {
        let store = FsContentStore::create(folder)?;
        Self::create_in(Box::new(store), root_title, root_contents)
    }

    pub fn create_in(
        store: Box<dyn ContentStore>,
        root_title: &str,
        root_contents: &str,
    ) -> Result<Self> {
        check_title(root_title)?;
        let initialized = store
            .list()?
            .iter()
            .filter_map(|f| NodeName::decode(f))
            .any(|n| n.code == NodeCode::ROOT);
        if initialized {
            return Err(ChainError::AlreadyInitialized);
        }
        let root = ChainNode {
            code: NodeCode::ROOT,
            title: root_title.to_string(),
            next: None,
        };
        store.write(&root.file_name(), root_contents.as_bytes())?;
        debug!(location = ?store.location(), title = root_title, "created chain");
        Ok(Self {
            store,
            nodes: vec![root],
            next_code: Some(NodeCode::FIRST),
            orphans: Vec::new(),
        })
    }

    /// Rebuild a chain by decoding the file names in `folder`.
    pub fn reconstruct(folder: impl Into<PathBuf>) -> Result<Self> {
        let folder = folder.into();
        let store = FsContentStore::open(&folder).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ChainError::NotFound("chain directory".to_string()),
            _ => ChainError::Io(e),
        })?;
        Self::reconstruct_from(Box::new(store))
    }

    pub fn reconstruct_from(store: Box<dyn ContentStore>) -> Result<Self> {
        let mut roots = Vec::new();
        let mut candidates: HashMap<NodeCode, NodeName> = HashMap::new();
        let mut orphans = Vec::new();
        let mut highest = NodeCode::ROOT;

        for file in store.list()? {
            let Some(decoded) = NodeName::decode(&file) else {
                debug!(file = %file, "ignoring non-node file");
                continue;
            };
            highest = highest.max(decoded.code);
            if decoded.code == NodeCode::ROOT {
                roots.push(decoded);
            } else if candidates.contains_key(&decoded.code) {
                warn!(file = %file, code = %decoded.code, "duplicate node code");
                orphans.push(file);
            } else {
                candidates.insert(decoded.code, decoded);
            }
        }

        if roots.len() != 1 {
            warn!(location = ?store.location(), roots = roots.len(), "expected exactly one root file");
            return Err(ChainError::MissingRoot);
        }
        let root = roots.remove(0);
        let mut pointer = root.next;
        let mut nodes = vec![ChainNode::from(root)];

        while let Some(code) = pointer {
            let Some(found) = candidates.remove(&code) else {
                warn!(location = ?store.location(), code = %code, "chain link points at a missing node");
                break;
            };
            pointer = found.next;
            nodes.push(found.into());
        }

        orphans.extend(candidates.into_values().map(|n| n.encode()));
        orphans.sort();
        if !orphans.is_empty() {
            let report = ChainError::InconsistentChain(format!(
                "{} unreachable node file(s)",
                orphans.len()
            ));
            warn!(location = ?store.location(), ?orphans, "{report}");
        }

        let mut seen = HashSet::new();
        for node in &nodes {
            if !seen.insert(node.title.as_str()) {
                warn!(location = ?store.location(), title = %node.title, "duplicate title in chain");
            }
        }

        debug!(location = ?store.location(), nodes = nodes.len(), "reconstructed chain");
        Ok(Self {
            store,
            nodes,
            next_code: highest.succ(),
            orphans,
        })
    }

    /// Directory backing this chain.
    pub fn location(&self) -> &Path {
        self.store.location()
    }

    pub fn root(&self) -> &ChainNode {
        &self.nodes[0]
    }

    pub fn tail(&self) -> &ChainNode {
        &self.nodes[self.nodes.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root node can never be removed.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in chain order. Reversing the iterator walks the `prev` links.
    pub fn iter(&self) -> std::slice::Iter<'_, ChainNode> {
        self.nodes.iter()
    }

    /// Files found during reconstruction that no link reaches.
    pub fn orphans(&self) -> &[String] {
        &self.orphans
    }

    pub fn find(&self, title: &str) -> Option<&ChainNode> {
        self.position(title).map(|i| &self.nodes[i])
    }

    pub fn prev(&self, title: &str) -> Option<&ChainNode> {
        let i = self.position(title)?;
        i.checked_sub(1).map(|p| &self.nodes[p])
    }

    pub fn next(&self, title: &str) -> Option<&ChainNode> {
        let i = self.position(title)?;
        self.nodes.get(i + 1)
    }

    pub fn get(&self, title: &str) -> Result<Document> {
        let i = self
            .position(title)
            .ok_or_else(|| ChainError::NotFound(format!("document {title:?}")))?;
        self.read(&self.nodes[i])
    }

    /// Read every document, root first.
    pub fn documents(&self) -> impl Iterator<Item = Result<Document>> + '_ {
        self.nodes.iter().map(|node| self.read(node))
    }

    pub fn get_all(&self) -> Result<Vec<Document>> {
        self.documents().collect()
    }

    /// Add a document at the end of the chain.
    pub fn append(&mut self, title: &str, contents: &str) -> Result<&ChainNode> {
        check_title(title)?;
        if self.position(title).is_some() {
            return Err(ChainError::TitleConflict(title.to_string()));
        }
        let code = self.next_code.ok_or(ChainError::CodeSpaceExhausted)?;
        self.next_code = code.succ();

        let node = ChainNode {
            code,
            title: title.to_string(),
            next: None,
        };
        self.store.write(&node.file_name(), contents.as_bytes())?;

        let tail = self.nodes.len() - 1;
        if let Err(e) = self.relink(tail, Some(code)) {
            error!(
                location = ?self.location(),
                code = %code,
                error = %e,
                "appended node written but previous tail was not relinked"
            );
            return Err(e);
        }
        debug!(location = ?self.location(), code = %code, title, "appended node");
        self.nodes.push(node);
        Ok(self.tail())
    }

    pub fn rename(&mut self, title: &str, new_title: &str) -> Result<()> {
        let i = self
            .position(title)
            .ok_or_else(|| ChainError::NotFound(format!("document {title:?}")))?;
        if title == new_title {
            return Ok(());
        }
        check_title(new_title)?;
        if self.position(new_title).is_some() {
            return Err(ChainError::TitleConflict(new_title.to_string()));
        }
        let node = &self.nodes[i];
        let from = node.file_name();
        let to = name::encode(node.code, new_title, node.next);
        self.move_file(&from, &to)?;
        debug!(location = ?self.location(), from = title, to = new_title, "renamed node");
        self.nodes[i].title = new_title.to_string();
        Ok(())
    }

    pub fn update_contents(&mut self, title: &str, contents: &str) -> Result<()> {
        let i = self
            .position(title)
            .ok_or_else(|| ChainError::NotFound(format!("document {title:?}")))?;
        let file = self.nodes[i].file_name();
        if !self.store.exists(&file) {
            return Err(self.missing_file(&self.nodes[i]));
        }
        self.store.write(&file, contents.as_bytes())?;
        debug!(location = ?self.location(), title, "updated node contents");
        Ok(())
    }

    /// Remove a document and link its neighbours together.
    pub fn delete(&mut self, title: &str) -> Result<()> {
        let i = self
            .position(title)
            .ok_or_else(|| ChainError::NotFound(format!("document {title:?}")))?;
        if i == 0 {
            return Err(ChainError::RootDeletionForbidden);
        }
        let file = self.nodes[i].file_name();
        if !self.store.exists(&file) {
            return Err(self.missing_file(&self.nodes[i]));
        }
        self.store.remove(&file)?;

        let successor = self.nodes.get(i + 1).map(|n| n.code);
        let removed = self.nodes.remove(i);
        if let Err(e) = self.relink(i - 1, successor) {
            error!(
                location = ?self.location(),
                code = %removed.code,
                error = %e,
                "deleted node removed but its predecessor was not relinked"
            );
            return Err(e);
        }
        debug!(location = ?self.location(), code = %removed.code, title, "deleted node");
        Ok(())
    }

    /// Check the link invariants against the in-memory order and the files
    /// on disk.
    pub fn verify(&self) -> Result<()> {
        if self.root().code != NodeCode::ROOT {
            return Err(ChainError::InconsistentChain("first node is not the root".into()));
        }
        for pair in self.nodes.windows(2) {
            if pair[0].next != Some(pair[1].code) {
                return Err(ChainError::InconsistentChain(format!(
                    "node {} does not link to its successor {}",
                    pair[0].code, pair[1].code
                )));
            }
        }
        if self.tail().next.is_some() {
            return Err(ChainError::InconsistentChain("tail links past the end".into()));
        }
        let mut titles = HashSet::new();
        let mut codes = HashSet::new();
        for node in &self.nodes {
            if !titles.insert(node.title.as_str()) {
                return Err(ChainError::TitleConflict(node.title.clone()));
            }
            if !codes.insert(node.code) {
                return Err(ChainError::InconsistentChain(format!(
                    "code {} used twice",
                    node.code
                )));
            }
            if !self.store.exists(&node.file_name()) {
                return Err(self.missing_file(node));
            }
        }
        if !self.orphans.is_empty() {
            return Err(ChainError::InconsistentChain(format!(
                "{} unreachable node file(s)",
                self.orphans.len()
            )));
        }
        Ok(())
    }

    fn position(&self, title: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.title == title)
    }

    fn read(&self, node: &ChainNode) -> Result<Document> {
        let bytes = self.store.read(&node.file_name())?;
        let contents = String::from_utf8(bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Document {
            title: node.title.clone(),
            contents,
        })
    }

    /// Point the node at index `i` to `next`, renaming its file first.
    fn relink(&mut self, i: usize, next: Option<NodeCode>) -> Result<()> {
        let node = &self.nodes[i];
        let from = node.file_name();
        let to = name::encode(node.code, &node.title, next);
        self.move_file(&from, &to)?;
        self.nodes[i].next = next;
        Ok(())
    }

    fn move_file(&self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        if !self.store.exists(from) {
            return Err(ChainError::InconsistentChain(format!(
                "node file {from:?} is missing"
            )));
        }
        self.store.rename(from, to)?;
        Ok(())
    }

    fn missing_file(&self, node: &ChainNode) -> ChainError {
        ChainError::InconsistentChain(format!("node file for code {} is missing", node.code))
    }
}

fn check_title(title: &str) -> Result<()> {
    if name::valid_title(title) {
        Ok(())
    } else {
        Err(ChainError::InvalidTitle(title.to_string()))
    }
}
