//! Git-backed history for a chain directory.
//!
//! The whole directory is staged on every snapshot, so renames that touch
//! several node files at once need no bookkeeping. Reverting is a hard
//! reset: the branch is rewritten to the target commit and every later
//! commit stops being reachable from it.

use std::path::Path;

use chrono::{DateTime, Utc};
use git2::build::CheckoutBuilder;
use git2::{
    Commit, ErrorCode, IndexAddOption, Oid, Repository, RepositoryInitOptions, Revwalk,
    Signature, Sort,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ChainError, Result};

/// Branch every course history lives on.
pub const DEFAULT_BRANCH: &str = "master";

/// Commit identity supplied by the caller on every mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: String,
    pub author_name: String,
    pub author_email: String,
    pub message: String,
    pub time: DateTime<Utc>,
}

pub struct SnapshotRepo {
    repo: Repository,
}

impl SnapshotRepo {
    /// Create an empty repository at `dir`, discarding anything already
    /// there.
    pub fn init(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        std::fs::create_dir_all(dir)?;
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(DEFAULT_BRANCH);
        let repo = Repository::init_opts(dir, &opts)?;
        debug!(?dir, "initialized snapshot repository");
        Ok(Self { repo })
    }

    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.join(".git").exists() {
            return Err(ChainError::NotFound("snapshot repository".to_string()));
        }
        Ok(Self {
            repo: Repository::open(dir)?,
        })
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Stage the full state of the working directory and, when `commit` is
    /// set, record it as the new head.
    pub fn snapshot(&self, author: &Author, message: &str, commit: bool) -> Result<Option<Oid>> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        // picks up deletions and the old half of every rename
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        if !commit {
            return Ok(None);
        }

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = Signature::now(&author.name, &author.email)?;
        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let commit_id = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        debug!(commit = %commit_id, message, "recorded snapshot");
        Ok(Some(commit_id))
    }

    /// Commits reachable from `branch`, newest first, at most `depth` of
    /// them. Each call starts a fresh walk.
    pub fn history(&self, branch: &str, depth: usize) -> Result<History<'_>> {
        let reference = format!("refs/heads/{branch}");
        if self.repo.find_reference(&reference).is_err() {
            return Err(ChainError::NotFound(format!("branch {branch:?}")));
        }
        let mut walk = self.repo.revwalk()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        walk.push_ref(&reference)?;
        Ok(History {
            repo: &self.repo,
            walk,
            remaining: depth,
        })
    }

    /// Hard-reset `branch` and the working tree to `target`.
    ///
    /// Commits made after `target` are no longer reachable from `branch`.
    /// A failure part-way through can leave the working tree in between
    /// states; callers must rebuild anything derived from it.
    pub fn revert(&self, target: &str, branch: &str) -> Result<()> {
        let oid = Oid::from_str(target)
            .map_err(|_| ChainError::NotFound(format!("commit {target:?}")))?;
        let commit = self
            .repo
            .find_commit(oid)
            .map_err(|_| ChainError::NotFound(format!("commit {target:?}")))?;

        let step = |what: &str, e: git2::Error| {
            warn!(commit = %oid, error = %e, "revert failed while {what}");
            ChainError::RevertFailure(what.to_string())
        };

        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        self.repo
            .checkout_tree(commit.as_object(), Some(&mut checkout))
            .map_err(|e| step("checking out target", e))?;

        let reference = format!("refs/heads/{branch}");
        self.repo
            .reference(&reference, oid, true, &format!("revert to {oid}"))
            .map_err(|e| step("moving branch", e))?;
        self.repo
            .set_head(&reference)
            .map_err(|e| step("updating head", e))?;

        let tree = commit.tree().map_err(|e| step("reading target tree", e))?;
        let mut index = self.repo.index().map_err(|e| step("opening index", e))?;
        index.clear().map_err(|e| step("clearing index", e))?;
        index
            .read_tree(&tree)
            .map_err(|e| step("rebuilding index", e))?;
        index.write().map_err(|e| step("writing index", e))?;

        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        self.repo
            .checkout_head(Some(&mut checkout))
            .map_err(|e| step("checking out branch", e))?;

        info!(commit = %oid, branch, "reverted repository");
        Ok(())
    }
}

/// Remove a snapshot repository and everything in it. Missing directories
/// are not an error.
pub fn delete_repo(dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    Ok(())
}

/// Lazy walk over a branch's commits.
pub struct History<'repo> {
    repo: &'repo Repository,
    walk: Revwalk<'repo>,
    remaining: usize,
}

impl Iterator for History<'_> {
    type Item = Result<CommitInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let oid = match self.walk.next()? {
            Ok(oid) => oid,
            Err(e) => return Some(Err(e.into())),
        };
        self.remaining -= 1;
        Some(self.repo.find_commit(oid).map_err(Into::into).map(|c| {
            let author = c.author();
            CommitInfo {
                id: oid.to_string(),
                author_name: author.name().unwrap_or_default().to_string(),
                author_email: author.email().unwrap_or_default().to_string(),
                message: c.message().unwrap_or_default().to_string(),
                time: DateTime::from_timestamp(c.time().seconds(), 0).unwrap_or_default(),
            }
        }))
    }
}
