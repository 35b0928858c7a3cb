//! Course-level operations: resolve a course to its chain, mutate it and
//! record a snapshot of the result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::error::{ChainError, ErrorClass, Result};
use crate::registry::ChainRegistry;
use crate::snapshot::{self, Author, CommitInfo, SnapshotRepo, DEFAULT_BRANCH};
use crate::storage::chain::{Document, DocumentChain};

mod catalog;

#[cfg(test)]
mod tests;

pub use catalog::{slug, CourseCatalog, DirectoryCatalog};

/// Title of the root document of every course.
pub const DESCRIPTION_TITLE: &str = "Description";
/// Contents given to a topic created without any.
pub const NEW_TOPIC_CONTENTS: &str = "<p>new topic</p>";
pub const DEFAULT_HISTORY_DEPTH: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseSummary {
    pub title: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoursePage {
    pub courses: Vec<CourseSummary>,
    pub total: usize,
}

pub struct CourseService {
    catalog: Arc<dyn CourseCatalog>,
    registry: Arc<ChainRegistry>,
}

impl CourseService {
    pub fn new(catalog: Arc<dyn CourseCatalog>, registry: Arc<ChainRegistry>) -> Self {
        Self { catalog, registry }
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    pub async fn create_course(&self, title: &str, author: &Author) -> Result<CourseSummary> {
        let location = self.catalog.allocate(title)?;
        match self.init_course(title, &location, author) {
            Ok(summary) => {
                info!(course = title, "created course");
                Ok(summary)
            }
            Err(e) => {
                self.registry.invalidate(&location);
                if let Err(cleanup) = snapshot::delete_repo(&location) {
                    warn!(course = title, error = %cleanup, "failed to remove partial course");
                }
                if let Err(cleanup) = self.catalog.release(title) {
                    warn!(course = title, error = %cleanup, "failed to release course entry");
                }
                Err(e)
            }
        }
    }

    fn init_course(&self, title: &str, location: &Path, author: &Author) -> Result<CourseSummary> {
        let repo = SnapshotRepo::init(location)?;
        let description = format!("<p>Description for {title}</p>");
        let chain = DocumentChain::create(location, DESCRIPTION_TITLE, &description)?;
        repo.snapshot(author, "initial commit", true)?;
        self.registry.register(location, chain);
        Ok(CourseSummary {
            title: title.to_string(),
            description,
        })
    }

    pub async fn course(&self, title: &str) -> Result<CourseSummary> {
        let (_, chain) = self.lock(title).await?;
        let root = chain.root().title().to_string();
        let description = chain.get(&root)?.contents;
        Ok(CourseSummary {
            title: title.to_string(),
            description,
        })
    }

    /// Courses whose title contains `query` (case-insensitive), optionally
    /// paginated with 1-based pages. A zero page or page size turns paging
    /// off and every match is returned. Courses that fail to load are left
    /// out of both the page and the total.
    pub async fn list_courses(
        &self,
        query: Option<&str>,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> Result<CoursePage> {
        let needle = query.map(str::to_lowercase);
        let matching: Vec<String> = self
            .catalog
            .titles()
            .into_iter()
            .filter(|t| needle.as_deref().map_or(true, |n| t.to_lowercase().contains(n)))
            .collect();
        let mut total = matching.len();
        let selected: Vec<String> = match (page, page_size) {
            (Some(page), Some(size)) if page > 0 && size > 0 => matching
                .into_iter()
                .skip((page - 1) * size)
                .take(size)
                .collect(),
            _ => matching,
        };

        let mut courses = Vec::with_capacity(selected.len());
        for title in selected {
            match self.course(&title).await {
                Ok(summary) => courses.push(summary),
                Err(e) => {
                    warn!(course = %title, error = %e, "skipping unreadable course");
                    total = total.saturating_sub(1);
                }
            }
        }
        Ok(CoursePage { courses, total })
    }

    /// Change a course's title. Its storage location stays where it is.
    pub async fn rename_course(&self, title: &str, new_title: &str) -> Result<()> {
        self.catalog.rename(title, new_title)?;
        info!(from = title, to = new_title, "renamed course");
        Ok(())
    }

    pub async fn update_description(
        &self,
        course: &str,
        contents: &str,
        author: &Author,
        message: &str,
    ) -> Result<()> {
        self.mutate(course, author, message, |chain| {
            let root = chain.root().title().to_string();
            chain.update_contents(&root, contents)
        })
        .await
    }

    /// Remove a course. Callers queued on its chain see the course as
    /// missing once they get the lock.
    pub async fn delete_course(&self, course: &str) -> Result<()> {
        let location = self.location(course)?;
        let guard = self.lock(course).await.ok();
        self.registry.invalidate(&location);
        let outcome = snapshot::delete_repo(&location).and_then(|_| self.catalog.release(course));
        drop(guard);
        outcome?;
        info!(course, "deleted course");
        Ok(())
    }

    pub async fn create_topic(
        &self,
        course: &str,
        topic: &str,
        contents: &str,
        author: &Author,
    ) -> Result<Document> {
        let message = format!("created topic {topic}");
        self.mutate(course, author, &message, |chain| {
            chain.append(topic, contents).map(|_| ())
        })
        .await?;
        Ok(Document {
            title: topic.to_string(),
            contents: contents.to_string(),
        })
    }

    pub async fn topics(&self, course: &str) -> Result<Vec<Document>> {
        let (_, chain) = self.lock(course).await?;
        chain.get_all()
    }

    pub async fn topic(&self, course: &str, topic: &str) -> Result<Document> {
        let (_, chain) = self.lock(course).await?;
        chain.get(topic)
    }

    pub async fn rename_topic(
        &self,
        course: &str,
        topic: &str,
        new_title: &str,
        author: &Author,
        message: &str,
    ) -> Result<()> {
        self.mutate(course, author, message, |chain| chain.rename(topic, new_title))
            .await
    }

    pub async fn update_topic(
        &self,
        course: &str,
        topic: &str,
        contents: &str,
        author: &Author,
        message: &str,
    ) -> Result<()> {
        self.mutate(course, author, message, |chain| {
            chain.update_contents(topic, contents)
        })
        .await
    }

    pub async fn delete_topic(
        &self,
        course: &str,
        topic: &str,
        author: &Author,
        message: &str,
    ) -> Result<()> {
        self.mutate(course, author, message, |chain| chain.delete(topic))
            .await
    }

    /// Most recent commits of the course, newest first.
    pub async fn versions(&self, course: &str, depth: usize) -> Result<Vec<CommitInfo>> {
        let location = self.location(course)?;
        let repo = SnapshotRepo::open(&location)?;
        let commits = repo
            .history(DEFAULT_BRANCH, depth)?
            .collect::<Result<Vec<_>>>()?;
        Ok(commits)
    }

    /// Hard-reset the course to `commit`. The cached chain is dropped
    /// whether or not the reset succeeds.
    pub async fn revert(&self, course: &str, commit: &str) -> Result<()> {
        let location = self.location(course)?;
        // a chain that fails to load must not block the reset
        let guard = self.lock(course).await.ok();

        let outcome =
            SnapshotRepo::open(&location).and_then(|repo| repo.revert(commit, DEFAULT_BRANCH));
        self.registry.invalidate(&location);
        drop(guard);
        outcome?;

        self.registry.get(&location)?;
        info!(course, commit, "reverted course");
        Ok(())
    }

    fn location(&self, course: &str) -> Result<PathBuf> {
        self.catalog
            .locate(course)
            .ok_or_else(|| ChainError::NotFound(format!("course {course:?}")))
    }

    /// Lock the course's current chain.
    ///
    /// A revert or delete replaces the registry entry while other callers
    /// may be waiting on the old one, so the lock is only kept once the
    /// chain it guards is still the registered one.
    async fn lock(&self, course: &str) -> Result<(PathBuf, OwnedMutexGuard<DocumentChain>)> {
        let location = self.location(course)?;
        loop {
            let chain = self.registry.get(&location)?;
            let guard = chain.clone().lock_owned().await;
            if self.registry.is_current(&location, &chain) {
                return Ok((location, guard));
            }
            debug!(course, "chain replaced while waiting for its lock");
        }
    }

    /// Apply `f` to the course's chain and snapshot the directory, holding
    /// the chain lock across both steps.
    ///
    /// When `f` fails for an internal reason the files on disk may no longer
    /// match the cached chain, so it is dropped and the next access rebuilds
    /// it from disk.
    async fn mutate<F>(&self, course: &str, author: &Author, message: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut DocumentChain) -> Result<()> + Send,
    {
        let (location, mut chain) = self.lock(course).await?;
        if let Err(e) = f(&mut *chain) {
            if e.class() == ErrorClass::Internal {
                warn!(course, error = %e, "mutation failed part-way, dropping cached chain");
                self.registry.invalidate(&location);
            }
            return Err(e);
        }
        SnapshotRepo::open(&location)?.snapshot(author, message, true)?;
        Ok(())
    }
}
