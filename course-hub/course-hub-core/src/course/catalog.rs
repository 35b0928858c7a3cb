use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{ChainError, Result};

const INDEX_FILE: &str = "courses.json";

/// Maps course titles to the directory holding their chain.
pub trait CourseCatalog: Send + Sync {
    fn locate(&self, course: &str) -> Option<PathBuf>;
    /// Reserve a location for a new course.
    fn allocate(&self, course: &str) -> Result<PathBuf>;
    /// Change a course's title without moving its storage.
    fn rename(&self, course: &str, new_title: &str) -> Result<()>;
    fn release(&self, course: &str) -> Result<()>;
    /// All known course titles, sorted.
    fn titles(&self) -> Vec<String>;
}

/// Catalog that keeps one directory per course under a common root, with a
/// JSON index of titles to directory names.
pub struct DirectoryCatalog {
    root: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl DirectoryCatalog {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let index = root.join(INDEX_FILE);
        let entries = if index.exists() {
            let data = std::fs::read_to_string(&index)?;
            serde_json::from_str(&data).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, e)
            })?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            root,
            entries: Mutex::new(entries),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let data = serde_json::to_vec_pretty(entries)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.root.join(INDEX_FILE)).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Directory name for a course: spaces become dashes.
pub fn slug(course: &str) -> String {
    course.replace(' ', "-")
}

fn check_course_title(course: &str) -> Result<()> {
    let s = slug(course);
    if course.trim().is_empty()
        || course.contains(['/', '\\', '\0'])
        || s == "."
        || s == ".."
        || s == INDEX_FILE
    {
        return Err(ChainError::InvalidTitle(course.to_string()));
    }
    Ok(())
}

impl CourseCatalog for DirectoryCatalog {
    fn locate(&self, course: &str) -> Option<PathBuf> {
        self.entries.lock().get(course).map(|dir| self.root.join(dir))
    }

    fn allocate(&self, course: &str) -> Result<PathBuf> {
        check_course_title(course)?;
        let mut entries = self.entries.lock();
        let dir = slug(course);
        if entries.contains_key(course) || entries.values().any(|d| *d == dir) {
            return Err(ChainError::TitleConflict(course.to_string()));
        }
        entries.insert(course.to_string(), dir.clone());
        if let Err(e) = self.persist(&entries) {
            entries.remove(course);
            return Err(e);
        }
        debug!(course, dir = %dir, "allocated course location");
        Ok(self.root.join(dir))
    }

    fn rename(&self, course: &str, new_title: &str) -> Result<()> {
        check_course_title(new_title)?;
        let mut entries = self.entries.lock();
        if course == new_title {
            return if entries.contains_key(course) {
                Ok(())
            } else {
                Err(ChainError::NotFound(format!("course {course:?}")))
            };
        }
        if entries.contains_key(new_title) {
            return Err(ChainError::TitleConflict(new_title.to_string()));
        }
        let dir = entries
            .remove(course)
            .ok_or_else(|| ChainError::NotFound(format!("course {course:?}")))?;
        entries.insert(new_title.to_string(), dir);
        self.persist(&entries)
    }

    fn release(&self, course: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.remove(course).is_none() {
            return Err(ChainError::NotFound(format!("course {course:?}")));
        }
        self.persist(&entries)
    }

    fn titles(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn allocate_uses_dashed_directory() {
        let dir = TempDir::new().unwrap();
        let catalog = DirectoryCatalog::open(dir.path()).unwrap();
        let location = catalog.allocate("Intro to Rust").unwrap();
        assert_eq!(location, dir.path().join("Intro-to-Rust"));
        assert_eq!(catalog.locate("Intro to Rust"), Some(location));
        assert!(catalog.locate("Other").is_none());
    }

    #[test]
    fn allocate_conflicts() {
        let dir = TempDir::new().unwrap();
        let catalog = DirectoryCatalog::open(dir.path()).unwrap();
        catalog.allocate("a b").unwrap();
        assert!(matches!(catalog.allocate("a b"), Err(ChainError::TitleConflict(_))));
        // same directory, different title
        assert!(matches!(catalog.allocate("a-b"), Err(ChainError::TitleConflict(_))));
        assert!(matches!(catalog.allocate(".."), Err(ChainError::InvalidTitle(_))));
        assert!(matches!(catalog.allocate("x/y"), Err(ChainError::InvalidTitle(_))));
    }

    #[test]
    fn index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let catalog = DirectoryCatalog::open(dir.path()).unwrap();
            catalog.allocate("first").unwrap();
            catalog.allocate("second").unwrap();
            catalog.rename("second", "2nd").unwrap();
            catalog.release("first").unwrap();
        }
        let catalog = DirectoryCatalog::open(dir.path()).unwrap();
        assert_eq!(catalog.titles(), vec!["2nd".to_string()]);
        assert_eq!(catalog.locate("2nd"), Some(dir.path().join("second")));
    }

    #[test]
    fn index_is_replaced_not_rewritten() {
        let dir = TempDir::new().unwrap();
        let catalog = DirectoryCatalog::open(dir.path()).unwrap();
        catalog.allocate("first").unwrap();
        let index = dir.path().join(INDEX_FILE);
        let before = dir.path().join("index-before");
        std::fs::hard_link(&index, &before).unwrap();
        let old = std::fs::read_to_string(&before).unwrap();

        catalog.allocate("second").unwrap();

        // the old inode is untouched; the new index arrived by rename
        assert_eq!(std::fs::read_to_string(&before).unwrap(), old);
        let current = std::fs::read_to_string(&index).unwrap();
        assert!(current.contains("second"));
        let stray: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.unwrap().file_name().into_string().ok())
            .filter(|name| name.starts_with(".tmp"))
            .collect();
        assert!(stray.is_empty());
    }

    #[test]
    fn rename_and_release_missing() {
        let dir = TempDir::new().unwrap();
        let catalog = DirectoryCatalog::open(dir.path()).unwrap();
        assert!(matches!(catalog.rename("a", "b"), Err(ChainError::NotFound(_))));
        assert!(matches!(catalog.release("a"), Err(ChainError::NotFound(_))));
    }
}
