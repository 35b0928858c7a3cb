use std::path::PathBuf;

use anyhow::{Context, Result};
use course_hub_core::course::DEFAULT_HISTORY_DEPTH;
use course_hub_core::snapshot::Author;

pub struct Config {
    pub data_dir: PathBuf,
    pub author_name: String,
    pub author_email: String,
    pub history_depth: usize,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let history_depth = match lookup("COURSE_HUB_HISTORY_DEPTH") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid COURSE_HUB_HISTORY_DEPTH {raw:?}"))?,
            None => DEFAULT_HISTORY_DEPTH,
        };
        Ok(Config {
            data_dir: lookup("COURSE_HUB_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("db")),
            author_name: lookup("COURSE_HUB_AUTHOR_NAME")
                .unwrap_or_else(|| "course-hub".to_string()),
            author_email: lookup("COURSE_HUB_AUTHOR_EMAIL")
                .unwrap_or_else(|| "course@hub".to_string()),
            history_depth,
        })
    }

    pub fn author(&self) -> Author {
        Author::new(&self.author_name, &self.author_email)
    }
}
