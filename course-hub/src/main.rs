//! Course Hub command line
//!
//! Manages courses stored as ordered, versioned document chains.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use course_hub_core::course::{CourseService, DirectoryCatalog, NEW_TOPIC_CONTENTS};
use course_hub_core::registry::ChainRegistry;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "course-hub")]
#[command(about = "Versioned course documents backed by git")]
struct Cli {
    /// Directory holding one subdirectory per course
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Commit author name
    #[arg(long, global = true)]
    author_name: Option<String>,

    /// Commit author email
    #[arg(long, global = true)]
    author_email: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a course with an initial description
    CreateCourse { course: String },

    /// List courses
    Courses {
        /// Case-insensitive title filter
        #[arg(short, long)]
        query: Option<String>,

        /// 1-based page number
        #[arg(long, requires = "page_size")]
        page: Option<usize>,

        #[arg(long, requires = "page")]
        page_size: Option<usize>,
    },

    /// Show a course and its description
    Course { course: String },

    /// Change a course's title
    RenameCourse { course: String, new_title: String },

    /// Delete a course and its history
    DeleteCourse { course: String },

    /// Append a topic to a course
    AddTopic {
        course: String,
        topic: String,
        #[arg(short, long)]
        contents: Option<String>,
    },

    /// List every document of a course in order
    Topics { course: String },

    /// Show one topic
    Topic { course: String, topic: String },

    /// Rename a topic
    RenameTopic {
        course: String,
        topic: String,
        new_title: String,
        #[arg(short, long, default_value = "renamed topic")]
        message: String,
    },

    /// Replace a topic's contents
    UpdateTopic {
        course: String,
        topic: String,
        contents: String,
        #[arg(short, long, default_value = "updated topic")]
        message: String,
    },

    /// Replace a course's description
    UpdateDescription {
        course: String,
        contents: String,
        #[arg(short, long, default_value = "updated description")]
        message: String,
    },

    /// Delete a topic
    DeleteTopic {
        course: String,
        topic: String,
        #[arg(short, long, default_value = "deleted topic")]
        message: String,
    },

    /// Show a course's commit history
    Versions {
        course: String,
        #[arg(short, long)]
        depth: Option<usize>,
    },

    /// Reset a course to an earlier commit, discarding later ones
    Revert { course: String, commit: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(name) = cli.author_name {
        config.author_name = name;
    }
    if let Some(email) = cli.author_email {
        config.author_email = email;
    }

    info!(data_dir = ?config.data_dir, "opening course catalog");
    let catalog = Arc::new(DirectoryCatalog::open(&config.data_dir)?);
    let registry = Arc::new(ChainRegistry::new());
    let service = CourseService::new(catalog, registry.clone());

    run(&service, &config, cli.command).await?;
    registry.clear();
    Ok(())
}

async fn run(service: &CourseService, config: &Config, command: Commands) -> Result<()> {
    let author = config.author();
    match command {
        Commands::CreateCourse { course } => {
            print(&service.create_course(&course, &author).await?)?;
        }
        Commands::Courses {
            query,
            page,
            page_size,
        } => {
            print(&service.list_courses(query.as_deref(), page, page_size).await?)?;
        }
        Commands::Course { course } => {
            print(&service.course(&course).await?)?;
        }
        Commands::RenameCourse { course, new_title } => {
            service.rename_course(&course, &new_title).await?;
        }
        Commands::DeleteCourse { course } => {
            service.delete_course(&course).await?;
        }
        Commands::AddTopic {
            course,
            topic,
            contents,
        } => {
            let contents = contents.as_deref().unwrap_or(NEW_TOPIC_CONTENTS);
            print(&service.create_topic(&course, &topic, contents, &author).await?)?;
        }
        Commands::Topics { course } => {
            print(&service.topics(&course).await?)?;
        }
        Commands::Topic { course, topic } => {
            print(&service.topic(&course, &topic).await?)?;
        }
        Commands::RenameTopic {
            course,
            topic,
            new_title,
            message,
        } => {
            service
                .rename_topic(&course, &topic, &new_title, &author, &message)
                .await?;
        }
        Commands::UpdateTopic {
            course,
            topic,
            contents,
            message,
        } => {
            service
                .update_topic(&course, &topic, &contents, &author, &message)
                .await?;
        }
        Commands::UpdateDescription {
            course,
            contents,
            message,
        } => {
            service
                .update_description(&course, &contents, &author, &message)
                .await?;
        }
        Commands::DeleteTopic {
            course,
            topic,
            message,
        } => {
            service
                .delete_topic(&course, &topic, &author, &message)
                .await?;
        }
        Commands::Versions { course, depth } => {
            let depth = depth.unwrap_or(config.history_depth);
            print(&service.versions(&course, depth).await?)?;
        }
        Commands::Revert { course, commit } => {
            service.revert(&course, &commit).await?;
        }
    }
    Ok(())
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
