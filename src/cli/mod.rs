use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::PoolSettings;

#[derive(Parser, Debug)]
#[command(name = "chunk-review", about = "Chunk classification and reviewer routing for code review milestones")]
pub struct Cli {
    /// Path to the review database.
    #[arg(long, env = "CHUNK_REVIEW_DB", default_value = "chunk-review.db", global = true)]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify a review milestone's chunks and show the stored selection.
    Classify { milestone: i64 },
    /// Show the tasks already assigned for a review milestone.
    Preview { milestone: i64 },
    /// Plan a routing run without saving it.
    Simulate {
        milestone: i64,
        #[command(flatten)]
        pool: PoolArgs,
    },
    /// Plan a routing run and save the tasks.
    Assign {
        milestone: i64,
        #[command(flatten)]
        pool: PoolArgs,
    },
    /// Per-user dashboard for a review milestone.
    Dashboard {
        milestone: i64,
        /// Aggregate over a simulated plan instead of the stored tasks.
        #[arg(long)]
        simulate: bool,
        #[command(flatten)]
        pool: PoolArgs,
    },
    /// Render a chunk with staff lines flagged, opening the viewer's task.
    Annotate(AnnotateArgs),
    /// Render every file of a submission split into chunk segments.
    Submission {
        submission: i64,
        /// Username to view as.
        #[arg(short, long)]
        user: String,
    },
    /// Find an author's submission to a submit milestone.
    FindSubmission {
        submit_milestone: i64,
        author: String,
        /// Username to look up as.
        #[arg(short, long)]
        user: String,
    },
    /// Publish (or with --unpublish, hide) a submission's code. Authors only.
    Publish {
        submission: i64,
        /// Username of the author.
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        unpublish: bool,
    },
    /// Comments from the chunk's subject available for reuse.
    SimilarComments {
        chunk: i64,
        /// Username to search as.
        #[arg(short, long)]
        user: String,
        /// Teachers only: every staff comment instead of your own.
        #[arg(long)]
        all_staff: bool,
    },
}

#[derive(Args, Debug)]
pub struct AnnotateArgs {
    pub chunk: i64,
    /// Username to view as.
    #[arg(short, long)]
    pub user: String,
    /// First chunk line to show (0-indexed).
    #[arg(long)]
    pub start: Option<usize>,
    /// One past the last chunk line to show.
    #[arg(long)]
    pub end: Option<usize>,
}

/// Routing parameters; anything omitted falls back to the milestone's stored settings.
#[derive(Args, Debug, Default)]
pub struct PoolArgs {
    /// Student reviewer usernames, comma or space separated.
    #[arg(long)]
    pub students: Option<String>,
    /// Alum reviewer usernames.
    #[arg(long)]
    pub alums: Option<String>,
    /// Staff reviewer usernames.
    #[arg(long)]
    pub staff: Option<String>,
    /// Tasks per student reviewer.
    #[arg(long)]
    pub student_tasks: Option<u32>,
    /// Tasks per alum reviewer.
    #[arg(long)]
    pub alum_tasks: Option<u32>,
    /// Tasks per staff reviewer.
    #[arg(long)]
    pub staff_tasks: Option<u32>,
    /// Reviewers wanted on each chunk.
    #[arg(long)]
    pub per_chunk: Option<u32>,
    /// Skip chunks with fewer student-written lines.
    #[arg(long)]
    pub min_lines: Option<u32>,
    /// Seed for the deterministic ordering.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Chunk name to route (repeatable); defaults to the stored selection.
    #[arg(long = "chunk")]
    pub chunks: Vec<String>,
}

impl PoolArgs {
    /// Overlay the given flags on stored settings.
    pub fn merge(&self, stored: &PoolSettings) -> PoolSettings {
        PoolSettings {
            students: self.students.clone().unwrap_or_else(|| stored.students.clone()),
            alums: self.alums.clone().unwrap_or_else(|| stored.alums.clone()),
            staff: self.staff.clone().unwrap_or_else(|| stored.staff.clone()),
            student_count: self.student_tasks.unwrap_or(stored.student_count),
            alum_count: self.alum_tasks.unwrap_or(stored.alum_count),
            staff_count: self.staff_tasks.unwrap_or(stored.staff_count),
            reviewers_per_chunk: self.per_chunk.unwrap_or(stored.reviewers_per_chunk),
            min_student_lines: self.min_lines.unwrap_or(stored.min_student_lines),
        }
    }
}

/// Parse CLI arguments.
pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_flags_keep_stored_settings() {
        let stored = PoolSettings {
            students: "ann bob".into(),
            student_count: 3,
            reviewers_per_chunk: 2,
            ..PoolSettings::default()
        };
        let args = PoolArgs {
            per_chunk: Some(4),
            alums: Some("cy".into()),
            ..PoolArgs::default()
        };

        let merged = args.merge(&stored);
        assert_eq!(merged.students, "ann bob");
        assert_eq!(merged.student_count, 3);
        assert_eq!(merged.alums, "cy");
        assert_eq!(merged.reviewers_per_chunk, 4);
    }

    #[test]
    fn parses_pool_flags() {
        let cli = Cli::try_parse_from([
            "chunk-review",
            "--db",
            "x.db",
            "simulate",
            "7",
            "--per-chunk",
            "2",
            "--chunk",
            "A",
            "--chunk",
            "B",
        ])
        .unwrap();
        assert_eq!(cli.db, PathBuf::from("x.db"));
        match cli.command {
            Commands::Simulate { milestone, pool } => {
                assert_eq!(milestone, 7);
                assert_eq!(pool.per_chunk, Some(2));
                assert_eq!(pool.chunks, vec!["A", "B"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
