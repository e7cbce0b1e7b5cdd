use anyhow::{Context, Result};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use chunk_review::classify::{Classification, classify};
use chunk_review::cli::{self, AnnotateArgs, Commands, PoolArgs};
use chunk_review::dashboard::aggregate_dashboard;
use chunk_review::directive::{self, Selection};
use chunk_review::highlight::Highlighter;
use chunk_review::routing::{RoutingRequest, commit_routing, preview_routing, simulate_routing};
use chunk_review::state::ReviewDb;
use chunk_review::view::{
    find_submission_by_author, publish_submission, similar_comments, view_chunk, view_submission,
};
use chunk_review::{MilestoneId, ReviewMilestone};

#[derive(Serialize)]
struct ClassifyOutput {
    classification: Classification,
    selection: Selection,
}

fn main() -> Result<()> {
    let args = cli::parse_args();

    // stdout carries the JSON output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut db = ReviewDb::open(&args.db)
        .with_context(|| format!("Failed to open review database {}", args.db.display()))?;

    match args.command {
        Commands::Classify { milestone } => {
            let milestone = db.review_milestone(milestone)?;
            let classification = classify(&db.milestone_chunks(milestone.submit_milestone_id)?);
            let selection =
                directive::resolve(milestone.chunks_to_assign.as_deref(), &classification);
            print_json(&ClassifyOutput {
                classification,
                selection,
            })?;
        }
        Commands::Preview { milestone } => {
            print_json(&preview_routing(&db, milestone)?)?;
        }
        Commands::Simulate { milestone, pool } => {
            let request = routing_request(&db, milestone, &pool)?;
            print_json(&simulate_routing(&db, milestone, &request)?)?;
        }
        Commands::Assign { milestone, pool } => {
            let request = routing_request(&db, milestone, &pool)?;
            let assignments = commit_routing(&mut db, milestone, &request)
                .context("Failed to save assignments")?;
            print_json(&assignments)?;
        }
        Commands::Dashboard {
            milestone,
            simulate,
            pool,
        } => {
            let records = if simulate {
                let request = routing_request(&db, milestone, &pool)?;
                let plan = simulate_routing(&db, milestone, &request)?;
                aggregate_dashboard(&db, milestone, Some(&plan.assignments))?
            } else {
                aggregate_dashboard(&db, milestone, None)?
            };
            print_json(&records)?;
        }
        Commands::Annotate(args) => handle_annotate(&mut db, &args)?,
        Commands::Submission { submission, user } => {
            let viewer = db.user_by_name(&user)?;
            let files = view_submission(&db, &Highlighter::new(), viewer.id, submission)?;
            print_json(&files)?;
        }
        Commands::FindSubmission {
            submit_milestone,
            author,
            user,
        } => {
            let viewer = db.user_by_name(&user)?;
            let id = find_submission_by_author(&db, viewer.id, submit_milestone, &author)?;
            println!("{id}");
        }
        Commands::Publish {
            submission,
            user,
            unpublish,
        } => {
            let viewer = db.user_by_name(&user)?;
            print_json(&publish_submission(&mut db, viewer.id, submission, !unpublish)?)?;
        }
        Commands::SimilarComments {
            chunk,
            user,
            all_staff,
        } => {
            let viewer = db.user_by_name(&user)?;
            print_json(&similar_comments(&db, viewer.id, chunk, all_staff)?)?;
        }
    }

    Ok(())
}

fn handle_annotate(db: &mut ReviewDb, args: &AnnotateArgs) -> Result<()> {
    let viewer = db.user_by_name(&args.user)?;
    let range = match (args.start, args.end) {
        (None, None) => None,
        (start, end) => Some(start.unwrap_or(0)..end.unwrap_or(usize::MAX)),
    };
    let view = view_chunk(db, &Highlighter::new(), viewer.id, args.chunk, range)?;
    print_json(&view)
}

/// Merge the flags with the milestone's stored settings and selection.
fn routing_request(db: &ReviewDb, milestone_id: MilestoneId, pool: &PoolArgs) -> Result<RoutingRequest> {
    let milestone: ReviewMilestone = db.review_milestone(milestone_id)?;
    let checked = if pool.chunks.is_empty() {
        let classification = classify(&db.milestone_chunks(milestone.submit_milestone_id)?);
        directive::resolve(milestone.chunks_to_assign.as_deref(), &classification)
            .selected_names()
            .map(str::to_owned)
            .collect()
    } else {
        pool.chunks.clone()
    };

    Ok(RoutingRequest {
        settings: pool.merge(&milestone.settings),
        checked,
        seed: pool.seed,
        expected_version: Some(milestone.version),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
