use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::classify::classify;
use crate::directive::{self, Selection};
use crate::error::Result;
use crate::state::ReviewDb;
use crate::{
    Chunk, ChunkId, MilestoneId, PoolSettings, ReviewMilestone, Role, Submission, SubmissionId,
    Task, TaskStatus, User, UserId,
};

/// Tasks grouped by chunk, each list in creation order.
pub type ChunkTasks = BTreeMap<ChunkId, Vec<Task>>;

/// Reviewer pool a roster entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Pool {
    Students,
    Alums,
    Staff,
}

impl Pool {
    fn expected_role(self) -> Role {
        match self {
            Pool::Students => Role::Student,
            Pool::Alums => Role::Volunteer,
            Pool::Staff => Role::Teacher,
        }
    }
}

/// Parameters of one routing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRequest {
    pub settings: PoolSettings,
    /// Selected row names from the classification (merged rows allowed).
    pub checked: Vec<String>,
    /// Defaults to the milestone id.
    pub seed: Option<u64>,
    /// Milestone version the request was built from. A commit fails with
    /// `ConcurrentUpdate` if the milestone has changed since. `None` uses the version
    /// read at commit time.
    pub expected_version: Option<i64>,
}

/// A reviewer eligible for this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reviewer {
    pub user_id: UserId,
    pub username: String,
    pub pool: Pool,
    /// Target task count; exceeded only when nobody else can take a chunk.
    pub capacity: u32,
    pub assigned: u32,
}

/// Outcome of routing: the full chunk -> tasks mapping and the tasks it adds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoutingPlan {
    pub assignments: ChunkTasks,
    pub new_tasks: Vec<Task>,
    pub selection: Selection,
    pub directive: String,
}

/// Split a free-text roster on commas and whitespace, dropping repeats.
pub fn parse_roster(roster: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    roster
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(*name))
        .map(str::to_owned)
        .collect()
}

/// Resolve the three rosters to semester members.
///
/// Unknown usernames and non-members are dropped with a warning. A user listed in
/// more than one roster stays in the first.
pub fn build_reviewers(
    settings: &PoolSettings,
    users: &[User],
    members: &HashMap<UserId, Role>,
) -> Vec<Reviewer> {
    let by_name: HashMap<&str, &User> = users.iter().map(|u| (u.username.as_str(), u)).collect();
    let pools = [
        (Pool::Students, &settings.students, settings.student_count),
        (Pool::Alums, &settings.alums, settings.alum_count),
        (Pool::Staff, &settings.staff, settings.staff_count),
    ];

    let mut seen = HashSet::new();
    let mut reviewers = Vec::new();
    for (pool, roster, capacity) in pools {
        for username in parse_roster(roster) {
            let Some(user) = by_name.get(username.as_str()) else {
                tracing::warn!(username = %username, ?pool, "roster entry is not a known user");
                continue;
            };
            let Some(role) = members.get(&user.id) else {
                tracing::warn!(username = %username, ?pool, "roster entry is not a member of the semester");
                continue;
            };
            if *role != pool.expected_role() {
                tracing::debug!(username = %username, ?pool, ?role, "roster entry role differs from pool");
            }
            if !seen.insert(user.id) {
                continue;
            }
            reviewers.push(Reviewer {
                user_id: user.id,
                username,
                pool,
                capacity,
                assigned: 0,
            });
        }
    }
    reviewers
}

/// Stable pseudo-random key for ordering decisions.
fn seeded_key(seed: u64, a: i64, b: i64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(a.to_le_bytes());
    hasher.update(b.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Everything routing reads, fetched up front.
pub struct RoutingInput<'a> {
    pub milestone_id: MilestoneId,
    pub chunks: &'a [Chunk],
    pub submissions: &'a [Submission],
    pub existing: &'a [Task],
    pub reviewers: Vec<Reviewer>,
    pub selected_names: &'a HashSet<String>,
    pub reviewers_per_chunk: u32,
    pub min_student_lines: u32,
    pub seed: u64,
}

/// Assign reviewers to selected chunks without touching storage.
///
/// Chunks are visited in a seeded order. Each gets reviewers until it has
/// `reviewers_per_chunk` live (not dropped) tasks. Authors of the chunk and anyone
/// already on it are never picked. Among the rest, reviewers under capacity come
/// first, then the least loaded, ties broken by the seed.
pub fn plan(input: RoutingInput<'_>) -> (ChunkTasks, Vec<Task>) {
    let RoutingInput {
        milestone_id,
        chunks,
        submissions,
        existing,
        mut reviewers,
        selected_names,
        reviewers_per_chunk,
        min_student_lines,
        seed,
    } = input;

    let authors: HashMap<SubmissionId, &[UserId]> = submissions
        .iter()
        .map(|s| (s.id, s.authors.as_slice()))
        .collect();

    let mut assignments = group_by_chunk(existing.to_vec());
    let index: HashMap<UserId, usize> = reviewers
        .iter()
        .enumerate()
        .map(|(i, r)| (r.user_id, i))
        .collect();
    for task in existing {
        if task.status.is_open()
            && let Some(&i) = index.get(&task.reviewer_id)
        {
            reviewers[i].assigned += 1;
        }
    }

    let mut eligible: Vec<&Chunk> = chunks
        .iter()
        .filter(|c| c.name.as_ref().is_some_and(|n| selected_names.contains(n)))
        .filter(|c| c.student_lines >= min_student_lines)
        .collect();
    eligible.sort_by_key(|c| (seeded_key(seed, c.id, 0), c.id));

    let mut new_tasks = Vec::new();
    for chunk in eligible {
        let current = assignments.entry(chunk.id).or_default();
        let live = current
            .iter()
            .filter(|t| t.status != TaskStatus::Unavailable)
            .count() as u32;
        let needed = reviewers_per_chunk.saturating_sub(live) as usize;
        if needed == 0 {
            continue;
        }

        let on_chunk: HashSet<UserId> = current.iter().map(|t| t.reviewer_id).collect();
        let chunk_authors = authors.get(&chunk.submission_id).copied().unwrap_or(&[]);

        let mut candidates: Vec<usize> = (0..reviewers.len())
            .filter(|&i| {
                let id = reviewers[i].user_id;
                !on_chunk.contains(&id) && !chunk_authors.contains(&id)
            })
            .collect();
        candidates.sort_by_key(|&i| {
            let r = &reviewers[i];
            (
                r.assigned >= r.capacity,
                r.assigned,
                seeded_key(seed, chunk.id, r.user_id),
            )
        });

        if candidates.len() < needed {
            tracing::warn!(
                chunk_id = chunk.id,
                needed,
                available = candidates.len(),
                "not enough eligible reviewers"
            );
        }

        for &i in candidates.iter().take(needed) {
            reviewers[i].assigned += 1;
            let task = Task::new(chunk.id, reviewers[i].user_id, milestone_id);
            current.push(task.clone());
            new_tasks.push(task);
        }
    }

    assignments.retain(|_, tasks| !tasks.is_empty());
    tracing::debug!(
        new_tasks = new_tasks.len(),
        chunks = assignments.len(),
        "planned routing"
    );
    (assignments, new_tasks)
}

/// Group tasks by chunk, keeping input order within each chunk.
pub fn group_by_chunk(tasks: Vec<Task>) -> ChunkTasks {
    let mut grouped = ChunkTasks::new();
    for task in tasks {
        grouped.entry(task.chunk_id).or_default().push(task);
    }
    grouped
}

/// Current assignments of a review milestone, read from stored tasks.
pub fn preview_routing(db: &ReviewDb, milestone_id: MilestoneId) -> Result<ChunkTasks> {
    db.review_milestone(milestone_id)?;
    Ok(group_by_chunk(db.milestone_tasks(milestone_id)?))
}

fn build_plan(
    db: &ReviewDb,
    milestone: &ReviewMilestone,
    request: &RoutingRequest,
) -> Result<RoutingPlan> {
    let chunks = db.milestone_chunks(milestone.submit_milestone_id)?;
    let submissions = db.milestone_submissions(milestone.submit_milestone_id)?;
    let existing = db.milestone_tasks(milestone.id)?;
    let users = db.users()?;
    let members = db.semester_members(milestone.semester_id)?;

    let classification = classify(&chunks);
    let ordering = classification.ordering();
    let selection =
        Selection::from_checked(&ordering, request.checked.iter().map(String::as_str));
    let directive = directive::encode(&selection)?;
    let selected_names = classification.selected_chunk_names(&selection);

    let (assignments, new_tasks) = plan(RoutingInput {
        milestone_id: milestone.id,
        chunks: &chunks,
        submissions: &submissions,
        existing: &existing,
        reviewers: build_reviewers(&request.settings, &users, &members),
        selected_names: &selected_names,
        reviewers_per_chunk: request.settings.reviewers_per_chunk,
        min_student_lines: request.settings.min_student_lines,
        seed: request.seed.unwrap_or(milestone.id as u64),
    });

    Ok(RoutingPlan {
        assignments,
        new_tasks,
        selection,
        directive,
    })
}

/// Plan a routing run without storing anything.
pub fn simulate_routing(
    db: &ReviewDb,
    milestone_id: MilestoneId,
    request: &RoutingRequest,
) -> Result<RoutingPlan> {
    let milestone = db.review_milestone(milestone_id)?;
    build_plan(db, &milestone, request)
}

/// Plan a routing run and store it.
///
/// The milestone settings, the directive and the new tasks are written in one
/// transaction guarded by the milestone version (`request.expected_version` when
/// set), so a commit that landed since the caller read the milestone makes this one
/// fail with nothing saved. Returns the stored assignments.
pub fn commit_routing(
    db: &mut ReviewDb,
    milestone_id: MilestoneId,
    request: &RoutingRequest,
) -> Result<ChunkTasks> {
    let milestone = db.review_milestone(milestone_id)?;
    let plan = build_plan(db, &milestone, request)?;

    let created = db.commit_assignment(
        milestone.id,
        request.expected_version.unwrap_or(milestone.version),
        &request.settings,
        &plan.directive,
        &plan.new_tasks,
    )?;
    tracing::info!(
        milestone_id,
        created,
        planned = plan.new_tasks.len(),
        "committed review routing"
    );

    preview_routing(db, milestone_id)
}
