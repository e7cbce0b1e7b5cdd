use serde::Serialize;
use std::collections::HashMap;

use crate::error::Result;
use crate::routing::ChunkTasks;
use crate::state::ReviewDb;
use crate::{
    Chunk, ChunkId, Comment, MilestoneId, Role, Submission, SubmissionId, Task, TaskStatus, User,
    UserId,
};

/// One reviewer on a chunk's roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    pub username: String,
    /// Comments this reviewer left on the chunk.
    pub comment_count: usize,
    pub completed: bool,
}

/// Reviewers of a chunk split by their semester role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReviewerRoster {
    pub students: Vec<RosterEntry>,
    pub alums: Vec<RosterEntry>,
    pub staff: Vec<RosterEntry>,
    /// Reviewers without a membership, such as automated style checkers.
    pub other: Vec<RosterEntry>,
}

impl ReviewerRoster {
    fn push(&mut self, role: Option<Role>, entry: RosterEntry) {
        match role {
            Some(Role::Student) => self.students.push(entry),
            Some(Role::Volunteer) => self.alums.push(entry),
            Some(Role::Teacher) => self.staff.push(entry),
            None => self.other.push(entry),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub name: Option<String>,
    /// Tasks on the chunk that were not dropped.
    pub reviewer_count: usize,
    pub tasks: Vec<Task>,
    pub reviewers: ReviewerRoster,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub task: Task,
    pub chunk_name: Option<String>,
    pub authors: Vec<UserId>,
    pub reviewers: ReviewerRoster,
}

/// Everything the staff dashboard shows about one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub user: User,
    pub role: Option<Role>,
    pub submission: Option<Submission>,
    /// Chunks the user authored.
    pub chunks: Vec<ChunkRecord>,
    /// Tasks the user performs.
    pub tasks: Vec<TaskRecord>,
}

impl UserRecord {
    fn new(user: &User, role: Option<Role>) -> Self {
        Self {
            user: user.clone(),
            role,
            submission: None,
            chunks: Vec::new(),
            tasks: Vec::new(),
        }
    }
}

/// Bulk-fetched milestone data to join.
pub struct DashboardInput<'a> {
    pub users: &'a [User],
    pub members: &'a HashMap<UserId, Role>,
    pub submissions: &'a [Submission],
    pub chunks: &'a [Chunk],
    pub tasks: &'a [Task],
    pub comments: &'a [Comment],
}

/// Join users, submissions, chunks and tasks into per-user records.
///
/// A user appears if they authored a submission or review a task on one of the
/// milestone's chunks. Tasks on chunks outside the milestone are ignored. Records are
/// ordered students, alums, staff, non-members, then by username.
pub fn aggregate(input: DashboardInput<'_>) -> Vec<UserRecord> {
    let users: HashMap<UserId, &User> = input.users.iter().map(|u| (u.id, u)).collect();
    let authors: HashMap<SubmissionId, &Submission> =
        input.submissions.iter().map(|s| (s.id, s)).collect();
    let chunks: HashMap<ChunkId, &Chunk> = input.chunks.iter().map(|c| (c.id, c)).collect();

    let mut comment_counts: HashMap<(ChunkId, UserId), usize> = HashMap::new();
    for comment in input.comments {
        *comment_counts
            .entry((comment.chunk_id, comment.author_id))
            .or_default() += 1;
    }

    let mut tasks_by_chunk: HashMap<ChunkId, Vec<&Task>> = HashMap::new();
    for task in input.tasks {
        if chunks.contains_key(&task.chunk_id) {
            tasks_by_chunk.entry(task.chunk_id).or_default().push(task);
        }
    }

    let mut rosters: HashMap<ChunkId, ReviewerRoster> = HashMap::new();
    for (chunk_id, tasks) in &tasks_by_chunk {
        let roster = rosters.entry(*chunk_id).or_default();
        for task in tasks {
            let Some(reviewer) = users.get(&task.reviewer_id) else {
                continue;
            };
            roster.push(
                input.members.get(&task.reviewer_id).copied(),
                RosterEntry {
                    username: reviewer.username.clone(),
                    comment_count: comment_counts
                        .get(&(*chunk_id, task.reviewer_id))
                        .copied()
                        .unwrap_or(0),
                    completed: task.completed,
                },
            );
        }
    }

    let mut records: HashMap<UserId, UserRecord> = HashMap::new();
    let record_for = |records: &mut HashMap<UserId, UserRecord>, user_id: UserId| {
        let Some(user) = users.get(&user_id) else {
            tracing::warn!(user_id, "dashboard references an unknown user");
            return false;
        };
        records
            .entry(user_id)
            .or_insert_with(|| UserRecord::new(user, input.members.get(&user_id).copied()));
        true
    };

    for submission in input.submissions {
        for author in &submission.authors {
            if record_for(&mut records, *author)
                && let Some(record) = records.get_mut(author)
            {
                record.submission = Some(submission.clone());
            }
        }
    }

    for chunk in input.chunks {
        let Some(submission) = authors.get(&chunk.submission_id) else {
            continue;
        };
        let tasks: Vec<Task> = tasks_by_chunk
            .get(&chunk.id)
            .map(|tasks| tasks.iter().map(|t| (*t).clone()).collect())
            .unwrap_or_default();
        let chunk_record = ChunkRecord {
            id: chunk.id,
            name: chunk.name.clone(),
            reviewer_count: tasks
                .iter()
                .filter(|t| t.status != TaskStatus::Unavailable)
                .count(),
            tasks,
            reviewers: rosters.get(&chunk.id).cloned().unwrap_or_default(),
        };
        for author in &submission.authors {
            if let Some(record) = records.get_mut(author) {
                record.chunks.push(chunk_record.clone());
            }
        }
    }

    for task in input.tasks {
        let Some(chunk) = chunks.get(&task.chunk_id) else {
            continue;
        };
        if !record_for(&mut records, task.reviewer_id) {
            continue;
        }
        let chunk_authors = authors
            .get(&chunk.submission_id)
            .map(|s| s.authors.clone())
            .unwrap_or_default();
        if let Some(record) = records.get_mut(&task.reviewer_id) {
            record.tasks.push(TaskRecord {
                task: task.clone(),
                chunk_name: chunk.name.clone(),
                authors: chunk_authors,
                reviewers: rosters.get(&task.chunk_id).cloned().unwrap_or_default(),
            });
        }
    }

    let mut records: Vec<UserRecord> = records.into_values().collect();
    records.sort_by(|a, b| {
        (a.role.is_none(), a.role, &a.user.username).cmp(&(b.role.is_none(), b.role, &b.user.username))
    });
    records
}

/// Dashboard for a review milestone.
///
/// With `simulated` set, its tasks stand in for the stored ones so staff can inspect
/// a routing plan before committing it.
pub fn aggregate_dashboard(
    db: &ReviewDb,
    milestone_id: MilestoneId,
    simulated: Option<&ChunkTasks>,
) -> Result<Vec<UserRecord>> {
    let milestone = db.review_milestone(milestone_id)?;
    let users = db.users()?;
    let members = db.semester_members(milestone.semester_id)?;
    let submissions = db.milestone_submissions(milestone.submit_milestone_id)?;
    let chunks = db.milestone_chunks(milestone.submit_milestone_id)?;
    let comments = db.milestone_comments(milestone.submit_milestone_id)?;
    let tasks = match simulated {
        Some(plan) => plan.values().flatten().cloned().collect(),
        None => db.milestone_tasks(milestone_id)?,
    };

    Ok(aggregate(DashboardInput {
        users: &users,
        members: &members,
        submissions: &submissions,
        chunks: &chunks,
        tasks: &tasks,
        comments: &comments,
    }))
}
