pub mod access;
pub mod annotate;
pub mod classify;
pub mod cli;
pub mod dashboard;
pub mod directive;
pub mod error;
pub mod highlight;
pub mod routing;
pub mod state;
pub mod view;

use serde::Serialize;

pub use error::{CoreError, Result};

pub type UserId = i64;
pub type ChunkId = i64;
pub type SubmissionId = i64;
pub type MilestoneId = i64;

/// Staff-assigned category of a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ClassType {
    None,
    Test,
    Other(String),
}

impl ClassType {
    /// Parse the stored tag (`NONE`, `TEST`, anything else is kept verbatim).
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "NONE" => ClassType::None,
            "TEST" => ClassType::Test,
            other => ClassType::Other(other.to_owned()),
        }
    }

    pub fn as_tag(&self) -> &str {
        match self {
            ClassType::None => "NONE",
            ClassType::Test => "TEST",
            ClassType::Other(tag) => tag,
        }
    }
}

/// A line range `[start_line, end_line]` (inclusive, absolute file line numbers)
/// written by staff rather than the student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct StaffMarker {
    pub start_line: u32,
    pub end_line: u32,
}

impl StaffMarker {
    pub fn new(start_line: u32, end_line: u32) -> Self {
        Self {
            start_line,
            end_line,
        }
    }

    pub fn contains(&self, line: u32) -> bool {
        line >= self.start_line && line <= self.end_line
    }
}

/// A named, contiguous span of lines within a submitted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub name: Option<String>,
    pub file_id: i64,
    pub submission_id: SubmissionId,
    /// Half-open range of 1-indexed file line numbers, `start..end`.
    pub start: u32,
    pub end: u32,
    pub class_type: ClassType,
    pub student_lines: u32,
    /// Set when the chunk comes from staff-distributed starter code.
    pub staff_provided: bool,
}

/// Lifecycle of a review task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskStatus {
    New,
    Opened,
    Completed,
    Unavailable,
}

impl TaskStatus {
    /// Single-letter code used in storage.
    pub fn code(self) -> &'static str {
        match self {
            TaskStatus::New => "N",
            TaskStatus::Opened => "O",
            TaskStatus::Completed => "C",
            TaskStatus::Unavailable => "U",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "N" => Some(TaskStatus::New),
            "O" => Some(TaskStatus::Opened),
            "C" => Some(TaskStatus::Completed),
            "U" => Some(TaskStatus::Unavailable),
            _ => None,
        }
    }

    /// Completed and dropped tasks no longer count against a reviewer.
    pub fn is_open(self) -> bool {
        !matches!(self, TaskStatus::Completed | TaskStatus::Unavailable)
    }
}

/// Assignment of one reviewer to one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    /// `None` until persisted.
    pub id: Option<i64>,
    pub chunk_id: ChunkId,
    pub reviewer_id: UserId,
    pub milestone_id: MilestoneId,
    pub status: TaskStatus,
    pub completed: bool,
}

impl Task {
    pub fn new(chunk_id: ChunkId, reviewer_id: UserId, milestone_id: MilestoneId) -> Self {
        Self {
            id: None,
            chunk_id,
            reviewer_id,
            milestone_id,
            status: TaskStatus::New,
            completed: false,
        }
    }
}

/// Course membership role within a semester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Role {
    Student,
    Volunteer,
    Teacher,
}

impl Role {
    pub fn code(self) -> &'static str {
        match self {
            Role::Student => "S",
            Role::Volunteer => "V",
            Role::Teacher => "T",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "S" => Some(Role::Student),
            "V" => Some(Role::Volunteer),
            "T" => Some(Role::Teacher),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Site administrator, independent of course membership.
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub milestone_id: MilestoneId,
    pub authors: Vec<UserId>,
    pub name: String,
    /// Authors may publish their code for other course members to read.
    pub published: bool,
}

impl Submission {
    pub fn has_author(&self, user_id: UserId) -> bool {
        self.authors.contains(&user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommentKind {
    User,
    Static,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub id: i64,
    pub chunk_id: ChunkId,
    pub author_id: UserId,
    pub kind: CommentKind,
    pub text: String,
}

/// Reviewer-pool composition and routing targets stored on a review milestone.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PoolSettings {
    /// Free-text rosters of usernames.
    pub students: String,
    pub alums: String,
    pub staff: String,
    /// Target task count per reviewer in each pool.
    pub student_count: u32,
    pub alum_count: u32,
    pub staff_count: u32,
    pub reviewers_per_chunk: u32,
    pub min_student_lines: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewMilestone {
    pub id: MilestoneId,
    /// The submit milestone whose chunks are reviewed.
    pub submit_milestone_id: MilestoneId,
    pub semester_id: i64,
    pub settings: PoolSettings,
    /// Persisted `chunks_to_assign` directive string.
    pub chunks_to_assign: Option<String>,
    /// Bumped on every committed update.
    pub version: i64,
}
