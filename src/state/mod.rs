use rusqlite::{Connection, OptionalExtension, Params, Row, params};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{CoreError, Result};
use crate::{
    Chunk, ChunkId, ClassType, Comment, CommentKind, MilestoneId, PoolSettings, ReviewMilestone,
    Role, StaffMarker, Submission, SubmissionId, Task, TaskStatus, User, UserId,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    is_admin INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS members (
    user_id INTEGER NOT NULL REFERENCES users(id),
    semester_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    UNIQUE(user_id, semester_id)
);
CREATE TABLE IF NOT EXISTS semesters (
    id INTEGER PRIMARY KEY,
    subject TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS submit_milestones (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    semester_id INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS review_milestones (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    submit_milestone_id INTEGER NOT NULL,
    semester_id INTEGER NOT NULL,
    students TEXT NOT NULL DEFAULT '',
    alums TEXT NOT NULL DEFAULT '',
    staff TEXT NOT NULL DEFAULT '',
    student_count INTEGER NOT NULL DEFAULT 0,
    alum_count INTEGER NOT NULL DEFAULT 0,
    staff_count INTEGER NOT NULL DEFAULT 0,
    reviewers_per_chunk INTEGER NOT NULL DEFAULT 0,
    min_student_lines INTEGER NOT NULL DEFAULT 0,
    chunks_to_assign TEXT,
    version INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS submissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    milestone_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    published INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS submission_authors (
    submission_id INTEGER NOT NULL REFERENCES submissions(id),
    user_id INTEGER NOT NULL REFERENCES users(id),
    UNIQUE(submission_id, user_id)
);
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    submission_id INTEGER NOT NULL REFERENCES submissions(id),
    path TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL REFERENCES files(id),
    name TEXT,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    class_type TEXT NOT NULL DEFAULT 'NONE',
    student_lines INTEGER NOT NULL DEFAULT 0,
    staff_provided INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS staff_markers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chunk_id INTEGER NOT NULL REFERENCES chunks(id),
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chunk_id INTEGER NOT NULL REFERENCES chunks(id),
    reviewer_id INTEGER NOT NULL REFERENCES users(id),
    milestone_id INTEGER NOT NULL REFERENCES review_milestones(id),
    status TEXT NOT NULL DEFAULT 'N',
    completed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(chunk_id, reviewer_id, milestone_id)
);
CREATE TABLE IF NOT EXISTS comments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chunk_id INTEGER NOT NULL REFERENCES chunks(id),
    author_id INTEGER NOT NULL REFERENCES users(id),
    kind TEXT NOT NULL DEFAULT 'U',
    text TEXT NOT NULL DEFAULT ''
);
";

const CHUNK_COLUMNS: &str = "c.id, c.name, c.file_id, f.submission_id, c.start_line, c.end_line,
     c.class_type, c.student_lines, c.staff_provided";

const COMMENT_COLUMNS: &str = "cm.id, cm.chunk_id, cm.author_id, cm.kind, cm.text";

const COMMENT_JOINS: &str = "comments cm JOIN chunks c ON c.id = cm.chunk_id
     JOIN files f ON f.id = c.file_id
     JOIN submissions s ON s.id = f.submission_id";

const TASK_COLUMNS: &str = "t.id, t.chunk_id, t.reviewer_id, t.milestone_id, t.status, t.completed";

/// A submitted source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub id: i64,
    pub submission_id: SubmissionId,
    pub path: String,
    pub data: String,
}

impl SourceFile {
    /// `(line number, text)` for the lines in `start..end`, 1-indexed.
    pub fn numbered_lines(&self, start: u32, end: u32) -> Vec<(u32, String)> {
        self.data
            .lines()
            .zip(1u32..)
            .filter(|(_, number)| *number >= start && *number < end)
            .map(|(text, number)| (number, text.to_owned()))
            .collect()
    }
}

/// Whose comments a subject-wide comment search returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentScope {
    Author(UserId),
    /// Comments by teachers of the asking semester.
    Staff,
}

/// SQLite-backed storage for milestones, submissions, chunks and review tasks.
///
/// Reads are bulk fetches per milestone; callers join the results in memory.
pub struct ReviewDb {
    conn: Connection,
}

impl ReviewDb {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Create a user and return its id.
    pub fn add_user(&mut self, username: &str, is_admin: bool) -> Result<UserId> {
        self.conn.execute(
            "INSERT INTO users (username, is_admin) VALUES (?1, ?2)",
            params![username, is_admin],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Add a user to a semester, replacing any earlier role.
    pub fn add_member(&mut self, user_id: UserId, semester_id: i64, role: Role) -> Result<()> {
        self.conn.execute(
            "INSERT INTO members (user_id, semester_id, role) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, semester_id) DO UPDATE SET role = ?3",
            params![user_id, semester_id, role.code()],
        )?;
        Ok(())
    }

    /// Name the subject a semester teaches; semesters of one subject share comments.
    pub fn set_semester_subject(&mut self, semester_id: i64, subject: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO semesters (id, subject) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET subject = ?2",
            params![semester_id, subject],
        )?;
        Ok(())
    }

    /// Create a submit milestone in a semester.
    pub fn add_submit_milestone(&mut self, semester_id: i64) -> Result<MilestoneId> {
        self.conn.execute(
            "INSERT INTO submit_milestones (semester_id) VALUES (?1)",
            params![semester_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Create a review milestone over a submit milestone's chunks.
    pub fn add_review_milestone(
        &mut self,
        submit_milestone_id: MilestoneId,
        semester_id: i64,
    ) -> Result<MilestoneId> {
        self.conn.execute(
            "INSERT INTO review_milestones (submit_milestone_id, semester_id) VALUES (?1, ?2)",
            params![submit_milestone_id, semester_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Create a submission with its authors.
    pub fn add_submission(
        &mut self,
        milestone_id: MilestoneId,
        name: &str,
        authors: &[UserId],
    ) -> Result<SubmissionId> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO submissions (milestone_id, name) VALUES (?1, ?2)",
            params![milestone_id, name],
        )?;
        let id = tx.last_insert_rowid();
        for author in authors {
            tx.execute(
                "INSERT OR IGNORE INTO submission_authors (submission_id, user_id) VALUES (?1, ?2)",
                params![id, author],
            )?;
        }
        tx.commit()?;
        Ok(id)
    }

    /// Store a submitted source file.
    pub fn add_file(&mut self, submission_id: SubmissionId, path: &str, data: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO files (submission_id, path, data) VALUES (?1, ?2, ?3)",
            params![submission_id, path, data],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Store a chunk; `chunk.id` and `chunk.submission_id` are ignored.
    pub fn add_chunk(&mut self, chunk: &Chunk) -> Result<ChunkId> {
        self.conn.execute(
            "INSERT INTO chunks (file_id, name, start_line, end_line, class_type, student_lines, staff_provided)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chunk.file_id,
                chunk.name,
                chunk.start,
                chunk.end,
                chunk.class_type.as_tag(),
                chunk.student_lines,
                chunk.staff_provided
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Flag a staff-written line range inside a chunk.
    pub fn add_staff_marker(&mut self, chunk_id: ChunkId, marker: StaffMarker) -> Result<()> {
        self.conn.execute(
            "INSERT INTO staff_markers (chunk_id, start_line, end_line) VALUES (?1, ?2, ?3)",
            params![chunk_id, marker.start_line, marker.end_line],
        )?;
        Ok(())
    }

    /// Record a comment left on a chunk.
    pub fn add_comment(
        &mut self,
        chunk_id: ChunkId,
        author_id: UserId,
        kind: CommentKind,
        text: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO comments (chunk_id, author_id, kind, text) VALUES (?1, ?2, ?3, ?4)",
            params![chunk_id, author_id, comment_kind_code(kind), text],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert a single task. A second task for the same (chunk, reviewer) pair in one
    /// review milestone is rejected.
    pub fn insert_task(&mut self, task: &Task) -> Result<i64> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO tasks (chunk_id, reviewer_id, milestone_id, status, completed)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                task.chunk_id,
                task.reviewer_id,
                task.milestone_id,
                task.status.code(),
                task.completed
            ],
        )?;
        if inserted == 0 {
            return Err(CoreError::DuplicateAssignment {
                chunk_id: task.chunk_id,
                reviewer_id: task.reviewer_id,
            });
        }
        Ok(self.conn.last_insert_rowid())
    }

    /// Load a review milestone with its stored settings and version.
    pub fn review_milestone(&self, id: MilestoneId) -> Result<ReviewMilestone> {
        self.conn
            .query_row(
                "SELECT id, submit_milestone_id, semester_id, students, alums, staff,
                        student_count, alum_count, staff_count, reviewers_per_chunk,
                        min_student_lines, chunks_to_assign, version
                 FROM review_milestones WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ReviewMilestone {
                        id: row.get(0)?,
                        submit_milestone_id: row.get(1)?,
                        semester_id: row.get(2)?,
                        settings: PoolSettings {
                            students: row.get(3)?,
                            alums: row.get(4)?,
                            staff: row.get(5)?,
                            student_count: row.get(6)?,
                            alum_count: row.get(7)?,
                            staff_count: row.get(8)?,
                            reviewers_per_chunk: row.get(9)?,
                            min_student_lines: row.get(10)?,
                        },
                        chunks_to_assign: row.get(11)?,
                        version: row.get(12)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| CoreError::not_found("review milestone", id))
    }

    /// Semester a submit milestone belongs to.
    pub fn semester_of(&self, submit_milestone_id: MilestoneId) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT semester_id FROM submit_milestones WHERE id = ?1",
                params![submit_milestone_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| CoreError::not_found("submit milestone", submit_milestone_id))
    }

    /// All users, ordered by id.
    pub fn users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, username, is_admin FROM users ORDER BY id")?;
        let users = stmt
            .query_map([], |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    is_admin: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Look up a user by id.
    pub fn user(&self, id: UserId) -> Result<User> {
        self.conn
            .query_row(
                "SELECT id, username, is_admin FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        is_admin: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| CoreError::not_found("user", id))
    }

    /// Look up a user by username.
    pub fn user_by_name(&self, username: &str) -> Result<User> {
        self.conn
            .query_row(
                "SELECT id, username, is_admin FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        is_admin: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| CoreError::NotFoundName {
                entity: "user",
                name: username.to_owned(),
            })
    }

    /// Role of a user in a semester, or `None` for non-members.
    pub fn member_role(&self, user_id: UserId, semester_id: i64) -> Result<Option<Role>> {
        let code: Option<String> = self
            .conn
            .query_row(
                "SELECT role FROM members WHERE user_id = ?1 AND semester_id = ?2",
                params![user_id, semester_id],
                |row| row.get(0),
            )
            .optional()?;
        code.map(|c| parse_role(&c)).transpose()
    }

    /// Every member of a semester with their role.
    pub fn semester_members(&self, semester_id: i64) -> Result<HashMap<UserId, Role>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id, role FROM members WHERE semester_id = ?1")?;
        let rows = stmt
            .query_map(params![semester_id], |row| {
                Ok((row.get::<_, UserId>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(user_id, code)| Ok((user_id, parse_role(&code)?)))
            .collect()
    }

    /// All submissions of a submit milestone with their authors.
    pub fn milestone_submissions(&self, milestone_id: MilestoneId) -> Result<Vec<Submission>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.milestone_id, s.name, s.published, a.user_id
             FROM submissions s LEFT JOIN submission_authors a ON a.submission_id = s.id
             WHERE s.milestone_id = ?1
             ORDER BY s.id, a.user_id",
        )?;
        let rows = stmt
            .query_map(params![milestone_id], |row| {
                Ok((
                    row.get::<_, SubmissionId>(0)?,
                    row.get::<_, MilestoneId>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, Option<UserId>>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut submissions: Vec<Submission> = Vec::new();
        for (id, milestone_id, name, published, author) in rows {
            if submissions.last().map(|s| s.id) != Some(id) {
                submissions.push(Submission {
                    id,
                    milestone_id,
                    authors: Vec::new(),
                    name,
                    published,
                });
            }
            if let Some(author) = author
                && let Some(submission) = submissions.last_mut()
            {
                submission.authors.push(author);
            }
        }
        Ok(submissions)
    }

    /// Look up a submission with its authors.
    pub fn submission(&self, id: SubmissionId) -> Result<Submission> {
        let milestone_id: MilestoneId = self
            .conn
            .query_row(
                "SELECT milestone_id FROM submissions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| CoreError::not_found("submission", id))?;
        self.milestone_submissions(milestone_id)?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| CoreError::not_found("submission", id))
    }

    /// Submissions the user is an author of, across milestones.
    pub fn authored_submissions(&self, user_id: UserId) -> Result<Vec<Submission>> {
        let mut stmt = self.conn.prepare(
            "SELECT submission_id FROM submission_authors WHERE user_id = ?1 ORDER BY submission_id",
        )?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get::<_, SubmissionId>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        ids.into_iter().map(|id| self.submission(id)).collect()
    }

    /// Publish or unpublish a submission's code.
    pub fn set_published(&mut self, submission_id: SubmissionId, published: bool) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE submissions SET published = ?1 WHERE id = ?2",
            params![published, submission_id],
        )?;
        if updated == 0 {
            return Err(CoreError::not_found("submission", submission_id));
        }
        Ok(())
    }

    /// All chunks of a submit milestone, in storage order.
    pub fn milestone_chunks(&self, milestone_id: MilestoneId) -> Result<Vec<Chunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS}
             FROM chunks c JOIN files f ON f.id = c.file_id
             JOIN submissions s ON s.id = f.submission_id
             WHERE s.milestone_id = ?1
             ORDER BY c.id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![milestone_id], read_chunk)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Look up a chunk by id.
    pub fn chunk(&self, id: ChunkId) -> Result<Chunk> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks c JOIN files f ON f.id = c.file_id WHERE c.id = ?1"
        );
        self.conn
            .query_row(&sql, params![id], read_chunk)
            .optional()?
            .ok_or_else(|| CoreError::not_found("chunk", id))
    }

    /// Chunks of a file, ordered by first line.
    pub fn file_chunks(&self, file_id: i64) -> Result<Vec<Chunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks c JOIN files f ON f.id = c.file_id
             WHERE c.file_id = ?1 ORDER BY c.start_line"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![file_id], read_chunk)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Look up a source file by id.
    pub fn file(&self, id: i64) -> Result<SourceFile> {
        self.conn
            .query_row(
                "SELECT id, submission_id, path, data FROM files WHERE id = ?1",
                params![id],
                |row| {
                    Ok(SourceFile {
                        id: row.get(0)?,
                        submission_id: row.get(1)?,
                        path: row.get(2)?,
                        data: row.get(3)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| CoreError::not_found("file", id))
    }

    /// Files of a submission, ordered by path.
    pub fn submission_files(&self, submission_id: SubmissionId) -> Result<Vec<SourceFile>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, submission_id, path, data FROM files WHERE submission_id = ?1 ORDER BY path",
        )?;
        let files = stmt
            .query_map(params![submission_id], |row| {
                Ok(SourceFile {
                    id: row.get(0)?,
                    submission_id: row.get(1)?,
                    path: row.get(2)?,
                    data: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(files)
    }

    /// Staff markers of a chunk, sorted by `(start_line, end_line)`.
    pub fn chunk_markers(&self, chunk_id: ChunkId) -> Result<Vec<StaffMarker>> {
        self.markers_where("chunk_id = ?1", chunk_id)
    }

    /// Staff markers of every chunk in a file, sorted by `(start_line, end_line)`.
    pub fn file_markers(&self, file_id: i64) -> Result<Vec<StaffMarker>> {
        self.markers_where(
            "chunk_id IN (SELECT id FROM chunks WHERE file_id = ?1)",
            file_id,
        )
    }

    fn markers_where(&self, clause: &str, id: i64) -> Result<Vec<StaffMarker>> {
        let sql = format!(
            "SELECT start_line, end_line FROM staff_markers WHERE {clause}
             ORDER BY start_line, end_line"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let markers = stmt
            .query_map(params![id], |row| {
                Ok(StaffMarker::new(row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(markers)
    }

    /// All tasks of a review milestone, ordered by creation.
    pub fn milestone_tasks(&self, milestone_id: MilestoneId) -> Result<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks t WHERE t.milestone_id = ?1 ORDER BY t.id");
        self.tasks_query(&sql, params![milestone_id])
    }

    /// All tasks assigned to a reviewer, ordered by creation.
    pub fn reviewer_tasks(&self, reviewer_id: UserId) -> Result<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks t WHERE t.reviewer_id = ?1 ORDER BY t.id");
        self.tasks_query(&sql, params![reviewer_id])
    }

    fn tasks_query<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, ChunkId>(1)?,
                    row.get::<_, UserId>(2)?,
                    row.get::<_, MilestoneId>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, bool>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(id, chunk_id, reviewer_id, milestone_id, status, completed)| {
                    Ok(Task {
                        id: Some(id),
                        chunk_id,
                        reviewer_id,
                        milestone_id,
                        status: parse_task_status(&status)?,
                        completed,
                    })
                },
            )
            .collect()
    }

    /// The reviewer's most recent task on a chunk, if any.
    pub fn task_for(&self, chunk_id: ChunkId, reviewer_id: UserId) -> Result<Option<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks t WHERE t.chunk_id = ?1 AND t.reviewer_id = ?2
             ORDER BY t.id DESC"
        );
        Ok(self
            .tasks_query(&sql, params![chunk_id, reviewer_id])?
            .into_iter()
            .next())
    }

    /// Set a task's status; `completed` follows `Completed`.
    pub fn set_task_status(&mut self, task_id: i64, status: TaskStatus) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE tasks SET status = ?1, completed = ?2 WHERE id = ?3",
            params![status.code(), status == TaskStatus::Completed, task_id],
        )?;
        if updated == 0 {
            return Err(CoreError::not_found("task", task_id));
        }
        Ok(())
    }

    /// Comments on chunks of a submit milestone.
    pub fn milestone_comments(&self, milestone_id: MilestoneId) -> Result<Vec<Comment>> {
        let sql = format!(
            "SELECT {COMMENT_COLUMNS} FROM {COMMENT_JOINS}
             WHERE s.milestone_id = ?1
             ORDER BY cm.id"
        );
        self.comments_query(&sql, params![milestone_id])
    }

    /// Comments anywhere in the subject of `semester_id` (every semester sharing its
    /// subject, or just that semester when it has none), filtered by `scope`.
    pub fn subject_comments(&self, semester_id: i64, scope: CommentScope) -> Result<Vec<Comment>> {
        let in_subject = "JOIN submit_milestones m ON m.id = s.milestone_id
             WHERE (m.semester_id = ?1 OR m.semester_id IN (
                 SELECT id FROM semesters
                 WHERE subject = (SELECT subject FROM semesters WHERE id = ?1)))";
        match scope {
            CommentScope::Author(author_id) => {
                let sql = format!(
                    "SELECT {COMMENT_COLUMNS} FROM {COMMENT_JOINS} {in_subject}
                     AND cm.author_id = ?2 ORDER BY cm.id"
                );
                self.comments_query(&sql, params![semester_id, author_id])
            }
            CommentScope::Staff => {
                let sql = format!(
                    "SELECT {COMMENT_COLUMNS} FROM {COMMENT_JOINS} {in_subject}
                     AND cm.author_id IN (
                         SELECT user_id FROM members WHERE semester_id = ?1 AND role = ?2)
                     ORDER BY cm.id"
                );
                self.comments_query(&sql, params![semester_id, Role::Teacher.code()])
            }
        }
    }

    fn comments_query<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, ChunkId>(1)?,
                    row.get::<_, UserId>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, chunk_id, author_id, kind, text)| {
                Ok(Comment {
                    id,
                    chunk_id,
                    author_id,
                    kind: parse_comment_kind(&kind)?,
                    text,
                })
            })
            .collect()
    }

    /// Store routing settings, the directive and new tasks as one transaction.
    ///
    /// The update only applies if the milestone is still at `expected_version`.
    /// Tasks for a (chunk, reviewer) pair already assigned in this milestone are skipped.
    /// Returns the number of tasks created.
    pub fn commit_assignment(
        &mut self,
        milestone_id: MilestoneId,
        expected_version: i64,
        settings: &PoolSettings,
        directive: &str,
        tasks: &[Task],
    ) -> Result<usize> {
        let tx = self.conn.transaction()?;

        let updated = tx.execute(
            "UPDATE review_milestones
             SET students = ?1, alums = ?2, staff = ?3,
                 student_count = ?4, alum_count = ?5, staff_count = ?6,
                 reviewers_per_chunk = ?7, min_student_lines = ?8,
                 chunks_to_assign = ?9, version = version + 1
             WHERE id = ?10 AND version = ?11",
            params![
                settings.students,
                settings.alums,
                settings.staff,
                settings.student_count,
                settings.alum_count,
                settings.staff_count,
                settings.reviewers_per_chunk,
                settings.min_student_lines,
                directive,
                milestone_id,
                expected_version
            ],
        )?;
        if updated == 0 {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT id FROM review_milestones WHERE id = ?1",
                    params![milestone_id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match exists {
                Some(_) => CoreError::ConcurrentUpdate { milestone_id },
                None => CoreError::not_found("review milestone", milestone_id),
            });
        }

        let mut created = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO tasks (chunk_id, reviewer_id, milestone_id, status, completed)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for task in tasks {
                let inserted = stmt.execute(params![
                    task.chunk_id,
                    task.reviewer_id,
                    milestone_id,
                    task.status.code(),
                    task.completed
                ])?;
                if inserted == 0 {
                    let err = CoreError::DuplicateAssignment {
                        chunk_id: task.chunk_id,
                        reviewer_id: task.reviewer_id,
                    };
                    tracing::warn!(error = %err, "skipping duplicate task");
                } else {
                    created += 1;
                }
            }
        }

        tx.commit()?;
        Ok(created)
    }
}

fn read_chunk(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    let class_type: String = row.get(6)?;
    Ok(Chunk {
        id: row.get(0)?,
        name: row.get(1)?,
        file_id: row.get(2)?,
        submission_id: row.get(3)?,
        start: row.get(4)?,
        end: row.get(5)?,
        class_type: ClassType::from_tag(&class_type),
        student_lines: row.get(7)?,
        staff_provided: row.get(8)?,
    })
}

fn parse_role(code: &str) -> Result<Role> {
    Role::from_code(code).ok_or_else(|| CoreError::InvalidValue(format!("member role {code:?}")))
}

fn parse_task_status(code: &str) -> Result<TaskStatus> {
    TaskStatus::from_code(code)
        .ok_or_else(|| CoreError::InvalidValue(format!("task status {code:?}")))
}

fn comment_kind_code(kind: CommentKind) -> &'static str {
    match kind {
        CommentKind::User => "U",
        CommentKind::Static => "S",
    }
}

fn parse_comment_kind(code: &str) -> Result<CommentKind> {
    match code {
        "U" => Ok(CommentKind::User),
        "S" => Ok(CommentKind::Static),
        other => Err(CoreError::InvalidValue(format!("comment kind {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_db() -> (tempfile::TempDir, ReviewDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = ReviewDb::open(&dir.path().join("review.db")).unwrap();
        (dir, db)
    }

    fn chunk(file_id: i64, name: &str) -> Chunk {
        Chunk {
            id: 0,
            name: Some(name.to_string()),
            file_id,
            submission_id: 0,
            start: 1,
            end: 3,
            class_type: ClassType::Test,
            student_lines: 12,
            staff_provided: true,
        }
    }

    #[test]
    fn open_creates_tables() {
        let (_dir, db) = open_db();
        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn missing_milestone_is_not_found() {
        let (_dir, db) = open_db();
        let err = db.review_milestone(99).unwrap_err();
        assert!(matches!(
            err,
            CoreError::NotFound {
                entity: "review milestone",
                id: 99
            }
        ));
    }

    #[test]
    fn chunk_round_trips_with_submission() {
        let (_dir, mut db) = open_db();
        let alice = db.add_user("alice", false).unwrap();
        let sub = db.add_submission(7, "alice", &[alice]).unwrap();
        let file = db.add_file(sub, "A.java", "a\nb\nc\n").unwrap();
        let id = db.add_chunk(&chunk(file, "A")).unwrap();

        let stored = db.chunk(id).unwrap();
        assert_eq!(stored.submission_id, sub);
        assert_eq!(stored.class_type, ClassType::Test);
        assert!(stored.staff_provided);
        assert_eq!(db.milestone_chunks(7).unwrap(), vec![stored]);
    }

    #[test]
    fn submissions_collect_all_authors() {
        let (_dir, mut db) = open_db();
        let a = db.add_user("a", false).unwrap();
        let b = db.add_user("b", false).unwrap();
        db.add_submission(1, "pair", &[a, b]).unwrap();
        db.add_submission(1, "nobody", &[]).unwrap();

        let subs = db.milestone_submissions(1).unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].authors, vec![a, b]);
        assert!(subs[1].authors.is_empty());
    }

    #[test]
    fn markers_are_sorted() {
        let (_dir, mut db) = open_db();
        let sub = db.add_submission(1, "s", &[]).unwrap();
        let file = db.add_file(sub, "A.java", "").unwrap();
        let id = db.add_chunk(&chunk(file, "A")).unwrap();
        db.add_staff_marker(id, StaffMarker::new(9, 10)).unwrap();
        db.add_staff_marker(id, StaffMarker::new(2, 4)).unwrap();

        assert_eq!(
            db.chunk_markers(id).unwrap(),
            vec![StaffMarker::new(2, 4), StaffMarker::new(9, 10)]
        );
        assert_eq!(db.file_markers(file).unwrap().len(), 2);
    }

    #[test]
    fn duplicate_task_is_rejected() {
        let (_dir, mut db) = open_db();
        let task = Task::new(1, 2, 3);
        db.insert_task(&task).unwrap();
        let err = db.insert_task(&task).unwrap_err();
        assert!(matches!(
            err,
            CoreError::DuplicateAssignment {
                chunk_id: 1,
                reviewer_id: 2
            }
        ));
    }

    #[test]
    fn same_pair_may_repeat_across_milestones() {
        let (_dir, mut db) = open_db();
        db.insert_task(&Task::new(1, 2, 3)).unwrap();
        db.insert_task(&Task::new(1, 2, 4)).unwrap();
        assert_eq!(db.task_for(1, 2).unwrap().unwrap().milestone_id, 4);
    }

    #[test]
    fn commit_checks_version() {
        let (_dir, mut db) = open_db();
        let id = db.add_review_milestone(1, 1).unwrap();
        let settings = PoolSettings::default();

        db.commit_assignment(id, 0, &settings, "A 1,", &[]).unwrap();
        let err = db
            .commit_assignment(id, 0, &settings, "A 0,", &[Task::new(1, 1, id)])
            .unwrap_err();
        assert!(matches!(err, CoreError::ConcurrentUpdate { .. }));

        let milestone = db.review_milestone(id).unwrap();
        assert_eq!(milestone.version, 1);
        assert_eq!(milestone.chunks_to_assign.as_deref(), Some("A 1,"));
        assert!(db.milestone_tasks(id).unwrap().is_empty());
    }

    #[test]
    fn commit_skips_duplicates() {
        let (_dir, mut db) = open_db();
        let id = db.add_review_milestone(1, 1).unwrap();
        db.insert_task(&Task::new(5, 6, id)).unwrap();

        let tasks = [Task::new(5, 6, id), Task::new(5, 7, id)];
        let created = db
            .commit_assignment(id, 0, &PoolSettings::default(), "", &tasks)
            .unwrap();
        assert_eq!(created, 1);
        assert_eq!(db.milestone_tasks(id).unwrap().len(), 2);
    }

    #[test]
    fn task_status_updates_completion() {
        let (_dir, mut db) = open_db();
        let id = db.insert_task(&Task::new(1, 2, 3)).unwrap();
        db.set_task_status(id, TaskStatus::Completed).unwrap();

        let task = db.task_for(1, 2).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed);
        assert!(db.task_for(1, 9).unwrap().is_none());
    }

    #[test]
    fn publish_flag_round_trips() {
        let (_dir, mut db) = open_db();
        let a = db.add_user("a", false).unwrap();
        let sub = db.add_submission(1, "a", &[a]).unwrap();
        assert!(!db.submission(sub).unwrap().published);

        db.set_published(sub, true).unwrap();
        assert!(db.submission(sub).unwrap().published);
        assert_eq!(db.authored_submissions(a).unwrap().len(), 1);
        assert!(matches!(
            db.set_published(99, true),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn subject_comments_span_semesters_of_one_subject() {
        let (_dir, mut db) = open_db();
        let staff = db.add_user("staff", false).unwrap();
        let student = db.add_user("student", false).unwrap();
        db.add_member(staff, 1, Role::Teacher).unwrap();
        db.add_member(student, 1, Role::Student).unwrap();
        db.set_semester_subject(1, "6.005").unwrap();
        db.set_semester_subject(2, "6.005").unwrap();
        db.set_semester_subject(3, "6.170").unwrap();

        let chunk_in = |db: &mut ReviewDb, semester: i64| {
            let milestone = db.add_submit_milestone(semester).unwrap();
            let sub = db.add_submission(milestone, "s", &[]).unwrap();
            let file = db.add_file(sub, "A.java", "").unwrap();
            db.add_chunk(&chunk(file, "A")).unwrap()
        };
        let this_term = chunk_in(&mut db, 1);
        let last_term = chunk_in(&mut db, 2);
        let other_subject = chunk_in(&mut db, 3);

        for chunk in [this_term, last_term, other_subject] {
            db.add_comment(chunk, staff, CommentKind::User, "staff").unwrap();
            db.add_comment(chunk, student, CommentKind::User, "mine").unwrap();
        }

        let own = db.subject_comments(1, CommentScope::Author(student)).unwrap();
        assert_eq!(own.len(), 2);
        assert!(own.iter().all(|c| c.text == "mine" && c.chunk_id != other_subject));

        let staff_comments = db.subject_comments(1, CommentScope::Staff).unwrap();
        let chunks: Vec<ChunkId> = staff_comments.iter().map(|c| c.chunk_id).collect();
        assert_eq!(chunks, vec![this_term, last_term]);
    }

    #[test]
    fn numbered_lines_are_one_indexed() {
        let file = SourceFile {
            id: 1,
            submission_id: 1,
            path: "A.java".into(),
            data: "a\nb\nc\nd".into(),
        };
        assert_eq!(
            file.numbered_lines(2, 4),
            vec![(2, "b".to_string()), (3, "c".to_string())]
        );
    }
}
