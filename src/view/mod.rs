//! Chunk and file viewers: the consumers of the line annotator.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::ops::Range;

use crate::access::{Viewer, check_author_lookup, check_code_access};
use crate::annotate::{AnnotatedLine, Segment, render_annotated, segment_file};
use crate::error::{CoreError, Result};
use crate::highlight::Highlighter;
use crate::state::{CommentScope, ReviewDb};
use crate::{
    Chunk, ChunkId, MilestoneId, Role, Submission, SubmissionId, Task, TaskStatus, User, UserId,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkView {
    pub chunk: Chunk,
    pub path: String,
    pub lines: Vec<AnnotatedLine>,
    /// The viewer's task on this chunk, if any.
    pub task: Option<Task>,
    /// Open tasks the viewer still has after this one.
    pub remaining_tasks: usize,
}

/// A comment offered for reuse while reviewing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimilarComment {
    pub comment_id: i64,
    pub chunk_id: ChunkId,
    pub text: String,
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileView {
    pub path: String,
    pub segments: Vec<Segment>,
}

/// Render a chunk for `viewer_id`, marking their task as opened.
///
/// `range` is a 0-indexed window into the chunk's lines (used for comment snippets).
pub fn view_chunk(
    db: &mut ReviewDb,
    highlighter: &Highlighter,
    viewer_id: UserId,
    chunk_id: ChunkId,
    range: Option<Range<usize>>,
) -> Result<ChunkView> {
    let chunk = db.chunk(chunk_id)?;
    let submission = db.submission(chunk.submission_id)?;
    let semester_id = db.semester_of(submission.milestone_id)?;
    let user = db.user(viewer_id)?;
    let mut task = db.task_for(chunk_id, viewer_id)?;

    check_code_access(&Viewer {
        user: &user,
        role: db.member_role(viewer_id, semester_id)?,
        is_author: submission.has_author(viewer_id),
        is_reviewer: task.is_some(),
    })?;

    if let Some(task) = task.as_mut()
        && task.status == TaskStatus::New
        && let Some(id) = task.id
    {
        db.set_task_status(id, TaskStatus::Opened)?;
        task.status = TaskStatus::Opened;
    }

    let remaining_tasks = db
        .reviewer_tasks(viewer_id)?
        .iter()
        .filter(|t| t.status.is_open() && Some(t.chunk_id) != task.as_ref().map(|t| t.chunk_id))
        .count();

    let file = db.file(chunk.file_id)?;
    let numbers: Vec<u32> = file
        .numbered_lines(chunk.start, chunk.end)
        .into_iter()
        .map(|(number, _)| number)
        .collect();
    // Whole file, so constructs opened above the chunk still parse.
    let rendered: Vec<String> = highlighter
        .render_lines(&file.data, &file.path)
        .into_iter()
        .skip(chunk.start.saturating_sub(1) as usize)
        .take(numbers.len())
        .collect();
    let markers = db.chunk_markers(chunk_id)?;

    Ok(ChunkView {
        lines: render_annotated(&numbers, rendered, range, &markers),
        path: file.path,
        chunk,
        task,
        remaining_tasks,
    })
}

/// Render every file of a submission split into chunk and non-chunk segments.
pub fn view_submission(
    db: &ReviewDb,
    highlighter: &Highlighter,
    viewer_id: UserId,
    submission_id: SubmissionId,
) -> Result<Vec<FileView>> {
    let submission = db.submission(submission_id)?;
    let semester_id = db.semester_of(submission.milestone_id)?;
    let user = db.user(viewer_id)?;
    let files = db.submission_files(submission_id)?;
    let file_chunks = files
        .iter()
        .map(|file| db.file_chunks(file.id))
        .collect::<Result<Vec<_>>>()?;
    let reviewing: HashSet<ChunkId> = db
        .reviewer_tasks(viewer_id)?
        .into_iter()
        .map(|t| t.chunk_id)
        .collect();
    let is_reviewer = file_chunks
        .iter()
        .flatten()
        .any(|chunk| reviewing.contains(&chunk.id));

    check_code_access(&Viewer {
        user: &user,
        role: db.member_role(viewer_id, semester_id)?,
        is_author: submission.has_author(viewer_id),
        is_reviewer,
    })?;

    files
        .into_iter()
        .zip(file_chunks)
        .map(|(file, chunks)| {
            let numbered = file.numbered_lines(1, u32::MAX);
            let numbers: Vec<u32> = numbered.iter().map(|(number, _)| *number).collect();
            let rendered = highlighter.render_lines(&file.data, &file.path);
            let markers = db.file_markers(file.id)?;
            let lines = render_annotated(&numbers, rendered, None, &markers);
            Ok(FileView {
                segments: segment_file(&lines, &chunks),
                path: file.path,
            })
        })
        .collect()
}

/// Find `author`'s submission to a submit milestone on behalf of `viewer_id`.
pub fn find_submission_by_author(
    db: &ReviewDb,
    viewer_id: UserId,
    submit_milestone_id: MilestoneId,
    author: &str,
) -> Result<SubmissionId> {
    let semester_id = db.semester_of(submit_milestone_id)?;
    let user = db.user(viewer_id)?;
    let author = db.user_by_name(author)?;

    check_author_lookup(&Viewer {
        user: &user,
        role: db.member_role(viewer_id, semester_id)?,
        is_author: user.id == author.id,
        is_reviewer: false,
    })?;

    db.milestone_submissions(submit_milestone_id)?
        .into_iter()
        .find(|s| s.has_author(author.id))
        .map(|s| s.id)
        .ok_or_else(|| CoreError::not_found("submission", author.id))
}

/// Publish or unpublish a submission. Only its authors may.
pub fn publish_submission(
    db: &mut ReviewDb,
    viewer_id: UserId,
    submission_id: SubmissionId,
    published: bool,
) -> Result<Submission> {
    let submission = db.submission(submission_id)?;
    if !submission.has_author(viewer_id) {
        let user = db.user(viewer_id)?;
        return Err(CoreError::PermissionDenied(format!(
            "{} is not an author of submission {submission_id}",
            user.username
        )));
    }

    db.set_published(submission_id, published)?;
    tracing::info!(submission_id, published, "changed submission visibility");
    Ok(Submission {
        published,
        ..submission
    })
}

/// Comments from the chunk's subject that the viewer can reuse.
///
/// By default these are the viewer's own comments. With `all_staff`, teachers get
/// every comment written by their semester's teachers instead. Non-members, and
/// non-teachers asking for staff comments, get nothing.
pub fn similar_comments(
    db: &ReviewDb,
    viewer_id: UserId,
    chunk_id: ChunkId,
    all_staff: bool,
) -> Result<Vec<SimilarComment>> {
    let chunk = db.chunk(chunk_id)?;
    let submission = db.submission(chunk.submission_id)?;
    let semester_id = db.semester_of(submission.milestone_id)?;

    let scope = match db.member_role(viewer_id, semester_id)? {
        None => {
            tracing::debug!(viewer_id, semester_id, "comment search by non-member");
            return Ok(Vec::new());
        }
        Some(Role::Teacher) if all_staff => CommentScope::Staff,
        Some(_) if all_staff => return Ok(Vec::new()),
        Some(_) => CommentScope::Author(viewer_id),
    };

    let comments = db.subject_comments(semester_id, scope)?;
    let users: HashMap<UserId, User> =
        db.users()?.into_iter().map(|u| (u.id, u)).collect();
    Ok(comments
        .into_iter()
        .map(|comment| SimilarComment {
            author: users
                .get(&comment.author_id)
                .map(|u| u.username.clone())
                .unwrap_or_default(),
            comment_id: comment.id,
            chunk_id: comment.chunk_id,
            text: comment.text,
        })
        .collect())
}
