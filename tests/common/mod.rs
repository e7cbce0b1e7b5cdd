#![allow(dead_code)]

use std::path::PathBuf;

use chunk_review::state::ReviewDb;
use chunk_review::{Chunk, ChunkId, ClassType, MilestoneId, Role, StaffMarker, UserId};
use tempfile::TempDir;

const SOURCE: &str = "public class Main {
    int count;
    // provided
    // provided
    void run() {
        count++;
    }
    void stop() {
        count--;
    }
}
";

/// One semester with four submissions: three copies of chunk `A` and one test chunk `B`.
pub struct Course {
    pub dir: TempDir,
    pub db_path: PathBuf,
    pub db: ReviewDb,
    pub semester: i64,
    pub submit_milestone: MilestoneId,
    pub review_milestone: MilestoneId,
    pub authors: Vec<UserId>,
    pub reviewers: Vec<UserId>,
    pub teacher: UserId,
    pub outsider: UserId,
    /// Chunks `A` with 50, 60 and 200 student lines, then `B`.
    pub chunks: Vec<ChunkId>,
    pub submissions: Vec<i64>,
}

pub fn course() -> Course {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("review.db");
    let mut db = ReviewDb::open(&db_path).unwrap();

    let semester = 1;
    let submit_milestone = db.add_submit_milestone(semester).unwrap();
    let review_milestone = db.add_review_milestone(submit_milestone, semester).unwrap();

    let add = |db: &mut ReviewDb, name: &str, role: Option<Role>| {
        let id = db.add_user(name, false).unwrap();
        if let Some(role) = role {
            db.add_member(id, semester, role).unwrap();
        }
        id
    };
    let authors: Vec<UserId> = (1..=4)
        .map(|i| add(&mut db, &format!("author{i}"), Some(Role::Student)))
        .collect();
    let reviewers: Vec<UserId> = (1..=5)
        .map(|i| add(&mut db, &format!("reviewer{i}"), Some(Role::Student)))
        .collect();
    let teacher = add(&mut db, "teacher", Some(Role::Teacher));
    let outsider = add(&mut db, "outsider", None);

    let specs = [
        ("A", 50, ClassType::None, true),
        ("A", 60, ClassType::None, false),
        ("A", 200, ClassType::None, false),
        ("B", 12, ClassType::Test, false),
    ];
    let mut chunks = Vec::new();
    let mut submissions = Vec::new();
    for (i, (name, student_lines, class_type, staff_provided)) in specs.into_iter().enumerate() {
        let submission = db
            .add_submission(submit_milestone, &format!("sub{i}"), &[authors[i]])
            .unwrap();
        let file_id = db.add_file(submission, "Main.java", SOURCE).unwrap();
        let chunk = db
            .add_chunk(&Chunk {
                id: 0,
                name: Some(name.to_string()),
                file_id,
                submission_id: submission,
                start: 1,
                end: 12,
                class_type,
                student_lines,
                staff_provided,
            })
            .unwrap();
        db.add_staff_marker(chunk, StaffMarker::new(3, 4)).unwrap();
        chunks.push(chunk);
        submissions.push(submission);
    }

    Course {
        dir,
        db_path,
        db,
        semester,
        submit_milestone,
        review_milestone,
        authors,
        reviewers,
        teacher,
        outsider,
        chunks,
        submissions,
    }
}

pub fn reviewer_roster() -> String {
    (1..=5).map(|i| format!("reviewer{i}")).collect::<Vec<_>>().join(",")
}
