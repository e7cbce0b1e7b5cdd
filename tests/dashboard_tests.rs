mod common;

use chunk_review::dashboard::aggregate_dashboard;
use chunk_review::routing::{RoutingRequest, commit_routing, simulate_routing};
use chunk_review::{CommentKind, PoolSettings, Role, TaskStatus};

fn request() -> RoutingRequest {
    RoutingRequest {
        settings: PoolSettings {
            students: common::reviewer_roster(),
            staff: "teacher".into(),
            student_count: 1,
            staff_count: 1,
            reviewers_per_chunk: 2,
            ..PoolSettings::default()
        },
        checked: vec!["A".into()],
        seed: None,
        expected_version: None,
    }
}

#[test]
fn dashboard_lists_authors_and_reviewers_in_role_order() {
    let mut course = common::course();
    commit_routing(&mut course.db, course.review_milestone, &request()).unwrap();

    let records = aggregate_dashboard(&course.db, course.review_milestone, None).unwrap();
    let names: Vec<&str> = records.iter().map(|r| r.user.username.as_str()).collect();
    let mut sorted = names.clone();
    sorted.sort_by_key(|name| (*name == "teacher", *name));
    assert_eq!(names, sorted);
    assert!(names.contains(&"author1"));

    let author = records.iter().find(|r| r.user.username == "author1").unwrap();
    assert_eq!(author.role, Some(Role::Student));
    assert_eq!(author.chunks.len(), 1);
    assert_eq!(author.chunks[0].reviewer_count, 2);

    let assigned: usize = records.iter().map(|r| r.tasks.len()).sum();
    assert_eq!(assigned, 6);
}

#[test]
fn rosters_split_by_role_and_count_comments() {
    let mut course = common::course();
    let assignments = commit_routing(&mut course.db, course.review_milestone, &request()).unwrap();
    let chunk = course.chunks[0];
    let reviewer = assignments[&chunk][0].reviewer_id;
    course.db.add_comment(chunk, reviewer, CommentKind::User, "unused field").unwrap();
    course.db.add_comment(chunk, reviewer, CommentKind::User, "rename this").unwrap();

    let records = aggregate_dashboard(&course.db, course.review_milestone, None).unwrap();
    let author = records.iter().find(|r| r.user.id == course.authors[0]).unwrap();
    let roster = &author.chunks[0].reviewers;
    let total = roster.students.len() + roster.alums.len() + roster.staff.len();
    assert_eq!(total, 2);

    let name = course.db.user(reviewer).unwrap().username;
    let entry = roster
        .students
        .iter()
        .chain(&roster.staff)
        .find(|e| e.username == name)
        .unwrap();
    assert_eq!(entry.comment_count, 2);
}

#[test]
fn simulated_dashboard_uses_planned_tasks() {
    let course = common::course();
    let plan = simulate_routing(&course.db, course.review_milestone, &request()).unwrap();

    let stored = aggregate_dashboard(&course.db, course.review_milestone, None).unwrap();
    assert!(stored.iter().all(|r| r.tasks.is_empty()));

    let simulated =
        aggregate_dashboard(&course.db, course.review_milestone, Some(&plan.assignments)).unwrap();
    let tasks: Vec<_> = simulated.iter().flat_map(|r| &r.tasks).collect();
    assert_eq!(tasks.len(), 6);
    assert!(tasks.iter().all(|t| t.task.status == TaskStatus::New));
}
