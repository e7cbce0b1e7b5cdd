mod common;

use chunk_review::classify::{Bucket, STUDENT_DEFINED_TESTS, classify};
use chunk_review::directive;
use chunk_review::routing::{RoutingRequest, commit_routing, preview_routing, simulate_routing};
use chunk_review::{CoreError, PoolSettings, TaskStatus};

fn request(per_chunk: u32, min_lines: u32, checked: &[&str]) -> RoutingRequest {
    RoutingRequest {
        settings: PoolSettings {
            students: common::reviewer_roster(),
            student_count: 2,
            reviewers_per_chunk: per_chunk,
            min_student_lines: min_lines,
            ..PoolSettings::default()
        },
        checked: checked.iter().map(|s| s.to_string()).collect(),
        seed: Some(7),
        expected_version: None,
    }
}

#[test]
fn classifies_edited_staff_chunk_as_important_and_student_test_as_test() {
    let course = common::course();
    let chunks = course.db.milestone_chunks(course.submit_milestone).unwrap();
    let c = classify(&chunks);

    assert_eq!(c.important.len(), 1);
    assert_eq!(c.important[0].name, "A");
    assert_eq!(c.important[0].histogram, vec![(50, 1), (60, 1), (200, 1)]);
    assert_eq!(c.max_important, 1);

    assert_eq!(c.test.len(), 1);
    assert_eq!(c.test[0].name, STUDENT_DEFINED_TESTS);
    assert_eq!(c.test[0].members, vec!["B"]);
    assert_eq!(c.bucket_of("B"), Some(Bucket::StudentTests));
    assert!(c.unimportant.is_empty());
}

#[test]
fn commit_creates_two_new_tasks_per_routed_chunk() {
    let mut course = common::course();
    // The 50-line copy of A falls under the minimum, leaving two chunks.
    let assignments =
        commit_routing(&mut course.db, course.review_milestone, &request(2, 55, &["A"])).unwrap();

    assert_eq!(assignments.len(), 2);
    assert!(assignments.contains_key(&course.chunks[1]));
    assert!(assignments.contains_key(&course.chunks[2]));
    let tasks: Vec<_> = assignments.values().flatten().collect();
    assert_eq!(tasks.len(), 4);
    assert!(assignments.values().all(|t| t.len() == 2));
    assert!(tasks.iter().all(|t| t.status == TaskStatus::New && t.id.is_some()));
    assert!(tasks.iter().all(|t| course.reviewers.contains(&t.reviewer_id)));
}

#[test]
fn commit_then_preview_returns_same_assignments() {
    let mut course = common::course();
    let committed =
        commit_routing(&mut course.db, course.review_milestone, &request(2, 0, &["A"])).unwrap();
    let preview = preview_routing(&course.db, course.review_milestone).unwrap();
    assert_eq!(committed, preview);
    assert_eq!(preview.values().map(Vec::len).sum::<usize>(), 6);
}

#[test]
fn simulate_matches_commit_and_stores_nothing() {
    let mut course = common::course();
    let req = request(2, 0, &["A"]);
    let plan = simulate_routing(&course.db, course.review_milestone, &req).unwrap();
    assert!(preview_routing(&course.db, course.review_milestone).unwrap().is_empty());
    assert_eq!(plan.directive, "A 1,StudentDefinedTests 0,");

    let committed = commit_routing(&mut course.db, course.review_milestone, &req).unwrap();
    let pairs = |m: &chunk_review::routing::ChunkTasks| -> Vec<(i64, i64)> {
        m.values()
            .flatten()
            .map(|t| (t.chunk_id, t.reviewer_id))
            .collect()
    };
    assert_eq!(pairs(&plan.assignments), pairs(&committed));
}

#[test]
fn authors_never_review_their_own_chunks() {
    let mut course = common::course();
    let mut req = request(3, 0, &["A", STUDENT_DEFINED_TESTS]);
    // Put the authors in the pool as well.
    let authors = (1..=4)
        .map(|i| format!("author{i}"))
        .collect::<Vec<_>>()
        .join(" ");
    req.settings.students = format!("{} {authors}", req.settings.students);

    let assignments = commit_routing(&mut course.db, course.review_milestone, &req).unwrap();
    assert_eq!(assignments.len(), 4);
    for (i, chunk) in course.chunks.iter().enumerate() {
        let tasks = &assignments[chunk];
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| t.reviewer_id != course.authors[i]));
    }
}

#[test]
fn second_commit_only_tops_up() {
    let mut course = common::course();
    commit_routing(&mut course.db, course.review_milestone, &request(1, 0, &["A"])).unwrap();
    let assignments =
        commit_routing(&mut course.db, course.review_milestone, &request(2, 0, &["A"])).unwrap();
    assert!(assignments.values().all(|t| t.len() == 2));
    for tasks in assignments.values() {
        assert_ne!(tasks[0].reviewer_id, tasks[1].reviewer_id);
    }
}

#[test]
fn commit_persists_directive_and_settings() {
    let mut course = common::course();
    let req = request(2, 0, &["A"]);
    commit_routing(&mut course.db, course.review_milestone, &req).unwrap();

    let milestone = course.db.review_milestone(course.review_milestone).unwrap();
    assert_eq!(milestone.settings, req.settings);
    assert_eq!(milestone.version, 1);
    let stored = milestone.chunks_to_assign.as_deref();
    assert_eq!(stored, Some("A 1,StudentDefinedTests 0,"));

    let chunks = course.db.milestone_chunks(course.submit_milestone).unwrap();
    let selection = directive::resolve(stored, &classify(&chunks));
    assert!(selection.is_selected("A"));
    assert!(!selection.is_selected(STUDENT_DEFINED_TESTS));
}

#[test]
fn stale_version_is_rejected_without_changes() {
    let mut course = common::course();
    let milestone = course.db.review_milestone(course.review_milestone).unwrap();
    commit_routing(&mut course.db, course.review_milestone, &request(1, 0, &["A"])).unwrap();
    let before = preview_routing(&course.db, course.review_milestone).unwrap();

    let err = course
        .db
        .commit_assignment(
            milestone.id,
            milestone.version,
            &PoolSettings::default(),
            "A 0,",
            &[],
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::ConcurrentUpdate { .. }));

    let after = course.db.review_milestone(course.review_milestone).unwrap();
    assert_eq!(after.chunks_to_assign.as_deref(), Some("A 1,StudentDefinedTests 0,"));
    assert_eq!(preview_routing(&course.db, course.review_milestone).unwrap(), before);
}

#[test]
fn unknown_milestone_is_not_found() {
    let course = common::course();
    let err = preview_routing(&course.db, 999).unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}

#[test]
fn routing_both_rows_gives_every_chunk_two_new_tasks() {
    let mut course = common::course();
    let assignments = commit_routing(
        &mut course.db,
        course.review_milestone,
        &request(2, 0, &["A", STUDENT_DEFINED_TESTS]),
    )
    .unwrap();

    assert_eq!(assignments.len(), course.chunks.len());
    for (i, chunk) in course.chunks.iter().enumerate() {
        let tasks = &assignments[chunk];
        assert_eq!(tasks.len(), 2, "chunk {chunk}");
        assert!(tasks.iter().all(|t| t.status == TaskStatus::New));
        assert!(tasks.iter().all(|t| t.reviewer_id != course.authors[i]));
        assert!(tasks.iter().all(|t| course.reviewers.contains(&t.reviewer_id)));
    }
    assert_eq!(assignments.values().map(Vec::len).sum::<usize>(), 8);
}

#[test]
fn second_review_milestone_gets_full_assignment() {
    let mut course = common::course();
    let second = course
        .db
        .add_review_milestone(course.submit_milestone, course.semester)
        .unwrap();
    let req = request(2, 0, &["A"]);
    commit_routing(&mut course.db, course.review_milestone, &req).unwrap();

    let plan = simulate_routing(&course.db, second, &req).unwrap();
    assert_eq!(plan.new_tasks.len(), 6);
    let committed = commit_routing(&mut course.db, second, &req).unwrap();
    assert_eq!(committed.values().map(Vec::len).sum::<usize>(), 6);
    assert!(committed.values().all(|t| t.len() == 2));
    assert!(committed.values().flatten().all(|t| t.milestone_id == second));

    let first = preview_routing(&course.db, course.review_milestone).unwrap();
    assert_eq!(first.values().map(Vec::len).sum::<usize>(), 6);
}

#[test]
fn request_built_from_stale_milestone_is_rejected() {
    let mut course = common::course();
    let seen = course.db.review_milestone(course.review_milestone).unwrap();

    commit_routing(
        &mut course.db,
        course.review_milestone,
        &request(1, 0, &["A", STUDENT_DEFINED_TESTS]),
    )
    .unwrap();

    let mut stale = request(1, 0, &[]);
    stale.expected_version = Some(seen.version);
    let err = commit_routing(&mut course.db, course.review_milestone, &stale).unwrap_err();
    assert!(matches!(err, CoreError::ConcurrentUpdate { .. }));

    let after = course.db.review_milestone(course.review_milestone).unwrap();
    assert_eq!(after.version, 1);
    assert_eq!(after.chunks_to_assign.as_deref(), Some("A 1,StudentDefinedTests 1,"));
}
