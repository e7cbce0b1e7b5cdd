use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::directive::Selection;
use crate::{Chunk, ClassType};

/// Synthetic entry collecting student-written test classes.
pub const STUDENT_DEFINED_TESTS: &str = "StudentDefinedTests";
/// Synthetic entry collecting every other student-written class.
pub const STUDENT_DEFINED_CLASSES: &str = "StudentDefinedClasses";

/// A name seen more than this many times (before the current instance) is staff provided.
const STAFF_PROVIDED_MIN_COPIES: u32 = 40;
/// A non-test instance with more student lines than this counts as edited.
const EDITED_MIN_STUDENT_LINES: u32 = 30;
const HISTOGRAM_LINE_CAP: u32 = 200;
/// Copy count at which the capped bucket stops growing.
const SATURATED_COPIES: u32 = 10;

/// Where a chunk name ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Bucket {
    Important,
    Test,
    Unimportant,
    StudentTests,
    StudentClasses,
}

/// Aggregated facts about every chunk sharing a name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameStats {
    /// Capped student line count -> number of copies.
    pub histogram: BTreeMap<u32, u32>,
    pub instances: u32,
    pub edited: bool,
    pub test: bool,
    pub staff_provided: bool,
}

impl NameStats {
    fn record(&mut self, chunk: &Chunk) {
        let lines = chunk.student_lines.min(HISTOGRAM_LINE_CAP);
        match self.histogram.get_mut(&lines) {
            Some(copies) => {
                if !(lines == HISTOGRAM_LINE_CAP && *copies == SATURATED_COPIES) {
                    *copies += 1;
                }
            }
            None => {
                self.histogram.insert(lines, 1);
            }
        }

        if lines > EDITED_MIN_STUDENT_LINES && chunk.class_type == ClassType::None {
            self.edited = true;
        }
        // Compared before this instance is counted, matching stored classifications.
        if self.instances > STAFF_PROVIDED_MIN_COPIES || chunk.staff_provided {
            self.staff_provided = true;
        }
        if chunk.class_type == ClassType::Test {
            self.test = true;
        }
        self.instances += 1;
    }

    fn peak(&self) -> u32 {
        self.histogram.values().copied().max().unwrap_or(0)
    }
}

struct Rule {
    bucket: Bucket,
    applies: fn(&NameStats) -> bool,
}

fn staff_test(stats: &NameStats) -> bool {
    stats.test && stats.staff_provided
}

fn student_test(stats: &NameStats) -> bool {
    stats.test
}

fn important(stats: &NameStats) -> bool {
    stats.edited && stats.staff_provided
}

fn unimportant(stats: &NameStats) -> bool {
    stats.staff_provided
}

fn anything(_: &NameStats) -> bool {
    true
}

/// First matching rule wins.
const RULES: &[Rule] = &[
    Rule {
        bucket: Bucket::Test,
        applies: staff_test,
    },
    Rule {
        bucket: Bucket::StudentTests,
        applies: student_test,
    },
    Rule {
        bucket: Bucket::Important,
        applies: important,
    },
    Rule {
        bucket: Bucket::Unimportant,
        applies: unimportant,
    },
    Rule {
        bucket: Bucket::StudentClasses,
        applies: anything,
    },
];

/// Pick the bucket for one name's aggregated stats.
pub fn bucket_for(stats: &NameStats) -> Bucket {
    RULES
        .iter()
        .find(|rule| (rule.applies)(stats))
        .map(|rule| rule.bucket)
        .unwrap_or(Bucket::StudentClasses)
}

/// One selectable row: a chunk name (or a merged student-defined group) and its
/// line-count histogram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkGraph {
    pub name: String,
    /// `(capped student lines, copies)` sorted by line count.
    pub histogram: Vec<(u32, u32)>,
    /// Real chunk names behind this row; just `name` unless merged.
    pub members: Vec<String>,
}

impl ChunkGraph {
    fn single(name: &str, stats: &NameStats) -> Self {
        Self {
            name: name.to_owned(),
            histogram: stats.histogram.iter().map(|(l, c)| (*l, *c)).collect(),
            members: vec![name.to_owned()],
        }
    }

    fn merged(name: &str, members: Vec<(&str, &NameStats)>) -> Option<Self> {
        if members.is_empty() {
            return None;
        }
        let mut histogram = BTreeMap::new();
        for (_, stats) in &members {
            for (lines, copies) in &stats.histogram {
                *histogram.entry(*lines).or_insert(0) += copies;
            }
        }
        Some(Self {
            name: name.to_owned(),
            histogram: histogram.into_iter().collect(),
            members: members.iter().map(|(n, _)| (*n).to_owned()).collect(),
        })
    }
}

/// Milestone chunks grouped for the routing selection UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub important: Vec<ChunkGraph>,
    pub test: Vec<ChunkGraph>,
    pub unimportant: Vec<ChunkGraph>,
    /// Highest copy count of any single name in each category.
    pub max_important: u32,
    pub max_test: u32,
    pub max_unimportant: u32,
}

impl Classification {
    /// Rows in selection order (important, unimportant, test) with their default flag.
    pub fn rows(&self) -> impl Iterator<Item = (&ChunkGraph, bool)> {
        self.important
            .iter()
            .map(|g| (g, true))
            .chain(self.unimportant.iter().map(|g| (g, true)))
            .chain(self.test.iter().map(|g| (g, false)))
    }

    /// Row names in selection order.
    pub fn ordering(&self) -> Vec<&str> {
        self.rows().map(|(g, _)| g.name.as_str()).collect()
    }

    /// Important and unimportant rows selected, tests not.
    pub fn default_selection(&self) -> Selection {
        Selection::new(self.rows().map(|(g, selected)| (g.name.clone(), selected)))
    }

    /// Real chunk names covered by the selected rows.
    pub fn selected_chunk_names(&self, selection: &Selection) -> HashSet<String> {
        self.rows()
            .filter(|(g, _)| selection.is_selected(&g.name))
            .flat_map(|(g, _)| g.members.iter().cloned())
            .collect()
    }

    /// Bucket a real chunk name landed in.
    pub fn bucket_of(&self, name: &str) -> Option<Bucket> {
        let find = |graphs: &[ChunkGraph]| {
            graphs
                .iter()
                .find(|g| g.members.iter().any(|m| m == name))
                .map(|g| g.name.clone())
        };
        if find(&self.important).is_some() {
            return Some(Bucket::Important);
        }
        if let Some(row) = find(&self.test) {
            return Some(if row == STUDENT_DEFINED_TESTS && row != name {
                Bucket::StudentTests
            } else {
                Bucket::Test
            });
        }
        find(&self.unimportant).map(|row| {
            if row == STUDENT_DEFINED_CLASSES && row != name {
                Bucket::StudentClasses
            } else {
                Bucket::Unimportant
            }
        })
    }
}

/// Aggregate per-name stats, keeping names in first-seen order. Unnamed chunks are skipped.
pub fn collect_stats(chunks: &[Chunk]) -> Vec<(String, NameStats)> {
    let mut order: Vec<String> = Vec::new();
    let mut stats: HashMap<String, NameStats> = HashMap::new();

    for chunk in chunks {
        let Some(name) = chunk.name.as_deref() else {
            continue;
        };
        let entry = stats.entry(name.to_owned()).or_insert_with(|| {
            order.push(name.to_owned());
            NameStats::default()
        });
        entry.record(chunk);
    }

    order
        .into_iter()
        .filter_map(|name| stats.remove(&name).map(|s| (name, s)))
        .collect()
}

/// Classify every chunk of a milestone.
///
/// Row order is stable for a given chunk order: named rows follow first appearance
/// and the merged student-defined rows come last in their category.
pub fn classify(chunks: &[Chunk]) -> Classification {
    let stats = collect_stats(chunks);
    let mut out = Classification::default();
    let mut student_tests = Vec::new();
    let mut student_classes = Vec::new();

    for (name, stats) in &stats {
        let peak = stats.peak();
        match bucket_for(stats) {
            Bucket::Test => {
                out.max_test = out.max_test.max(peak);
                out.test.push(ChunkGraph::single(name, stats));
            }
            Bucket::StudentTests => {
                out.max_test = out.max_test.max(peak);
                student_tests.push((name.as_str(), stats));
            }
            Bucket::Important => {
                out.max_important = out.max_important.max(peak);
                out.important.push(ChunkGraph::single(name, stats));
            }
            Bucket::Unimportant => {
                out.max_unimportant = out.max_unimportant.max(peak);
                out.unimportant.push(ChunkGraph::single(name, stats));
            }
            Bucket::StudentClasses => {
                out.max_unimportant = out.max_unimportant.max(peak);
                student_classes.push((name.as_str(), stats));
            }
        }
    }

    out.test
        .extend(ChunkGraph::merged(STUDENT_DEFINED_TESTS, student_tests));
    out.unimportant
        .extend(ChunkGraph::merged(STUDENT_DEFINED_CLASSES, student_classes));

    tracing::debug!(
        names = stats.len(),
        important = out.important.len(),
        test = out.test.len(),
        unimportant = out.unimportant.len(),
        "classified milestone chunks"
    );
    out
}
