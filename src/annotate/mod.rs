use serde::Serialize;
use std::ops::Range;

use crate::{Chunk, ChunkId, StaffMarker};

/// A rendered source line tagged with whether staff wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotatedLine {
    pub number: u32,
    pub text: String,
    pub is_staff: bool,
}

/// Merge numbered lines with staff markers sorted by `(start_line, end_line)`.
///
/// Walks one cursor across the markers, so the whole merge is linear in
/// `lines + markers`. The cursor lives on this call's stack; repeated calls with the
/// same input always produce the same output.
///
/// Marker line numbers are absolute. When `lines` starts partway into a file, markers
/// that ended before the first line are skipped.
pub fn annotate<I, S>(lines: I, markers: &[StaffMarker]) -> Vec<AnnotatedLine>
where
    I: IntoIterator<Item = (u32, S)>,
    S: Into<String>,
{
    let mut cursor = 0;
    lines
        .into_iter()
        .map(|(number, text)| {
            while cursor < markers.len() && markers[cursor].end_line < number {
                cursor += 1;
            }

            let is_staff = match markers.get(cursor) {
                Some(marker) if marker.contains(number) => {
                    // Leave the marker only on its last line.
                    while cursor < markers.len() && markers[cursor].end_line == number {
                        cursor += 1;
                    }
                    true
                }
                _ => false,
            };

            AnnotatedLine {
                number,
                text: text.into(),
                is_staff,
            }
        })
        .collect()
}

/// Annotate the 0-indexed half-open slice `range` of `lines`.
///
/// Out-of-bounds ends are clamped and an inverted range yields nothing.
pub fn annotate_range<S>(
    lines: &[(u32, S)],
    range: Range<usize>,
    markers: &[StaffMarker],
) -> Vec<AnnotatedLine>
where
    S: AsRef<str>,
{
    let slice = clamp(range, lines.len());
    annotate(
        lines[slice]
            .iter()
            .map(|(number, text)| (*number, text.as_ref().to_owned())),
        markers,
    )
}

/// Pair line numbers with highlighter output and annotate them.
///
/// `rendered` must come from highlighting the whole source so that multi-line
/// constructs are tokenized correctly; `range` then picks the visible window out of
/// both sequences. Extra entries on either side are dropped.
pub fn render_annotated(
    numbers: &[u32],
    rendered: Vec<String>,
    range: Option<Range<usize>>,
    markers: &[StaffMarker],
) -> Vec<AnnotatedLine> {
    let range = range.unwrap_or(0..usize::MAX);
    let numbers = &numbers[clamp(range.clone(), numbers.len())];
    let rendered_range = clamp(range, rendered.len());
    let rendered = rendered
        .into_iter()
        .skip(rendered_range.start)
        .take(rendered_range.len());

    annotate(numbers.iter().copied().zip(rendered), markers)
}

/// A run of file lines, either inside a chunk or between chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub lines: Vec<AnnotatedLine>,
    pub chunk_id: Option<ChunkId>,
}

/// Split a file's annotated lines into alternating non-chunk and chunk segments.
///
/// Chunks are visited in order of their first line. Empty chunks and chunks
/// overlapping an already emitted segment are skipped. A trailing non-chunk segment
/// is always emitted, even when empty.
pub fn segment_file(lines: &[AnnotatedLine], chunks: &[Chunk]) -> Vec<Segment> {
    let Some(first) = lines.first() else {
        return vec![Segment {
            lines: Vec::new(),
            chunk_id: None,
        }];
    };
    let offset = first.number;
    let slice = |from: u32, to: u32| -> Vec<AnnotatedLine> {
        let range = clamp(
            (from.saturating_sub(offset)) as usize..(to.saturating_sub(offset)) as usize,
            lines.len(),
        );
        lines[range].to_vec()
    };

    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|chunk| chunk.start);

    let mut segments = Vec::new();
    let mut end = offset;
    for chunk in ordered {
        if chunk.end <= chunk.start {
            continue;
        }
        if chunk.start > end {
            segments.push(Segment {
                lines: slice(end, chunk.start),
                chunk_id: None,
            });
            end = chunk.start;
        }
        if end == chunk.start {
            segments.push(Segment {
                lines: slice(chunk.start, chunk.end),
                chunk_id: Some(chunk.id),
            });
            end = chunk.end;
        }
    }

    segments.push(Segment {
        lines: slice(end, u32::MAX),
        chunk_id: None,
    });
    segments
}

fn clamp(range: Range<usize>, len: usize) -> Range<usize> {
    let end = range.end.min(len);
    let start = range.start.min(end);
    start..end
}
