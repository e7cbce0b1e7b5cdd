//! The `chunks_to_assign` directive stored on a review milestone.
//!
//! Wire format: `"<name> <0|1>,"` repeated, with a trailing comma. Existing milestones
//! were written by a reader that matched entries to rows by position; entries are
//! now matched by name and the positional reader is kept for checking old data.

use serde::Serialize;
use thiserror::Error;

use crate::classify::Classification;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveError {
    #[error("entry {0:?} has no flag")]
    MissingSeparator(String),
    #[error("entry {0:?} has a non-numeric flag")]
    InvalidFlag(String),
    #[error("directive does not end with ','")]
    Unterminated,
    #[error("chunk name {0:?} cannot be encoded")]
    InvalidName(String),
    #[error("entry {position} is {found:?}, expected {expected:?}")]
    Misaligned {
        position: usize,
        expected: String,
        found: String,
    },
    #[error("directive has {found} entries, expected {expected}")]
    LengthMismatch { expected: usize, found: usize },
}

/// Ordered chunk-name selection, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection {
    entries: Vec<(String, bool)>,
}

impl Selection {
    /// Later duplicates of a name replace the earlier flag in place.
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, bool)>,
    {
        let mut selection = Self::default();
        for (name, selected) in entries {
            selection.set(name, selected);
        }
        selection
    }

    /// Select exactly `checked` among `ordering`.
    pub fn from_checked<'a, I>(ordering: &[&str], checked: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let checked: std::collections::HashSet<&str> = checked.into_iter().collect();
        Self::new(
            ordering
                .iter()
                .map(|name| ((*name).to_owned(), checked.contains(name))),
        )
    }

    pub fn set(&mut self, name: String, selected: bool) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = selected,
            None => self.entries.push((name, selected)),
        }
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, selected)| *selected)
    }

    pub fn is_selected(&self, name: &str) -> bool {
        self.get(name).unwrap_or(false)
    }

    pub fn entries(&self) -> &[(String, bool)] {
        &self.entries
    }

    pub fn selected_names(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, selected)| *selected)
            .map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Serialize a selection in stored order.
pub fn encode(selection: &Selection) -> Result<String, DirectiveError> {
    let mut out = String::new();
    for (name, selected) in selection.entries() {
        if name.is_empty() || name.contains([',', ' ']) {
            return Err(DirectiveError::InvalidName(name.clone()));
        }
        out.push_str(name);
        out.push_str(if *selected { " 1," } else { " 0," });
    }
    Ok(out)
}

/// Parse a stored directive: split on `,`, drop the trailing empty token, then split
/// each entry on a space into name and integer flag (non-zero is selected).
pub fn parse(directive: &str) -> Result<Selection, DirectiveError> {
    let mut tokens: Vec<&str> = directive.split(',').collect();
    if tokens.pop() != Some("") {
        return Err(DirectiveError::Unterminated);
    }

    let mut entries = Vec::with_capacity(tokens.len());
    for token in tokens {
        let mut parts = token.split(' ');
        let name = parts.next().unwrap_or_default();
        let flag = parts
            .next()
            .ok_or_else(|| DirectiveError::MissingSeparator(token.to_owned()))?;
        let flag: i64 = flag
            .parse()
            .map_err(|_| DirectiveError::InvalidFlag(token.to_owned()))?;
        entries.push((name.to_owned(), flag != 0));
    }
    Ok(Selection::new(entries))
}

/// Legacy positional read: entry `i` must name row `i` of `ordering`.
pub fn decode_positional(directive: &str, ordering: &[&str]) -> Result<Selection, DirectiveError> {
    let parsed = parse(directive)?;
    if parsed.len() != ordering.len() {
        return Err(DirectiveError::LengthMismatch {
            expected: ordering.len(),
            found: parsed.len(),
        });
    }
    for (position, ((found, _), expected)) in parsed.entries().iter().zip(ordering).enumerate() {
        if found != expected {
            return Err(DirectiveError::Misaligned {
                position,
                expected: (*expected).to_owned(),
                found: found.clone(),
            });
        }
    }
    Ok(parsed)
}

/// Selection to show for the current classification.
///
/// With nothing stored the classification defaults apply. A stored directive is
/// matched by name; rows it does not mention are unselected. A directive that cannot
/// be parsed is logged and treated as selecting nothing.
pub fn resolve(stored: Option<&str>, classification: &Classification) -> Selection {
    let ordering = classification.ordering();
    let Some(stored) = stored else {
        return classification.default_selection();
    };

    let parsed = match parse(stored) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring malformed chunk directive");
            return Selection::from_checked(&ordering, std::iter::empty());
        }
    };

    if let Err(err) = decode_positional(stored, &ordering) {
        tracing::warn!(error = %err, "chunk directive no longer matches classification, matching by name");
    }

    Selection::new(
        ordering
            .iter()
            .map(|name| ((*name).to_owned(), parsed.is_selected(name))),
    )
}
