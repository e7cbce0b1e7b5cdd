use std::path::Path;

use syntect::{
    easy::HighlightLines,
    highlighting::{Style, Theme, ThemeSet},
    html::{IncludeBackground, styled_line_to_highlighted_html},
    parsing::{SyntaxReference, SyntaxSet},
    util::LinesWithEndings,
};

/// Maximum line length for syntax highlighting (longer lines are escaped verbatim).
const MAX_LINE_LENGTH: usize = 10_000;

const DEFAULT_THEME: &str = "InspiredGitHub";

/// Renders submitted source files into per-line HTML fragments.
///
/// Loading the bundled syntaxes and themes is slow, so build one and share it.
pub struct Highlighter {
    syntax_set: SyntaxSet,
    theme: Theme,
}

impl Highlighter {
    pub fn new() -> Self {
        let syntax_set = SyntaxSet::load_defaults_newlines();
        let theme_set = ThemeSet::load_defaults();
        let theme = theme_set
            .themes
            .get(DEFAULT_THEME)
            .or_else(|| theme_set.themes.values().next())
            .cloned()
            .unwrap_or_default();

        Self { syntax_set, theme }
    }

    /// Highlight a whole file and return one HTML fragment per source line.
    ///
    /// The file is highlighted top to bottom in one session so that multi-line
    /// strings and comments keep their parse state. Files whose extension is
    /// unknown are rendered as plain text.
    pub fn render_lines(&self, source: &str, filename: &str) -> Vec<String> {
        let syntax = self.syntax_for(filename);
        let mut session = HighlightLines::new(syntax, &self.theme);

        LinesWithEndings::from(source)
            .map(|line| {
                if line.len() > MAX_LINE_LENGTH {
                    return escape_html(trim_newline(line));
                }
                match session.highlight_line(line, &self.syntax_set) {
                    Ok(regions) => {
                        let trimmed: Vec<(Style, &str)> = regions
                            .into_iter()
                            .map(|(style, text)| (style, trim_newline(text)))
                            .filter(|(_, text)| !text.is_empty())
                            .collect();
                        styled_line_to_highlighted_html(&trimmed, IncludeBackground::No)
                            .unwrap_or_else(|_| escape_html(trim_newline(line)))
                    }
                    Err(err) => {
                        tracing::debug!(filename, error = %err, "highlighting failed, rendering plain");
                        escape_html(trim_newline(line))
                    }
                }
            })
            .collect()
    }

    fn syntax_for(&self, filename: &str) -> &SyntaxReference {
        Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.syntax_set.find_syntax_by_extension(ext))
            .unwrap_or_else(|| self.syntax_set.find_syntax_plain_text())
    }
}

impl Default for Highlighter {
    fn default() -> Self {
        Self::new()
    }
}

fn trim_newline(text: &str) -> &str {
    text.trim_end_matches(['\n', '\r'])
}

// Same character set as syntect's internal `Escape`, which is not exported.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '>' => out.push_str("&gt;"),
            '<' => out.push_str("&lt;"),
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_fragment_per_line() {
        let highlighter = Highlighter::new();
        let source = "public class A {\n    int x;\n}\n";
        let lines = highlighter.render_lines(source, "A.java");
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| !l.contains('\n')));
    }

    #[test]
    fn known_syntax_produces_spans() {
        let highlighter = Highlighter::new();
        let lines = highlighter.render_lines("fn main() {}\n", "main.rs");
        assert!(lines[0].contains("<span"));
        assert!(lines[0].contains("main"));
    }

    #[test]
    fn unknown_extension_is_plain_and_escaped() {
        let highlighter = Highlighter::new();
        let lines = highlighter.render_lines("a < b\n", "notes.unknown_xyz");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("&lt;"));
        assert!(!lines[0].contains("a < b"));
    }

    #[test]
    fn last_line_without_newline_is_kept() {
        let highlighter = Highlighter::new();
        let lines = highlighter.render_lines("x = 1\ny = 2", "a.py");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn long_lines_skip_highlighting() {
        let highlighter = Highlighter::new();
        let long_line = "<".repeat(MAX_LINE_LENGTH + 1);
        let lines = highlighter.render_lines(&long_line, "a.rs");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("&lt;"));
        assert!(!lines[0].contains("<span"));
    }

    #[test]
    fn escape_html_handles_specials() {
        let escaped = escape_html("<a href=\"x\">&");
        assert_eq!(escaped, "&lt;a href=&quot;x&quot;&gt;&amp;");
        assert!(!escape_html("it's").contains('\''));
    }
}
