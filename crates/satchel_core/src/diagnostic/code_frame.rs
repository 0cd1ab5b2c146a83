use std::fmt::Write;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::types::SourceLocation;

/// A source-code highlight within a code frame
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeHighlight {
  pub loc: SourceLocation,
  pub message: Option<String>,
}

impl From<SourceLocation> for CodeHighlight {
  fn from(loc: SourceLocation) -> Self {
    CodeHighlight { loc, message: None }
  }
}

/// An annotated excerpt of the file an error points into
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeFrame {
  /// Source-code of the file at the time of error
  pub code: String,

  /// Path to the source file if applicable
  pub file_path: Option<PathBuf>,

  pub code_highlights: Vec<CodeHighlight>,
}

impl CodeFrame {
  pub fn new(code: String, file_path: Option<PathBuf>, loc: SourceLocation) -> Self {
    CodeFrame {
      code,
      file_path,
      code_highlights: vec![loc.into()],
    }
  }

  /// Render the highlighted lines with one line of context and a caret under
  /// each highlight column.
  pub fn render(&self) -> String {
    let lines: Vec<&str> = self.code.lines().collect();
    let mut out = String::new();

    for highlight in &self.code_highlights {
      let line_idx = (highlight.loc.line as usize).saturating_sub(1);
      let start = line_idx.saturating_sub(1);
      let end = (line_idx + 1).min(lines.len().saturating_sub(1));

      for (offset, line) in lines
        .iter()
        .enumerate()
        .take(end + 1)
        .skip(start.min(lines.len()))
      {
        let _ = writeln!(out, "{:>4} | {}", offset + 1, line);
        if offset == line_idx {
          let caret_col = (highlight.loc.column as usize).saturating_sub(1);
          let _ = writeln!(out, "     | {}^", " ".repeat(caret_col));
          if let Some(message) = &highlight.message {
            let _ = writeln!(out, "     | {}{}", " ".repeat(caret_col), message);
          }
        }
      }
    }

    out
  }
}
