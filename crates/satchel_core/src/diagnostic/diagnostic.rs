use std::fmt::Display;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::CodeFrame;

/// A build error enriched with source context, suitable for surfacing to
/// terminals and live-reload clients.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
  pub message: String,
  pub file_path: Option<PathBuf>,
  pub code_frame: Option<CodeFrame>,
}

impl Diagnostic {
  pub fn new(message: impl Into<String>) -> Self {
    Diagnostic {
      message: message.into(),
      ..Diagnostic::default()
    }
  }

  pub fn with_code_frame(mut self, code_frame: CodeFrame) -> Self {
    self.file_path = code_frame.file_path.clone();
    self.code_frame = Some(code_frame);
    self
  }
}

impl Display for Diagnostic {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.message)?;
    if let Some(file_path) = &self.file_path {
      write!(f, " ({})", file_path.display())?;
    }
    if let Some(code_frame) = &self.code_frame {
      write!(f, "\n{}", code_frame.render())?;
    }
    Ok(())
  }
}

impl std::error::Error for Diagnostic {}
