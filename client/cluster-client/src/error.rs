use thiserror::Error;

/// Errors raised while loading or resolving manifests (component C3/C4).
///
/// These always originate on the coordinator, before the plan is broadcast,
/// matching the "Configuration" row of the error taxonomy: the planner
/// aborts and no broadcast is issued, so workers time out on the first
/// barrier and the job fails cleanly.
#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("{path}: missing required section [{section}]")]
  MissingSection { path: String, section: &'static str },

  #[error("{path}: [{section}] missing required key '{key}'")]
  MissingKey {
    path: String,
    section: &'static str,
    key: &'static str,
  },

  #[error(
    "{path}: [Unit] RunsOn value '{value}' is invalid, expected master|slave|all"
  )]
  InvalidRunsOn { path: String, value: String },

  #[error("{path}: failed to read file")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("{path}: malformed manifest at line {line}: {reason}")]
  Parse {
    path: String,
    line: usize,
    reason: String,
  },
}

/// Errors raised while substituting template placeholders (component C4).
#[derive(Debug, Error)]
pub enum TemplateError {
  #[error("unresolved placeholder '${0}' has no value in the template dictionary")]
  UnresolvedPlaceholder(String),

  #[error("placeholder '${0}' is missing its closing brace")]
  UnterminatedBrace(String),
}
