//! Template Resolver (C4): substitutes `$name` / `${name}` placeholders in
//! manifest strings against a dictionary of live values.
//!
//! Resolution is eager per call (a call to [`TemplateResolver::resolve`]
//! returns a fully-substituted string) but lazy per field: callers re-invoke
//! `resolve` each time a `ServiceConfig` field is read, so thunked entries
//! (hostname, pid, ...) reflect whichever rank is doing the resolving.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::TemplateError;

/// A dictionary entry: either a precomputed literal, or a thunk evaluated
/// only at substitution time (so per-rank values like `hostname`/`pid`
/// reflect the resolving rank, not the rank that built the dictionary).
#[derive(Clone)]
pub enum TemplateValue {
  Literal(String),
  Thunk(Arc<dyn Fn() -> String + Send + Sync>),
}

impl TemplateValue {
  pub fn literal(s: impl Into<String>) -> Self {
    Self::Literal(s.into())
  }

  pub fn thunk(f: impl Fn() -> String + Send + Sync + 'static) -> Self {
    Self::Thunk(Arc::new(f))
  }

  fn resolve(&self) -> String {
    match self {
      TemplateValue::Literal(s) => s.clone(),
      TemplateValue::Thunk(f) => f(),
    }
  }
}

impl From<String> for TemplateValue {
  fn from(value: String) -> Self {
    TemplateValue::Literal(value)
  }
}

impl From<&str> for TemplateValue {
  fn from(value: &str) -> Self {
    TemplateValue::Literal(value.to_string())
  }
}

/// A value dictionary, built once per rank and reused across every
/// `resolve` call. Overrides supplied by the caller win over built-ins.
#[derive(Clone, Default)]
pub struct TemplateResolver {
  values: HashMap<String, TemplateValue>,
}

impl TemplateResolver {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(
    mut self,
    name: impl Into<String>,
    value: impl Into<TemplateValue>,
  ) -> Self {
    self.values.insert(name.into(), value.into());
    self
  }

  pub fn set(&mut self, name: impl Into<String>, value: impl Into<TemplateValue>) {
    self.values.insert(name.into(), value.into());
  }

  /// Loads every OS environment variable at the moment of construction as a
  /// literal (matching the original's `_strings.update(os.environ)`).
  pub fn with_os_environment(mut self) -> Self {
    for (k, v) in std::env::vars() {
      self.values.entry(k).or_insert(TemplateValue::Literal(v));
    }
    self
  }

  /// Substitutes every `$name` / `${name}` occurrence in `s`. Unknown names
  /// are a hard error (templates are only ever resolved against a
  /// dictionary the caller built for this exact string's source).
  pub fn resolve(&self, s: &str) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
      let c = bytes[i] as char;
      if c == '$' && i + 1 < bytes.len() {
        let next = bytes[i + 1] as char;
        if next == '{' {
          let close = s[i + 2..].find('}').ok_or_else(|| {
            TemplateError::UnterminatedBrace(s[i + 2..].to_string())
          })?;
          let name = &s[i + 2..i + 2 + close];
          out.push_str(&self.lookup(name)?);
          i += 2 + close + 1;
          continue;
        } else if next == '_' || next.is_alphabetic() {
          let rest = &s[i + 1..];
          let end = rest
            .find(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
            .unwrap_or(rest.len());
          let name = &rest[..end];
          out.push_str(&self.lookup(name)?);
          i += 1 + end;
          continue;
        }
      }
      out.push(c);
      i += 1;
    }
    Ok(out)
  }

  fn lookup(&self, name: &str) -> Result<String, TemplateError> {
    self
      .values
      .get(name)
      .map(TemplateValue::resolve)
      .ok_or_else(|| {
        TemplateError::UnresolvedPlaceholder(name.to_string())
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn substitutes_both_placeholder_forms() {
    let resolver = TemplateResolver::new()
      .with("hostname", "node-7")
      .with("pid", "4242");
    assert_eq!(
      resolver.resolve("$hostname:${pid}").unwrap(),
      "node-7:4242"
    );
  }

  #[test]
  fn per_rank_substitution_differs_by_thunk() {
    // Two "ranks" share the same unresolved string but each builds its own
    // resolver with a different hostname/pid thunk.
    let template = "host=$hostname pid=$pid";
    let rank0 = TemplateResolver::new()
      .with("hostname", "rank0.cluster")
      .with("pid", "100");
    let rank1 = TemplateResolver::new()
      .with("hostname", "rank1.cluster")
      .with("pid", "200");
    let out0 = rank0.resolve(template).unwrap();
    let out1 = rank1.resolve(template).unwrap();
    assert_ne!(out0, out1);
    assert!(out0.contains("rank0.cluster") && out0.contains("100"));
    assert!(out1.contains("rank1.cluster") && out1.contains("200"));
  }

  #[test]
  fn overrides_win_over_builtins() {
    let resolver = TemplateResolver::new()
      .with("masterhostname", "builtin")
      .with("masterhostname", "override");
    assert_eq!(resolver.resolve("$masterhostname").unwrap(), "override");
  }

  #[test]
  fn unresolved_placeholder_is_an_error() {
    let resolver = TemplateResolver::new();
    assert!(resolver.resolve("$nope").is_err());
  }

  #[test]
  fn thunk_is_evaluated_lazily_each_call() {
    use std::sync::atomic::{AtomicU32, Ordering};
    let counter = Arc::new(AtomicU32::new(0));
    let c = counter.clone();
    let resolver = TemplateResolver::new().with(
      "n",
      TemplateValue::thunk(move || {
        c.fetch_add(1, Ordering::SeqCst).to_string()
      }),
    );
    assert_eq!(resolver.resolve("$n").unwrap(), "0");
    assert_eq!(resolver.resolve("$n").unwrap(), "1");
  }
}
