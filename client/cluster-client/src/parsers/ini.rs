use indexmap::IndexMap;

use crate::error::ManifestError;

/// A parsed INI document: section name -> ordered key/value map. Both the
/// bundle manifest and the per-service unit manifest share this shape, so
/// the tokenizer lives here and `parsers::manifest` interprets the sections.
#[derive(Debug, Clone, Default)]
pub struct IniDocument {
  pub sections: IndexMap<String, IndexMap<String, String>>,
}

impl IniDocument {
  pub fn section(&self, name: &str) -> Option<&IndexMap<String, String>> {
    self.sections.get(name)
  }

  pub fn require_section<'a>(
    &'a self,
    name: &'static str,
    path: &str,
  ) -> Result<&'a IndexMap<String, String>, ManifestError> {
    self
      .section(name)
      .ok_or_else(|| ManifestError::MissingSection {
        path: path.to_string(),
        section: name,
      })
  }

  pub fn require_key(
    map: &IndexMap<String, String>,
    section: &'static str,
    key: &'static str,
    path: &str,
  ) -> Result<String, ManifestError> {
    map
      .get(key)
      .cloned()
      .ok_or_else(|| ManifestError::MissingKey {
        path: path.to_string(),
        section,
        key,
      })
  }
}

/// Hand-rolled INI tokenizer (component C3). Supports `[section]` headers,
/// `key = value` / `key: value` assignments, `#`/`;` full-line comments,
/// blank lines, and trailing-backslash line continuations — the subset the
/// bundle and unit manifest formats actually use.
pub fn parse(text: &str, path: &str) -> Result<IniDocument, ManifestError> {
  let mut doc = IniDocument::default();
  let mut current_section: Option<String> = None;
  let mut pending: Option<(usize, String)> = None;

  for (idx, raw_line) in text.lines().enumerate() {
    let line_no = idx + 1;

    let (line, continues) = match raw_line.strip_suffix('\\') {
      Some(stripped) => (stripped, true),
      None => (raw_line, false),
    };

    if let Some((_, ref mut acc)) = pending {
      acc.push_str(line.trim_start());
      if continues {
        continue;
      }
      let (line_no, value) = pending.take().unwrap();
      apply_assignment(&mut doc, &current_section, line_no, &value, path)?;
      continue;
    }

    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
      continue;
    }

    if let Some(stripped) = trimmed.strip_prefix('[') {
      let name = stripped.trim_end().strip_suffix(']').ok_or_else(|| {
        ManifestError::Parse {
          path: path.to_string(),
          line: line_no,
          reason: "unterminated section header".to_string(),
        }
      })?;
      current_section = Some(name.trim().to_string());
      doc
        .sections
        .entry(name.trim().to_string())
        .or_default();
      continue;
    }

    if continues {
      pending = Some((line_no, trimmed.to_string()));
      continue;
    }

    apply_assignment(&mut doc, &current_section, line_no, trimmed, path)?;
  }

  if let Some((line_no, value)) = pending {
    apply_assignment(&mut doc, &current_section, line_no, &value, path)?;
  }

  Ok(doc)
}

fn apply_assignment(
  doc: &mut IniDocument,
  current_section: &Option<String>,
  line_no: usize,
  text: &str,
  path: &str,
) -> Result<(), ManifestError> {
  let split_at = text
    .find(['=', ':'])
    .ok_or_else(|| ManifestError::Parse {
      path: path.to_string(),
      line: line_no,
      reason: format!("expected 'key = value', got '{text}'"),
    })?;
  let key = text[..split_at].trim().to_string();
  let value = text[split_at + 1..].trim().to_string();

  let section = current_section.clone().ok_or_else(|| ManifestError::Parse {
    path: path.to_string(),
    line: line_no,
    reason: "assignment outside of any [section]".to_string(),
  })?;

  doc
    .sections
    .entry(section)
    .or_default()
    .insert(key, value);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_sections_and_keys() {
    let text = "[Meta]\nversion = 1\n\n[Config]\nmodules = hdfs,yarn\n";
    let doc = parse(text, "test").unwrap();
    assert_eq!(doc.section("Meta").unwrap().get("version").unwrap(), "1");
    assert_eq!(
      doc.section("Config").unwrap().get("modules").unwrap(),
      "hdfs,yarn"
    );
  }

  #[test]
  fn ignores_comments_and_blank_lines() {
    let text = "# comment\n[Meta]\n; also a comment\nversion = 1\n";
    let doc = parse(text, "test").unwrap();
    assert_eq!(doc.section("Meta").unwrap().len(), 1);
  }

  #[test]
  fn supports_colon_assignment() {
    let text = "[Unit]\nname: yarn\n";
    let doc = parse(text, "test").unwrap();
    assert_eq!(doc.section("Unit").unwrap().get("name").unwrap(), "yarn");
  }

  #[test]
  fn supports_line_continuation() {
    let text = "[Service]\nstart_cmd = /bin/run \\\n  --flag value\n";
    let doc = parse(text, "test").unwrap();
    assert_eq!(
      doc.section("Service").unwrap().get("start_cmd").unwrap(),
      "/bin/run --flag value"
    );
  }

  #[test]
  fn assignment_outside_section_is_an_error() {
    let text = "version = 1\n";
    assert!(parse(text, "test").is_err());
  }

  #[test]
  fn preserves_key_insertion_order() {
    let text = "[Environment]\nb = 2\na = 1\nc = 3\n";
    let doc = parse(text, "test").unwrap();
    let keys: Vec<&str> = doc
      .section("Environment")
      .unwrap()
      .keys()
      .map(|k| k.as_str())
      .collect();
    assert_eq!(keys, vec!["b", "a", "c"]);
  }
}
