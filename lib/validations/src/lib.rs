//! # Input Validation Module
//!
//! This module provides validation functions for manifest-derived inputs
//! (service names, environment variable names) to prevent malformed
//! manifests from producing unusable plans.

use std::sync::OnceLock;

use anyhow::{Context, anyhow};
use regex::Regex;

/// Options to validate input strings to have certain properties.
/// This ensures only valid data can enter the system.
///
/// ## Usage
///
/// ```
/// StringValidator::default()
///   .min_length(1)
///   .max_length(100)
///   .matches(StringValidatorMatches::ServiceName)
///   .validate("hdfs-namenode")?
/// ```
#[derive(Default)]
pub struct StringValidator {
  /// Specify the minimum length of string.
  /// Setting `0` will effectively skip this validation.
  pub min_length: usize,
  /// Specify max length of string, or None to allow arbitrary length.
  pub max_length: Option<usize>,
  /// Skip the control character check.
  /// Most values should not contain these by default.
  pub skip_control_check: bool,
  /// Specify a pattern to validate the string contents.
  pub matches: Option<StringValidatorMatches>,
}

impl StringValidator {
  /// Returns Ok if input passes validations, otherwise includes
  /// error with failure reason.
  pub fn validate(&self, input: &str) -> anyhow::Result<()> {
    let len = input.len();

    if len < self.min_length {
      return Err(anyhow!(
        "Input too short. Must be at least {} characters.",
        self.min_length
      ));
    }

    if let Some(max_length) = self.max_length
      && len > max_length
    {
      return Err(anyhow!(
        "Input too long. Must be at most {max_length} characters."
      ));
    }

    if !self.skip_control_check {
      validate_no_control_chars(input)?;
    }

    if let Some(matches) = &self.matches {
      matches.validate(input)?
    }

    Ok(())
  }

  pub fn min_length(mut self, min_length: usize) -> StringValidator {
    self.min_length = min_length;
    self
  }

  pub fn max_length(
    mut self,
    max_length: impl Into<Option<usize>>,
  ) -> StringValidator {
    self.max_length = max_length.into();
    self
  }

  pub fn skip_control_check(mut self) -> StringValidator {
    self.skip_control_check = true;
    self
  }

  pub fn matches(
    mut self,
    matches: impl Into<Option<StringValidatorMatches>>,
  ) -> StringValidator {
    self.matches = matches.into();
    self
  }
}

pub enum StringValidatorMatches {
  /// - alphanumeric characters
  /// - underscores
  VariableName,
  /// - alphanumeric characters
  /// - underscores
  /// - hyphens
  ServiceName,
}

impl StringValidatorMatches {
  /// Returns Ok if input passes validations, otherwise includes
  /// error with failure reason.
  fn validate(&self, input: &str) -> anyhow::Result<()> {
    let validate = || match self {
      StringValidatorMatches::VariableName => {
        static VARIABLE_NAME_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = VARIABLE_NAME_REGEX.get_or_init(|| {
          Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$")
            .expect("failed to initialize variable name regex")
        });
        if regex.is_match(input) {
          Ok(())
        } else {
          Err(anyhow!(
            "Only alphanumeric characters and underscores are allowed"
          ))
        }
      }

      StringValidatorMatches::ServiceName => {
        static SERVICE_NAME_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = SERVICE_NAME_REGEX.get_or_init(|| {
          Regex::new(r"^[a-zA-Z0-9_-]+$")
            .expect("failed to initialize service name regex")
        });
        if regex.is_match(input) {
          Ok(())
        } else {
          Err(anyhow!(
            "Only alphanumeric characters, underscores, and hyphens are allowed"
          ))
        }
      }
    };
    validate().context("Invalid characters in input")
  }
}

fn validate_no_control_chars(input: &str) -> anyhow::Result<()> {
  for (index, char) in input.chars().enumerate() {
    if char.is_control() {
      return Err(anyhow!(
        "Control character at index {index}. Input: \"{input}\""
      ));
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn variable_name_rejects_leading_digit() {
    let v = StringValidator::default()
      .matches(StringValidatorMatches::VariableName);
    assert!(v.validate("1BAD").is_err());
    assert!(v.validate("JAVA_HOME").is_ok());
  }

  #[test]
  fn service_name_allows_hyphens() {
    let v = StringValidator::default()
      .matches(StringValidatorMatches::ServiceName);
    assert!(v.validate("hdfs-namenode").is_ok());
    assert!(v.validate("bad name").is_err());
  }

  #[test]
  fn control_characters_are_rejected_by_default() {
    let v = StringValidator::default();
    assert!(v.validate("has\ttab").is_err());
  }

  #[test]
  fn length_bounds_are_enforced() {
    let v = StringValidator::default().min_length(3).max_length(5);
    assert!(v.validate("ab").is_err());
    assert!(v.validate("abcdef").is_err());
    assert!(v.validate("abcd").is_ok());
  }
}
