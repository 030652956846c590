// Copyright 2026 The Relay Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Typed configuration, populated by a single validating loader from YAML
//! rather than an untyped configuration dictionary read ad hoc by a single
//! validating loader; the expression form is a two-step load: parse
//! string, evaluate arithmetic over integer literals only."

use std::path::PathBuf;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::depot_path::ViewLine;

/// A tunable that YAML may express either as a bare integer or as a string
/// of integer literals combined with `+ - * /`, e.g. `"60 * 5"`. Evaluated
/// once at load time; never re-evaluated, never holds variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntExpr(pub i64);

impl IntExpr {
    pub fn get(self) -> i64 {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum IntExprError {
    #[error("empty expression")]
    Empty,
    #[error("unexpected token {0:?}")]
    UnexpectedToken(String),
    #[error("division by zero in expression")]
    DivisionByZero,
    #[error("unbalanced expression")]
    Unbalanced,
}

/// Parses and evaluates a two-step integer expression: tokenize into
/// integer literals and `+ - * /`, then evaluate left-to-right with the
/// usual `*`/`/` precedence over `+`/`-`. No parentheses, no variables, no
/// function calls — by design, so that a config value can never reach
/// outside itself.
pub fn eval_int_expr(expr: &str) -> Result<IntExpr, IntExprError> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(IntExprError::Empty);
    }
    let mut terms: Vec<i64> = Vec::new();
    let mut term_ops: Vec<char> = Vec::new();
    let mut iter = tokens.into_iter().peekable();
    let mut current = next_number(&mut iter)?;
    loop {
        match iter.next() {
            None => break,
            Some(Token::Op('*')) => current *= next_number(&mut iter)?,
            Some(Token::Op('/')) => {
                let divisor = next_number(&mut iter)?;
                if divisor == 0 {
                    return Err(IntExprError::DivisionByZero);
                }
                current /= divisor;
            }
            Some(Token::Op(op @ ('+' | '-'))) => {
                terms.push(current);
                term_ops.push(op);
                current = next_number(&mut iter)?;
            }
            Some(Token::Op(other)) => return Err(IntExprError::UnexpectedToken(other.to_string())),
            Some(Token::Number(_)) => return Err(IntExprError::Unbalanced),
        }
    }
    terms.push(current);
    let mut total = terms[0];
    for (op, term) in term_ops.iter().zip(&terms[1..]) {
        match op {
            '+' => total += term,
            '-' => total -= term,
            _ => unreachable!(),
        }
    }
    Ok(IntExpr(total))
}

enum Token {
    Number(i64),
    Op(char),
}

fn tokenize(expr: &str) -> Result<Vec<Token>, IntExprError> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() {
            let mut num = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() {
                    num.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Number(num.parse().map_err(|_| {
                IntExprError::UnexpectedToken(num.clone())
            })?));
        } else if "+-*/".contains(c) {
            tokens.push(Token::Op(c));
            chars.next();
        } else {
            return Err(IntExprError::UnexpectedToken(c.to_string()));
        }
    }
    Ok(tokens)
}

fn next_number(iter: &mut std::iter::Peekable<std::vec::IntoIter<Token>>) -> Result<i64, IntExprError> {
    match iter.next() {
        Some(Token::Number(n)) => Ok(n),
        _ => Err(IntExprError::Unbalanced),
    }
}

/// A single repository endpoint (`source` or `target`): connection details
/// plus, for the source, nothing beyond the protocol parameters since the
/// source is never written to.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub port: String,
    pub user: String,
    pub client: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_charset")]
    pub charset: String,
}

fn default_charset() -> String {
    "none".to_string()
}

fn de_int_expr<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(i64),
        Expr(String),
    }
    match Repr::deserialize(deserializer)? {
        Repr::Int(n) => Ok(n),
        Repr::Expr(s) => eval_int_expr(&s).map(IntExpr::get).map_err(serde::de::Error::custom),
    }
}

fn de_opt_int_expr<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(i64),
        Expr(String),
        Unset,
    }
    match Option::<Repr>::deserialize(deserializer)? {
        None | Some(Repr::Unset) => Ok(None),
        Some(Repr::Int(n)) => Ok(Some(n)),
        Some(Repr::Expr(s)) => eval_int_expr(&s)
            .map(|v| Some(v.get()))
            .map_err(serde::de::Error::custom),
    }
}

/// The full recognized set of YAML keys.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub counter_name: String,

    #[serde(default)]
    pub case_sensitive: bool,

    #[serde(default, deserialize_with = "de_opt_int_expr")]
    pub historical_start_change: Option<i64>,

    #[serde(deserialize_with = "de_int_expr")]
    pub poll_interval: i64,
    #[serde(deserialize_with = "de_int_expr")]
    pub sleep_on_error_interval: i64,
    #[serde(deserialize_with = "de_int_expr")]
    pub report_interval: i64,
    #[serde(deserialize_with = "de_int_expr")]
    pub error_report_interval: i64,
    #[serde(deserialize_with = "de_int_expr")]
    pub summary_report_interval: i64,
    #[serde(deserialize_with = "de_int_expr")]
    pub max_logfile_size: i64,
    #[serde(deserialize_with = "de_int_expr")]
    pub change_batch_size: i64,
    #[serde(deserialize_with = "de_int_expr")]
    pub sync_progress_size_interval: i64,

    #[serde(default = "default_description_format")]
    pub change_description_format: String,

    #[serde(default)]
    pub change_map_file: Option<String>,

    #[serde(default)]
    pub superuser: bool,

    #[serde(default)]
    pub ignore_files: Vec<String>,

    pub views: Vec<ViewLine>,

    pub workspace_root: PathBuf,

    pub source: EndpointConfig,
    pub target: EndpointConfig,
}

fn default_description_format() -> String {
    "$sourceDescription\n\n(cherry picked from $sourcePort@$sourceChange by $sourceUser)"
        .to_string()
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read configuration file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration cannot be parsed as YAML")]
    Parse(#[source] serde_yaml::Error),
    #[error("configuration is invalid: {0}")]
    Invalid(String),
}

impl Config {
    /// Parses YAML text into a validated `Config`, running deserialization
    /// and semantic validation (`validate`) as a single pass so callers
    /// never see a structurally valid but semantically broken config.
    pub fn parse(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(ConfigLoadError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ConfigLoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.counter_name.trim().is_empty() {
            return Err(ConfigLoadError::Invalid(
                "counter_name must not be empty".to_string(),
            ));
        }
        if self.change_batch_size <= 0 {
            return Err(ConfigLoadError::Invalid(
                "change_batch_size must be positive".to_string(),
            ));
        }
        if self.views.is_empty() {
            return Err(ConfigLoadError::Invalid(
                "views must contain at least one mapping".to_string(),
            ));
        }
        for pattern in &self.ignore_files {
            Regex::new(pattern).map_err(|e| {
                ConfigLoadError::Invalid(format!("invalid ignore_files pattern {pattern:?}: {e}"))
            })?;
        }
        Ok(())
    }

    /// Renders `change_description_format`, substituting the four
    /// recognized placeholders.
    pub fn render_description(
        &self,
        source_description: &str,
        source_change: u64,
        source_port: &str,
        source_user: &str,
    ) -> String {
        self.change_description_format
            .replace("$sourceDescription", source_description)
            .replace("$sourceChange", &source_change.to_string())
            .replace("$sourcePort", source_port)
            .replace("$sourceUser", source_user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_plain_integer_and_arithmetic_expression() {
        assert_eq!(eval_int_expr("42").unwrap().get(), 42);
        assert_eq!(eval_int_expr("60 * 5").unwrap().get(), 300);
        assert_eq!(eval_int_expr("10 + 2 * 3").unwrap().get(), 36);
        assert_eq!(eval_int_expr("100 / 4 - 5").unwrap().get(), 20);
    }

    #[test]
    fn rejects_division_by_zero_and_empty() {
        assert!(eval_int_expr("1 / 0").is_err());
        assert!(eval_int_expr("").is_err());
        assert!(eval_int_expr("1 + ").is_err());
    }

    const MINIMAL_YAML: &str = r#"
counter_name: relay_main
poll_interval: 30
sleep_on_error_interval: 5
report_interval: "60 * 60"
error_report_interval: 3600
summary_report_interval: 86400
max_logfile_size: 10000000
change_batch_size: 1000
sync_progress_size_interval: 1000000
views:
  - src: "//depot/main/..."
    targ: "main"
workspace_root: /tmp/relay
source:
  port: perforce:1666
  user: relay
  client: relay_source
target:
  port: target:1667
  user: relay
  client: relay_target
"#;

    #[test]
    fn loads_minimal_valid_config() {
        let config = Config::parse(MINIMAL_YAML).unwrap();
        assert_eq!(config.counter_name, "relay_main");
        assert_eq!(config.report_interval, 3600);
        assert!(!config.case_sensitive);
        assert_eq!(config.historical_start_change, None);
    }

    #[test]
    fn rejects_missing_views() {
        let yaml = MINIMAL_YAML.replace(
            "views:\n  - src: \"//depot/main/...\"\n    targ: \"main\"\n",
            "views: []\n",
        );
        assert!(Config::parse(&yaml).is_err());
    }

    #[test]
    fn renders_description_template() {
        let config = Config::parse(MINIMAL_YAML).unwrap();
        let rendered =
            config.render_description("fix bug", 42, "perforce:1666", "alice");
        assert!(rendered.contains("fix bug"));
        assert!(rendered.contains("42"));
        assert!(rendered.contains("alice"));
    }
}
