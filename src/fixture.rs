//! Parser for the line-oriented SPF conformance-suite text format.
//!
//! The format drives spfquery-style harnesses: `default <params>` sets
//! parameters inherited by every following query, `spfquery <params>`
//! opens a test case, and `result` / `smtp-comment` / `received-spf` /
//! `header-comment` lines attach expectations to the open case until the
//! next `spfquery` or end-of-file. `#`-prefixed and blank lines are
//! comments.

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FixtureError {
    #[error("bad format: {0}")]
    BadLine(String),
    #[error("unknown directive: {0}")]
    UnknownDirective(String),
    #[error("expectation before any spfquery: {0}")]
    DirectiveOutsideCase(String),
}

/// Query parameters, accumulated from `-key=value` tokens split on the
/// first `=`. Explicit per-query parameters override defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pub ip: Option<String>,
    pub sender: Option<String>,
    pub helo: Option<String>,
    pub rcpt_to: Option<String>,
    pub local: Option<String>,
}

impl QueryParams {
    fn apply(&mut self, params: &str) {
        for token in params.split_whitespace() {
            let Some(token) = token.strip_prefix('-') else {
                continue;
            };
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            match key {
                "ip" => self.ip = Some(value.to_string()),
                "sender" => self.sender = Some(value.to_string()),
                "helo" => self.helo = Some(value.to_string()),
                "rcpt-to" => self.rcpt_to = Some(value.to_string()),
                "local" => self.local = Some(value.to_string()),
                _ => {}
            }
        }
    }

    fn merged_over(&self, defaults: &QueryParams) -> QueryParams {
        QueryParams {
            ip: self.ip.clone().or_else(|| defaults.ip.clone()),
            sender: self.sender.clone().or_else(|| defaults.sender.clone()),
            helo: self.helo.clone().or_else(|| defaults.helo.clone()),
            rcpt_to: self.rcpt_to.clone().or_else(|| defaults.rcpt_to.clone()),
            local: self.local.clone().or_else(|| defaults.local.clone()),
        }
    }
}

/// An expected value: either a literal string or a `/regex/` that must
/// match the whole actual value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    Exact(String),
    Pattern(String),
}

impl Expectation {
    fn parse(raw: &str) -> Self {
        if raw.len() >= 2 && raw.starts_with('/') && raw.ends_with('/') {
            Expectation::Pattern(raw[1..raw.len() - 1].to_string())
        } else {
            Expectation::Exact(raw.to_string())
        }
    }

    /// Compare against an actual value. Patterns must match the entire
    /// string; an unparsable pattern never matches.
    pub fn matches(&self, actual: &str) -> bool {
        match self {
            Expectation::Exact(expected) => expected == actual,
            Expectation::Pattern(pattern) => Regex::new(&format!("^(?:{pattern})$"))
                .map(|re| re.is_match(actual))
                .unwrap_or(false),
        }
    }
}

/// One `spfquery` block with its accumulated expectations. The first
/// directive of each kind wins; later duplicates are ignored.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub params: QueryParams,
    pub result: Option<Expectation>,
    pub smtp_comment: Option<Expectation>,
    pub received_spf: Option<Expectation>,
    pub header_comment: Option<Expectation>,
}

impl TestCase {
    fn new(name: &str, params: QueryParams) -> Self {
        Self {
            name: name.to_string(),
            params,
            result: None,
            smtp_comment: None,
            received_spf: None,
            header_comment: None,
        }
    }
}

/// Parse a whole fixture file into its test cases.
pub fn parse(text: &str) -> Result<Vec<TestCase>, FixtureError> {
    let mut cases = Vec::new();
    let mut defaults = QueryParams::default();
    let mut current: Option<TestCase> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(params) = line.strip_prefix("default ") {
            defaults.apply(params);
            continue;
        }

        if let Some(params) = line.strip_prefix("spfquery ") {
            if let Some(done) = current.take() {
                cases.push(done);
            }
            let mut query = QueryParams::default();
            query.apply(params);
            current = Some(TestCase::new(params.trim(), query.merged_over(&defaults)));
            continue;
        }

        // Expectation line: <keyword> /selector/ <value>
        let (keyword, value) = split_directive(line)?;
        let case = current
            .as_mut()
            .ok_or_else(|| FixtureError::DirectiveOutsideCase(line.to_string()))?;
        match keyword {
            "result" => {
                if case.result.is_none() {
                    case.result = Some(Expectation::parse(value));
                }
            }
            "smtp-comment" => {
                if case.smtp_comment.is_none() {
                    case.smtp_comment = Some(Expectation::parse(value));
                }
            }
            "received-spf" => {
                if case.received_spf.is_none() {
                    let value = value.strip_prefix("Received-SPF: ").unwrap_or(value);
                    case.received_spf = Some(Expectation::parse(value));
                }
            }
            "header-comment" => {
                if case.header_comment.is_none() {
                    case.header_comment = Some(Expectation::parse(value));
                }
            }
            other => return Err(FixtureError::UnknownDirective(other.to_string())),
        }
    }

    if let Some(done) = current.take() {
        cases.push(done);
    }

    Ok(cases)
}

/// Split an expectation line into keyword and value, discarding the
/// `/selector/` middle token.
fn split_directive(line: &str) -> Result<(&str, &str), FixtureError> {
    let (keyword, rest) = line
        .split_once(char::is_whitespace)
        .ok_or_else(|| FixtureError::BadLine(line.to_string()))?;
    let rest = rest.trim_start();
    let (selector, value) = rest
        .split_once(char::is_whitespace)
        .ok_or_else(|| FixtureError::BadLine(line.to_string()))?;
    if !(selector.len() >= 2 && selector.starts_with('/') && selector.ends_with('/')) {
        return Err(FixtureError::BadLine(line.to_string()));
    }
    Ok((keyword, value.trim_start()))
}
