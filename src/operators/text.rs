//! Operators over sequences of text.

use std::collections::BTreeMap;
use std::str::FromStr;

use regex::Regex;

use crate::error::{PipelineError, Result};
use crate::sequence::Sequence;

pub const URL_PATTERN: &str = r"https?://[/A-Za-z0-9:=?\-&.%]+";
pub const EMAIL_PATTERN: &str = r"[A-Za-z0-9_]+@[A-Za-z0-9_.]+[.][A-Za-z]+";

/// How a line is split into columns or tokens.
#[derive(Debug, Clone, Default)]
pub enum Separator {
    /// Runs of whitespace. Leading and trailing whitespace produce no empty fields.
    #[default]
    Whitespace,
    /// An exact string.
    Literal(String),
    /// A compiled regular expression.
    Regex(Regex),
}

impl Separator {
    /// Compile a regular expression separator.
    pub fn regex(pattern: &str) -> Result<Self> {
        compile(pattern).map(Separator::Regex)
    }

    fn split(&self, line: &str) -> Vec<String> {
        match self {
            Separator::Whitespace => line.split_whitespace().map(str::to_string).collect(),
            Separator::Literal(sep) => line.split(sep.as_str()).map(str::to_string).collect(),
            Separator::Regex(re) => re.split(line).map(str::to_string).collect(),
        }
    }
}

impl From<&str> for Separator {
    fn from(sep: &str) -> Self {
        Separator::Literal(sep.to_string())
    }
}

impl From<Regex> for Separator {
    fn from(re: Regex) -> Self {
        Separator::Regex(re)
    }
}

/// What [`Sequence::matching`] searches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Built-in `http`/`https` URL matcher.
    Url,
    /// Built-in e-mail address matcher.
    Email,
    /// A user-supplied regular expression.
    Regex(String),
}

impl Pattern {
    /// Compile the pattern.
    pub fn compile(&self) -> Result<Regex> {
        match self {
            Pattern::Url => compile(URL_PATTERN),
            Pattern::Email => compile(EMAIL_PATTERN),
            Pattern::Regex(source) => compile(source),
        }
    }
}

impl FromStr for Pattern {
    type Err = std::convert::Infallible;

    /// `URL` and `EMAIL` select the built-ins; anything else is a regex.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "URL" => Pattern::Url,
            "EMAIL" => Pattern::Email,
            other => Pattern::Regex(other.to_string()),
        })
    }
}

/// What [`Sequence::matching`] emits for each line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// The whole line, if it matches.
    #[default]
    Keep,
    /// Every match found in the line, one element each.
    Extract,
    /// The whole line, if it does not match.
    Negate,
}

impl FromStr for MatchMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "keep" => Ok(MatchMode::Keep),
            "extract" => Ok(MatchMode::Extract),
            "negate" => Ok(MatchMode::Negate),
            other => Err(PipelineError::invalid(
                "match",
                format!("Unknown mode '{other}'"),
            )),
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|err| PipelineError::Pattern {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })
}

impl Sequence<String> {
    /// Drop empty strings.
    pub fn not_empty(self) -> Sequence<String> {
        self.filter(|line| !line.is_empty())
    }

    /// Split every line into columns, like `awk`.
    pub fn columns(self, sep: impl Into<Separator>) -> Sequence<Vec<String>> {
        let sep = sep.into();
        self.map(move |line| sep.split(&line))
    }

    /// Split every line into columns keyed by `names`.
    ///
    /// A row shorter than `names` lacks the missing keys; extra fields are
    /// dropped.
    pub fn columns_named<N>(self, names: N, sep: impl Into<Separator>) -> Sequence<BTreeMap<String, String>>
    where
        N: IntoIterator,
        N::Item: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        self.columns(sep)
            .map(move |row| names.iter().cloned().zip(row).collect())
    }

    /// Split every line and emit the pieces as one flat sequence.
    pub fn tokens(self, sep: impl Into<Separator>) -> Sequence<String> {
        let sep = sep.into();
        self.flat_map(move |line| sep.split(&line))
    }

    /// Select lines, or parts of lines, that match `pattern`.
    pub fn matching(self, pattern: Pattern, mode: MatchMode) -> Result<Sequence<String>> {
        let re = pattern.compile()?;
        Ok(match mode {
            MatchMode::Keep => self.filter(move |line| re.is_match(line)),
            MatchMode::Negate => self.filter(move |line| !re.is_match(line)),
            MatchMode::Extract => self.flat_map(move |line| {
                re.find_iter(&line)
                    .map(|m| m.as_str().to_string())
                    .collect::<Vec<_>>()
            }),
        })
    }

    /// Replace every match of `pattern` in each line.
    ///
    /// `with` may use `$1`-style group references.
    pub fn replace(self, pattern: Regex, with: impl Into<String>) -> Sequence<String> {
        let with = with.into();
        self.map(move |line| pattern.replace_all(&line, with.as_str()).into_owned())
    }

    /// Strip leading and trailing whitespace from each line.
    pub fn trim(self) -> Sequence<String> {
        self.map(|line| line.trim().to_string())
    }

    /// Join the whole sequence into a single string.
    pub fn join_text(self, sep: impl Into<String>) -> Sequence<String> {
        let sep = sep.into();
        self.collect().map(move |lines| lines.join(&sep))
    }

    /// Join the whole sequence into one line, replacing newlines with spaces.
    pub fn single_line(self) -> Sequence<String> {
        self.join_text(" ").map(|text| text.replace(['\r', '\n'], " "))
    }
}
