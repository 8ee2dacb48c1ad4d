//! Parser and runner for textual pipeline files.
//!
//! Pipeline format (CMS Pipelines style):
//! ```text
//! # Top ten words of the input
//! PIPE CONSOLE
//! | TOKENS
//! | LOWER
//! | SORT
//! | UNIQUECOUNT
//! | TAKE 10
//! | CONSOLE
//! ?
//! ```
//!
//! - `PIPE <stage>` starts the pipeline
//! - `| <stage>` continues to the next stage
//! - `?` marks the end of the pipeline; anything after it is ignored
//! - Lines starting with `#` are comments
//! - Arguments are separated by whitespace. An argument starting with `"` or
//!   `'` is delimited: it runs up to the next occurrence of that character
//!   and may contain spaces.
//! - `LITERAL` takes the rest of its line verbatim, without delimiters.
//!
//! The first stage must be a source operator (see
//! [`OperatorKind::Source`](crate::registry::OperatorKind)). A first-stage
//! `CONSOLE` reads the program input; any other source produces its own data.
//! Every stage name is resolved through [`registry::OPERATORS`](crate::registry::OPERATORS).

use crate::config::Settings;
use crate::error::{PipelineError, Result};
use crate::registry::{self, OperatorDescriptor, OperatorKind};
use crate::sequence::Sequence;

/// One parsed pipeline stage.
#[derive(Debug, Clone)]
pub struct Stage {
    pub operator: &'static OperatorDescriptor,
    pub args: Vec<String>,
    /// 1-based line number in the pipeline text.
    pub line: usize,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        self.operator.name
    }
}

impl PartialEq for Stage {
    fn eq(&self, other: &Self) -> bool {
        self.operator.name == other.operator.name && self.args == other.args
    }
}

/// Parse pipeline text into stages.
pub fn parse_pipeline(text: &str) -> Result<Vec<Stage>> {
    let mut stages = Vec::new();

    for (line_num, line) in text.lines().enumerate() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line == "?" {
            break;
        }

        // Handle "PIPE STAGE" - extract stage after PIPE
        let line = if line.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("PIPE ")) {
            line[5..].trim()
        } else if line.eq_ignore_ascii_case("PIPE") {
            continue;
        } else {
            line
        };

        // Handle continuation lines: "| STAGE ..."
        let line = line.strip_prefix('|').map(str::trim).unwrap_or(line);

        // A trailing ? closes the pipeline after this stage
        let (line, last) = match line.strip_suffix('?') {
            Some(stripped) => (stripped.trim_end(), true),
            None => (line, false),
        };

        if !line.is_empty() {
            let stage = parse_stage(line).map_err(|message| PipelineError::Parse {
                line: line_num + 1,
                message,
            })?;
            stages.push(Stage {
                line: line_num + 1,
                ..stage
            });
        }
        if last {
            break;
        }
    }

    Ok(stages)
}

/// Parse a single stage line.
fn parse_stage(line: &str) -> std::result::Result<Stage, String> {
    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };
    let operator = registry::lookup(name).ok_or_else(|| format!("Unknown command: {name}"))?;

    // LITERAL does not use delimiters; everything after the name is the text
    let args = if operator.name == "LITERAL" {
        if rest.is_empty() {
            Vec::new()
        } else {
            vec![rest.to_string()]
        }
    } else {
        split_args(rest)?
    };

    if !operator.arity.accepts(args.len()) {
        return Err(format!(
            "{} takes {} argument(s), got {}",
            operator.name,
            operator.arity,
            args.len()
        ));
    }

    Ok(Stage {
        operator,
        args,
        line: 0,
    })
}

/// Split stage arguments on whitespace, honoring delimited strings.
fn split_args(rest: &str) -> std::result::Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut rest = rest.trim_start();
    while !rest.is_empty() {
        if rest.starts_with(['"', '\'']) {
            let (arg, after) = parse_delimited_string(rest)?;
            args.push(arg);
            rest = after.trim_start();
        } else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            args.push(rest[..end].to_string());
            rest = rest[end..].trim_start();
        }
    }
    Ok(args)
}

/// Parse a delimited string using CMS Pipelines convention.
/// The first non-blank character is the delimiter, and the string
/// continues until the next occurrence of that delimiter.
/// Returns (extracted_string, rest_of_input).
fn parse_delimited_string(s: &str) -> std::result::Result<(String, &str), String> {
    let s = s.trim_start();
    let Some(delim) = s.chars().next() else {
        return Err("Expected delimited string".to_string());
    };
    let after_delim = &s[delim.len_utf8()..];

    match after_delim.find(delim) {
        Some(end) => Ok((
            after_delim[..end].to_string(),
            &after_delim[end + delim.len_utf8()..],
        )),
        None => Err(format!("Unclosed delimiter '{delim}'")),
    }
}

/// Chain `stages` into one sequence.
///
/// `input` feeds a first-stage `CONSOLE`; it is released unused otherwise.
pub fn run_pipeline(
    stages: &[Stage],
    input: Sequence<String>,
    settings: &Settings,
) -> Result<Sequence<String>> {
    let Some((first, rest)) = stages.split_first() else {
        return Err(PipelineError::Pipeline("Pipeline is empty".to_string()));
    };
    if first.operator.kind != OperatorKind::Source {
        return Err(PipelineError::Pipeline(format!(
            "{} cannot be the first stage (try CONSOLE, LITERAL, READ or DIR)",
            first.name()
        )));
    }

    tracing::debug!(stage = first.name(), line = first.line, "building source stage");
    let mut current = if first.name() == "CONSOLE" {
        input
    } else {
        input.terminate();
        (first.operator.build)(None, &first.args, settings)?
    };

    for stage in rest {
        tracing::debug!(stage = stage.name(), line = stage.line, args = ?stage.args, "building stage");
        current = (stage.operator.build)(Some(current), &stage.args, settings).map_err(|err| {
            match err {
                PipelineError::Pipeline(message) => {
                    PipelineError::Pipeline(format!("Line {}: {message}", stage.line))
                }
                other => other,
            }
        })?;
    }
    Ok(current)
}

/// Parse `text` and run it against `input`.
pub fn run(text: &str, input: Sequence<String>, settings: &Settings) -> Result<Sequence<String>> {
    let stages = parse_pipeline(text)?;
    run_pipeline(&stages, input, settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Sequence<String> {
        Sequence::from_collection(items.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    fn names(stages: &[Stage]) -> Vec<&'static str> {
        stages.iter().map(Stage::name).collect()
    }

    #[test]
    fn test_parse_pipe_format() {
        let text = "# comment\nPIPE CONSOLE\n| locate \"two words\"\n| TAKE 5\n| CONSOLE\n?\n| SORT\n";
        let stages = parse_pipeline(text).unwrap();
        assert_eq!(names(&stages), vec!["CONSOLE", "LOCATE", "TAKE", "CONSOLE"]);
        assert_eq!(stages[1].args, vec!["two words"]);
        assert_eq!(stages[1].line, 3);
        assert_eq!(stages[2].args, vec!["5"]);
    }

    #[test]
    fn test_parse_trailing_terminator() {
        let stages = parse_pipeline("PIPE LITERAL hi\n| UPPER ?\n| SORT").unwrap();
        assert_eq!(names(&stages), vec!["LITERAL", "UPPER"]);
    }

    #[test]
    fn test_parse_literal_keeps_text() {
        let stages = parse_pipeline("PIPE LITERAL \"quoted\"  text").unwrap();
        assert_eq!(stages[0].args, vec!["\"quoted\"  text"]);
    }

    #[test]
    fn test_parse_delimited_args() {
        let stages = parse_pipeline("PIPE CONSOLE\n| CHANGE 'a b' \"c\"").unwrap();
        assert_eq!(stages[1].args, vec!["a b", "c"]);
    }

    #[test]
    fn test_parse_errors_carry_line() {
        let err = parse_pipeline("PIPE CONSOLE\n| FROBNICATE").unwrap_err();
        match err {
            PipelineError::Parse { line, message } => {
                assert_eq!(line, 2);
                assert!(message.contains("FROBNICATE"));
            }
            other => panic!("Expected Parse error, got {other:?}"),
        }

        let err = parse_pipeline("PIPE CONSOLE\n| LOCATE \"open").unwrap_err();
        assert!(err.to_string().contains("Unclosed delimiter"));

        let err = parse_pipeline("PIPE CONSOLE\n| TAKE").unwrap_err();
        assert!(err.to_string().contains("TAKE takes 1 argument(s), got 0"));
    }

    #[test]
    fn test_parse_delimited_string() {
        let (s, rest) = parse_delimited_string("/abc/ tail").unwrap();
        assert_eq!(s, "abc");
        assert_eq!(rest, " tail");
        assert!(parse_delimited_string("").is_err());
    }

    #[test]
    fn test_run_console_pipeline() {
        let text = "PIPE CONSOLE\n| NLOCATE skip\n| UPPER\n| SORT\n?";
        let out = run(text, lines(&["b", "skip me", "a"]), &Settings::default())
            .unwrap()
            .values()
            .unwrap();
        assert_eq!(out, vec!["A", "B"]);
    }

    #[test]
    fn test_run_literal_source_ignores_input() {
        let input = lines(&["unused"]);
        let handle = input.handle().clone();
        let out = run("PIPE LITERAL hello world\n| UPPER", input, &Settings::default())
            .unwrap()
            .values()
            .unwrap();
        assert_eq!(out, vec!["HELLO WORLD"]);
        assert!(handle.is_terminated());
    }

    #[test]
    fn test_run_rejects_non_source_first() {
        let err = run("PIPE SORT", lines(&[]), &Settings::default()).unwrap_err();
        assert!(err.to_string().contains("SORT cannot be the first stage"));
    }

    #[test]
    fn test_run_rejects_empty() {
        let err = run("# nothing\n", lines(&[]), &Settings::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Pipeline(_)));
    }

    #[test]
    fn test_validation_error_before_pull() {
        let err = run("PIPE CONSOLE\n| TAKE 0", lines(&["a"]), &Settings::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument { operator: "first", .. }));
    }

    #[test]
    fn test_huge_counts_from_text() {
        let out = run("PIPE CONSOLE\n| BATCH 18446744073709551615", lines(&["a", "b"]), &Settings::default())
            .unwrap()
            .values()
            .unwrap();
        assert_eq!(out, vec!["a b"]);

        let text = "PIPE CONSOLE\n| BATCH 18446744073709551615\n| SKIP -9223372036854775808";
        let out = run(text, lines(&["a", "b"]), &Settings::default())
            .unwrap()
            .values()
            .unwrap();
        assert!(out.is_empty());

        let out = run("PIPE CONSOLE\n| LAST 18446744073709551615", lines(&["a", "b"]), &Settings::default())
            .unwrap()
            .values()
            .unwrap();
        assert_eq!(out, vec!["a", "b"]);
    }

    #[test]
    fn test_word_frequency_pipeline() {
        let text = "PIPE CONSOLE\n| TOKENS\n| LOWER\n| SORT\n| UNIQUECOUNT\n| TAKE 2";
        let out = run(text, lines(&["the cat", "The dog"]), &Settings::default())
            .unwrap()
            .values()
            .unwrap();
        assert_eq!(out, vec!["1\tcat", "1\tdog"]);
    }
}
