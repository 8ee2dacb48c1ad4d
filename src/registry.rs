//! Static operator table for textual pipelines.
//!
//! Every stage of a pipeline file is resolved by name through [`OPERATORS`].
//! Stages work on sequences of text lines: each entry's `build` function
//! receives the upstream sequence (`None` when the stage starts the
//! pipeline), its raw arguments and the run's [`Settings`].

use std::time::Duration;

use crate::config::Settings;
use crate::error::{PipelineError, Result};
use crate::exec::ExecConfig;
use crate::operators::text::{MatchMode, Pattern, Separator};
use crate::sequence::Sequence;

/// How a stage consumes its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    /// Can start a pipeline.
    Source,
    /// Emits as it pulls, in input order.
    Streaming,
    /// Drains its whole input before emitting.
    Blocking,
    /// Emits in completion order.
    Unordered,
}

/// Accepted number of arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    const fn exactly(n: usize) -> Self {
        Self { min: n, max: Some(n) }
    }

    const fn between(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    const fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }

    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min && self.max.is_none_or(|max| count <= max)
    }
}

impl std::fmt::Display for Arity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{max}"),
            Some(max) => write!(f, "{}..{}", self.min, max),
            None => write!(f, "{}+", self.min),
        }
    }
}

pub type BuildFn = fn(Option<Sequence<String>>, &[String], &Settings) -> Result<Sequence<String>>;

/// One entry of the operator table.
pub struct OperatorDescriptor {
    pub name: &'static str,
    pub kind: OperatorKind,
    pub summary: &'static str,
    pub arity: Arity,
    pub build: BuildFn,
}

impl std::fmt::Debug for OperatorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("arity", &self.arity)
            .finish()
    }
}

macro_rules! operator {
    ($name:literal, $kind:ident, $arity:expr, $build:expr, $summary:literal) => {
        OperatorDescriptor {
            name: $name,
            kind: OperatorKind::$kind,
            summary: $summary,
            arity: $arity,
            build: $build,
        }
    };
}

/// Every operator available to pipeline files.
pub static OPERATORS: &[OperatorDescriptor] = &[
    operator!("CONSOLE", Source, Arity::exactly(0), console,
        "Read stdin lines when first, otherwise print each line and pass it on"),
    operator!("LITERAL", Source, Arity::at_least(1), literal,
        "Emit the arguments as one line, before any input"),
    operator!("HOLE", Source, Arity::exactly(0), hole,
        "Discard all input and emit nothing"),
    operator!("READ", Source, Arity::at_least(0), read,
        "Read the files named by the arguments or by the input lines"),
    operator!("DIR", Source, Arity::at_least(0), dir,
        "List files matching suffix, glob or /regex/ patterns"),
    operator!("EXEC", Source, Arity::at_least(1), exec,
        "Run a program, piping input lines to its stdin"),
    operator!("HTTP", Source, Arity::at_least(0), http,
        "Fetch the URLs given as arguments or input lines"),
    operator!("POST", Streaming, Arity::exactly(1), post,
        "Send all input lines as one request body"),
    operator!("LOCATE", Streaming, Arity::exactly(1), locate,
        "Keep lines containing the text"),
    operator!("NLOCATE", Streaming, Arity::exactly(1), nlocate,
        "Keep lines not containing the text"),
    operator!("MATCH", Streaming, Arity::between(1, 2), match_lines,
        "Keep, extract or negate regex (or URL, EMAIL) matches"),
    operator!("CHANGE", Streaming, Arity::exactly(2), change,
        "Replace every occurrence of a text"),
    operator!("REPLACE", Streaming, Arity::exactly(2), replace,
        "Replace every regex match, with $1-style group references"),
    operator!("UPPER", Streaming, Arity::exactly(0), upper,
        "Convert lines to uppercase"),
    operator!("LOWER", Streaming, Arity::exactly(0), lower,
        "Convert lines to lowercase"),
    operator!("TRIM", Streaming, Arity::exactly(0), trim,
        "Strip surrounding whitespace"),
    operator!("NOTEMPTY", Streaming, Arity::exactly(0), not_empty,
        "Drop empty lines"),
    operator!("TOKENS", Streaming, Arity::between(0, 1), tokens,
        "Split lines into words, or on the given separator"),
    operator!("UNIQUE", Streaming, Arity::exactly(0), unique,
        "Drop lines equal to the previous one"),
    operator!("TAKE", Streaming, Arity::exactly(1), take,
        "Keep the first n lines"),
    operator!("SKIP", Streaming, Arity::exactly(1), skip,
        "Drop the first n lines, or the last -n"),
    operator!("REPEAT", Streaming, Arity::between(0, 1), repeat,
        "Replay the input cyclically until n lines were emitted"),
    operator!("BATCH", Streaming, Arity::between(1, 2), batch,
        "Join every n lines into one"),
    operator!("PAIR", Streaming, Arity::between(1, 2), pair,
        "Append a value to every line"),
    operator!("WAIT", Streaming, Arity::exactly(1), wait,
        "Sleep for n milliseconds before each line"),
    operator!("SORT", Blocking, Arity::exactly(0), sort,
        "Sort all lines"),
    operator!("COUNT", Blocking, Arity::exactly(0), count,
        "Emit the number of lines"),
    operator!("LAST", Blocking, Arity::exactly(1), last,
        "Keep the last n lines"),
    operator!("UNIQUECOUNT", Blocking, Arity::exactly(0), unique_count,
        "Collapse runs of equal lines into 'count<TAB>line'"),
    operator!("JOIN", Blocking, Arity::between(0, 1), join,
        "Join all lines into one"),
    operator!("SINGLELINE", Blocking, Arity::exactly(0), single_line,
        "Join all lines into one, replacing newlines with spaces"),
    operator!("XARGS", Unordered, Arity::at_least(1), xargs,
        "Run a program per line, with the line as last argument, in parallel"),
];

/// Find an operator by name, ignoring case.
pub fn lookup(name: &str) -> Option<&'static OperatorDescriptor> {
    OPERATORS.iter().find(|op| op.name.eq_ignore_ascii_case(name))
}

fn upstream(name: &'static str, input: Option<Sequence<String>>) -> Result<Sequence<String>> {
    input.ok_or_else(|| PipelineError::Pipeline(format!("{name} cannot be the first stage")))
}

fn number<N: std::str::FromStr>(name: &'static str, arg: &str) -> Result<N> {
    arg.parse()
        .map_err(|_| PipelineError::invalid(name, format!("Expected a number, got '{arg}'")))
}

/// Arguments when starting a pipeline, input lines otherwise.
fn args_or_input(input: Option<Sequence<String>>, args: &[String]) -> Sequence<String> {
    match input {
        Some(input) if args.is_empty() => input,
        Some(input) => {
            input.terminate();
            Sequence::from_collection(args.to_vec())
        }
        None => Sequence::from_collection(args.to_vec()),
    }
}

fn console(input: Option<Sequence<String>>, _: &[String], _: &Settings) -> Result<Sequence<String>> {
    Ok(match input {
        Some(input) => input.tap(|line| println!("{line}")),
        None => Sequence::from_stream(std::io::stdin()),
    })
}

fn literal(input: Option<Sequence<String>>, args: &[String], _: &Settings) -> Result<Sequence<String>> {
    let line = Sequence::from_value(args.join(" "));
    Ok(match input {
        Some(input) => line.concat([input]),
        None => line,
    })
}

fn hole(input: Option<Sequence<String>>, _: &[String], _: &Settings) -> Result<Sequence<String>> {
    Ok(match input {
        Some(input) => input.filter(|_| false),
        None => Sequence::empty(),
    })
}

fn read(input: Option<Sequence<String>>, args: &[String], settings: &Settings) -> Result<Sequence<String>> {
    Ok(args_or_input(input, args).read(settings.read_config()))
}

fn dir(input: Option<Sequence<String>>, args: &[String], settings: &Settings) -> Result<Sequence<String>> {
    Ok(args_or_input(input, args).dir(settings.scan_config()))
}

fn exec_config(args: &[String], settings: &Settings) -> ExecConfig {
    ExecConfig::default()
        .args(args.iter().skip(1).cloned())
        .output(settings.read_config())
}

fn exec(input: Option<Sequence<String>>, args: &[String], settings: &Settings) -> Result<Sequence<String>> {
    let config = exec_config(args, settings);
    Ok(match input {
        Some(input) => input.exec(args[0].clone(), config),
        None => Sequence::from_process(args[0].clone(), config),
    })
}

fn http(input: Option<Sequence<String>>, args: &[String], settings: &Settings) -> Result<Sequence<String>> {
    args_or_input(input, args).http(settings.http_config())
}

fn post(input: Option<Sequence<String>>, args: &[String], settings: &Settings) -> Result<Sequence<String>> {
    upstream("POST", input)?.post(args[0].clone(), settings.http_config())
}

fn locate(input: Option<Sequence<String>>, args: &[String], _: &Settings) -> Result<Sequence<String>> {
    let needle = args[0].clone();
    Ok(upstream("LOCATE", input)?.filter(move |line| line.contains(needle.as_str())))
}

fn nlocate(input: Option<Sequence<String>>, args: &[String], _: &Settings) -> Result<Sequence<String>> {
    let needle = args[0].clone();
    Ok(upstream("NLOCATE", input)?.filter(move |line| !line.contains(needle.as_str())))
}

fn match_lines(input: Option<Sequence<String>>, args: &[String], _: &Settings) -> Result<Sequence<String>> {
    let Ok(pattern) = args[0].parse::<Pattern>();
    let mode: MatchMode = args.get(1).map(|m| m.parse()).transpose()?.unwrap_or_default();
    upstream("MATCH", input)?.matching(pattern, mode)
}

fn change(input: Option<Sequence<String>>, args: &[String], _: &Settings) -> Result<Sequence<String>> {
    let (old, new) = (args[0].clone(), args[1].clone());
    Ok(upstream("CHANGE", input)?.map(move |line| line.replace(old.as_str(), &new)))
}

fn replace(input: Option<Sequence<String>>, args: &[String], _: &Settings) -> Result<Sequence<String>> {
    let pattern = Pattern::Regex(args[0].clone()).compile()?;
    Ok(upstream("REPLACE", input)?.replace(pattern, args[1].clone()))
}

fn upper(input: Option<Sequence<String>>, _: &[String], _: &Settings) -> Result<Sequence<String>> {
    Ok(upstream("UPPER", input)?.map(|line| line.to_uppercase()))
}

fn lower(input: Option<Sequence<String>>, _: &[String], _: &Settings) -> Result<Sequence<String>> {
    Ok(upstream("LOWER", input)?.map(|line| line.to_lowercase()))
}

fn trim(input: Option<Sequence<String>>, _: &[String], _: &Settings) -> Result<Sequence<String>> {
    Ok(upstream("TRIM", input)?.trim())
}

fn not_empty(input: Option<Sequence<String>>, _: &[String], _: &Settings) -> Result<Sequence<String>> {
    Ok(upstream("NOTEMPTY", input)?.not_empty())
}

fn tokens(input: Option<Sequence<String>>, args: &[String], _: &Settings) -> Result<Sequence<String>> {
    let sep = match args.first() {
        Some(sep) => Separator::from(sep.as_str()),
        None => Separator::Whitespace,
    };
    Ok(upstream("TOKENS", input)?.tokens(sep))
}

fn unique(input: Option<Sequence<String>>, _: &[String], _: &Settings) -> Result<Sequence<String>> {
    Ok(upstream("UNIQUE", input)?.unique())
}

fn take(input: Option<Sequence<String>>, args: &[String], _: &Settings) -> Result<Sequence<String>> {
    upstream("TAKE", input)?.first(number("first", &args[0])?)
}

fn skip(input: Option<Sequence<String>>, args: &[String], _: &Settings) -> Result<Sequence<String>> {
    upstream("SKIP", input)?.skip(number("skip", &args[0])?)
}

fn repeat(input: Option<Sequence<String>>, args: &[String], _: &Settings) -> Result<Sequence<String>> {
    let count = args.first().map(|n| number("repeat", n)).transpose()?;
    Ok(upstream("REPEAT", input)?.repeat(count))
}

fn batch(input: Option<Sequence<String>>, args: &[String], _: &Settings) -> Result<Sequence<String>> {
    let size = number("batch", &args[0])?;
    let sep = args.get(1).cloned().unwrap_or_else(|| " ".to_string());
    Ok(upstream("BATCH", input)?
        .batch(size)?
        .map(move |group| group.join(&sep)))
}

fn pair(input: Option<Sequence<String>>, args: &[String], _: &Settings) -> Result<Sequence<String>> {
    let sep = args.get(1).cloned().unwrap_or_else(|| "\t".to_string());
    Ok(upstream("PAIR", input)?
        .pair_value(args[0].clone())
        .map(move |(line, value)| format!("{line}{sep}{value}")))
}

fn wait(input: Option<Sequence<String>>, args: &[String], _: &Settings) -> Result<Sequence<String>> {
    let millis = number("wait", &args[0])?;
    Ok(upstream("WAIT", input)?.wait(Duration::from_millis(millis)))
}

fn sort(input: Option<Sequence<String>>, _: &[String], _: &Settings) -> Result<Sequence<String>> {
    Ok(upstream("SORT", input)?.sort())
}

fn count(input: Option<Sequence<String>>, _: &[String], _: &Settings) -> Result<Sequence<String>> {
    Ok(upstream("COUNT", input)?
        .reduce(0usize, |total, _| total + 1)
        .map(|total| total.to_string()))
}

fn last(input: Option<Sequence<String>>, args: &[String], _: &Settings) -> Result<Sequence<String>> {
    upstream("LAST", input)?.last(number("last", &args[0])?)
}

fn unique_count(input: Option<Sequence<String>>, _: &[String], _: &Settings) -> Result<Sequence<String>> {
    Ok(upstream("UNIQUECOUNT", input)?
        .unique_count()
        .map(|(line, count)| format!("{count}\t{line}")))
}

fn join(input: Option<Sequence<String>>, args: &[String], _: &Settings) -> Result<Sequence<String>> {
    let sep = args.first().cloned().unwrap_or_default();
    Ok(upstream("JOIN", input)?.join_text(sep))
}

fn single_line(input: Option<Sequence<String>>, _: &[String], _: &Settings) -> Result<Sequence<String>> {
    Ok(upstream("SINGLELINE", input)?.single_line())
}

fn xargs(input: Option<Sequence<String>>, args: &[String], settings: &Settings) -> Result<Sequence<String>> {
    let command = args[0].clone();
    let fixed: Vec<String> = args[1..].to_vec();
    let output = settings.read_config();
    upstream("XARGS", input)?.parallel(
        move |line: String| {
            let config = ExecConfig::default()
                .args(fixed.iter().cloned().chain([line]))
                .output(output);
            let lines = Sequence::from_process(command.clone(), config).values()?;
            Ok(lines.join("\n"))
        },
        Some(settings.concurrency()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(name: &str, input: Option<Vec<&str>>, args: &[&str]) -> Result<Vec<String>> {
        let op = lookup(name).expect("operator exists");
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let input = input.map(|lines| {
            Sequence::from_collection(lines.into_iter().map(String::from).collect::<Vec<_>>())
        });
        (op.build)(input, &args, &Settings::default())?.values()
    }

    #[test]
    fn test_lookup_ignores_case() {
        assert_eq!(lookup("sort").unwrap().name, "SORT");
        assert_eq!(lookup("Take").unwrap().kind, OperatorKind::Streaming);
        assert!(lookup("nope").is_none());
    }

    #[test]
    fn test_names_are_unique_and_uppercase() {
        let mut names: Vec<_> = OPERATORS.iter().map(|op| op.name).collect();
        assert!(names.iter().all(|n| *n == n.to_uppercase()));
        names.sort();
        names.dedup();
        assert_eq!(names.len(), OPERATORS.len());
    }

    #[test]
    fn test_arity() {
        assert!(Arity::exactly(1).accepts(1));
        assert!(!Arity::exactly(1).accepts(2));
        assert!(Arity::at_least(1).accepts(9));
        assert!(!Arity::between(1, 2).accepts(0));
        assert_eq!(Arity::between(0, 1).to_string(), "0..1");
        assert_eq!(Arity::at_least(1).to_string(), "1+");
    }

    #[test]
    fn test_streaming_stage_needs_input() {
        let err = build("UPPER", None, &[]).unwrap_err();
        assert!(matches!(err, PipelineError::Pipeline(_)));
    }

    #[test]
    fn test_literal_prefixes_input() {
        let out = build("LITERAL", Some(vec!["b"]), &["a", "header"]).unwrap();
        assert_eq!(out, vec!["a header", "b"]);
    }

    #[test]
    fn test_text_stages() {
        assert_eq!(
            build("LOCATE", Some(vec!["apple", "pear"]), &["pp"]).unwrap(),
            vec!["apple"]
        );
        assert_eq!(
            build("CHANGE", Some(vec!["a.b.c"]), &[".", "-"]).unwrap(),
            vec!["a-b-c"]
        );
        assert_eq!(
            build("REPLACE", Some(vec!["key=value"]), &[r"(\w+)=(\w+)", "$2=$1"]).unwrap(),
            vec!["value=key"]
        );
        assert_eq!(
            build("MATCH", Some(vec!["a1", "b", "c22"]), &[r"\d+", "extract"]).unwrap(),
            vec!["1", "22"]
        );
    }

    #[test]
    fn test_counting_stages() {
        assert_eq!(build("COUNT", Some(vec!["x", "y"]), &[]).unwrap(), vec!["2"]);
        assert_eq!(
            build("UNIQUECOUNT", Some(vec!["a", "a", "b"]), &[]).unwrap(),
            vec!["2\ta", "1\tb"]
        );
        assert_eq!(build("COUNT", Some(vec![]), &[]).unwrap(), vec!["0"]);
    }

    #[test]
    fn test_limit_stages() {
        let input = || Some(vec!["1", "2", "3", "4"]);
        assert_eq!(build("TAKE", input(), &["2"]).unwrap(), vec!["1", "2"]);
        assert_eq!(build("SKIP", input(), &["-1"]).unwrap(), vec!["1", "2", "3"]);
        assert_eq!(build("LAST", input(), &["1"]).unwrap(), vec!["4"]);
        assert_eq!(build("BATCH", input(), &["3", ","]).unwrap(), vec!["1,2,3", "4"]);
        assert!(matches!(
            build("TAKE", input(), &["0"]),
            Err(PipelineError::InvalidArgument { .. })
        ));
        assert!(matches!(
            build("TAKE", input(), &["many"]),
            Err(PipelineError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_pair_appends_value() {
        assert_eq!(
            build("PAIR", Some(vec!["a", "b"]), &["x", ":"]).unwrap(),
            vec!["a:x", "b:x"]
        );
    }

    #[test]
    fn test_hole_discards() {
        assert!(build("HOLE", Some(vec!["a"]), &[]).unwrap().is_empty());
        assert!(build("HOLE", None, &[]).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_xargs_runs_per_line() {
        let mut out = build("XARGS", Some(vec!["one", "two"]), &["echo", "got"]).unwrap();
        out.sort();
        assert_eq!(out, vec!["got one", "got two"]);
    }
}
