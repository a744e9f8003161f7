/// Test definition parser
///
/// Turns lines like
///
/// ```text
/// WEB are web1.example.com, web2.example.com
/// WEB must run http with status 200 with content 'Welcome'
/// ```
///
/// into [`Test`] values, expanding macros and validating arguments against
/// the probe registered for the test type.
pub mod error;


pub use error::ParseError;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};

use crate::monitoring::Test;
use crate::protocols::{ProtocolTest, Registry};

static MACRO_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z][A-Z0-9_]*)\s+are\s+(.+)$").expect("valid macro regex"));

static TEST_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+)\s+must\s+run\s+(\S+)").expect("valid test regex"));

// A quoted value ends at the first matching quote followed by whitespace or
// the end of the line.
static ARGUMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*with\s+(\S+)\s+(?:'(.*?)'|"(.*?)"|(\S+))(?:\s|$)"#).expect("valid argument regex")
});

/// Argument every test type accepts, stored as the test label
const LABEL_ARGUMENT: &str = "label";

/// Line parser holding the macros declared so far
pub struct Parser {
    registry: Arc<Registry>,
    macros: HashMap<String, Vec<String>>,
    tag: String,
}

impl Parser {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry, macros: HashMap::new(), tag: String::new() }
    }

    /// Tag attached to every parsed test
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Parse a whole file, calling `on_test` for every test in file order.
    ///
    /// Each call is a fresh pass, macros from earlier files are forgotten.
    /// A failing callback is logged and parsing continues, a parse error
    /// stops the pass.
    pub fn parse_file<F>(&mut self, path: impl AsRef<Path>, mut on_test: F) -> Result<(), ParseError>
    where
        F: FnMut(Test) -> anyhow::Result<()>,
    {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| ParseError::Io { path: path.display().to_string(), source })?;

        self.macros.clear();

        for (index, line) in content.lines().enumerate() {
            let tests = self
                .parse_line(line)
                .map_err(|source| ParseError::AtLine { line: index + 1, source: Box::new(source) })?;

            for test in tests {
                if let Err(error) = on_test(test) {
                    warn!(file = %path.display(), line = index + 1, "Failed to handle parsed test: {error:#}");
                }
            }
        }

        Ok(())
    }

    /// Parse a single line.
    ///
    /// Blank lines, comments and macro declarations yield no tests, a test
    /// against a macro yields one test per macro target.
    pub fn parse_line(&mut self, line: &str) -> Result<Vec<Test>, ParseError> {
        let input = line.trim();

        if input.is_empty() || input.starts_with('#') {
            return Ok(Vec::new());
        }

        if let Some(captures) = MACRO_LINE.captures(input) {
            self.declare_macro(&captures[1], &captures[2], input)?;
            return Ok(Vec::new());
        }

        let captures = TEST_LINE.captures(input).ok_or_else(|| ParseError::UnrecognizedLine(input.to_string()))?;
        let target = &captures[1];
        let test_type = &captures[2];

        let probe = self.registry.get(test_type).ok_or_else(|| ParseError::UnknownTestType {
            test_type: test_type.to_string(),
            input: input.to_string(),
        })?;

        let clauses_start = captures.get(0).map_or(input.len(), |m| m.end());
        let mut arguments = parse_arguments(&input[clauses_start..]);
        let test_label = arguments.remove(LABEL_ARGUMENT);
        validate_arguments(probe.as_ref(), test_type, &arguments)?;

        let template = Test {
            input: input.to_string(),
            target: target.to_string(),
            test_type: test_type.to_string(),
            tag: self.tag.clone(),
            test_label,
            arguments,
        };

        let Some(hosts) = self.macros.get(target) else {
            return Ok(vec![template]);
        };

        debug!(name = target, hosts = hosts.len(), "Expanding macro");
        Ok(hosts
            .iter()
            .map(|host| Test {
                input: input.replacen(target, host, 1),
                target: host.clone(),
                ..template.clone()
            })
            .collect())
    }

    /// Check a test built elsewhere (e.g. decoded from the job queue)
    pub fn validate(&self, test: &Test) -> Result<(), ParseError> {
        let probe = self.registry.get(&test.test_type).ok_or_else(|| ParseError::UnknownTestType {
            test_type: test.test_type.clone(),
            input: test.input.clone(),
        })?;
        validate_arguments(probe.as_ref(), &test.test_type, &test.arguments)
    }

    /// Decode a job queue payload.
    ///
    /// Jobs are JSON encoded tests, a bare test line is accepted as well.
    /// Every job stands alone: macros never carry over from one job to the
    /// next.
    pub fn parse_job(&mut self, payload: &str) -> Result<Test, ParseError> {
        let payload = payload.trim();
        self.macros.clear();

        if payload.starts_with('{') {
            let test = Test::from_job(payload).map_err(|e| ParseError::InvalidJob(e.to_string()))?;
            self.validate(&test)?;
            return Ok(test);
        }

        let mut tests = self.parse_line(payload)?;
        match (tests.pop(), tests.is_empty()) {
            (Some(test), true) => Ok(test),
            _ => Err(ParseError::InvalidJob(format!("expected exactly one test in '{}'", payload))),
        }
    }

    fn declare_macro(&mut self, name: &str, targets: &str, input: &str) -> Result<(), ParseError> {
        if self.macros.contains_key(name) {
            return Err(ParseError::DuplicateMacro(name.to_string()));
        }

        let hosts: Vec<String> =
            targets.split(',').map(str::trim).filter(|host| !host.is_empty()).map(String::from).collect();
        if hosts.is_empty() {
            return Err(ParseError::UnrecognizedLine(input.to_string()));
        }

        debug!(name, hosts = hosts.len(), "Declared macro");
        self.macros.insert(name.to_string(), hosts);
        Ok(())
    }
}

/// Collect every `with KEY VALUE` clause, skipping text between clauses
fn parse_arguments(mut rest: &str) -> HashMap<String, String> {
    let mut arguments = HashMap::new();

    while !rest.trim_start().is_empty() {
        if let Some(captures) = ARGUMENT.captures(rest) {
            let value = captures.get(2).or_else(|| captures.get(3)).or_else(|| captures.get(4));
            arguments.insert(captures[1].to_string(), value.map_or("", |m| m.as_str()).to_string());
            rest = &rest[captures.get(0).map_or(rest.len(), |m| m.end())..];
        } else {
            // Skip one whitespace separated word and try again
            let trimmed = rest.trim_start();
            let word_end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
            rest = &trimmed[word_end..];
        }
    }

    arguments
}

fn validate_arguments(
    probe: &dyn ProtocolTest,
    test_type: &str,
    arguments: &HashMap<String, String>,
) -> Result<(), ParseError> {
    for (name, value) in arguments {
        let pattern = probe
            .arguments()
            .iter()
            .find(|(known, _)| known == name)
            .map(|(_, pattern)| *pattern)
            .ok_or_else(|| ParseError::UnknownArgument { name: name.clone(), test_type: test_type.to_string() })?;

        let valid = Regex::new(pattern).map(|re| re.is_match(value)).unwrap_or(false);
        if !valid {
            return Err(ParseError::InvalidArgument {
                name: name.clone(),
                value: value.clone(),
                test_type: test_type.to_string(),
            });
        }
    }

    Ok(())
}
