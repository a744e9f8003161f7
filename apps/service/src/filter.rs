//! Result filter used by the bridges.
//!
//! A query is a comma separated list of `key=value` clauses, all of which
//! must hold. Text keys take a regular expression, optionally negated with
//! a leading `!`. Boolean keys take `true` or `false`.
//!
//! ```text
//! type=^https?$,tag=!staging,isDedup=false
//! ```

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

use crate::monitoring::TestResult;

static CLAUSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\w+)=(.*)$").expect("valid clause regex"));

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Malformed filter clause - '{0}'")]
    MalformedClause(String),

    #[error("Unknown filter key '{0}'")]
    UnknownKey(String),

    #[error("Invalid regex for '{key}': {source}")]
    InvalidRegex {
        key: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid boolean for '{key}' - '{value}', expected true or false")]
    InvalidBool { key: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextField {
    Type,
    Tag,
    TestLabel,
    Input,
    Target,
    Error,
    Details,
}

impl TextField {
    fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "type" => Self::Type,
            "tag" => Self::Tag,
            "testLabel" => Self::TestLabel,
            "input" => Self::Input,
            "target" => Self::Target,
            "error" => Self::Error,
            "details" => Self::Details,
            _ => return None,
        })
    }

    fn value<'a>(&self, result: &'a TestResult) -> Option<&'a str> {
        match self {
            Self::Type => Some(&result.test_type),
            Self::Tag => Some(&result.tag),
            Self::TestLabel => result.test_label.as_deref(),
            Self::Input => Some(&result.input),
            Self::Target => Some(&result.target),
            Self::Error => result.error.as_deref(),
            Self::Details => result.details.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoolField {
    IsDedup,
    Recovered,
}

impl BoolField {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "isDedup" => Some(Self::IsDedup),
            "recovered" => Some(Self::Recovered),
            _ => None,
        }
    }

    fn value(&self, result: &TestResult) -> bool {
        match self {
            Self::IsDedup => result.is_dedup,
            Self::Recovered => result.recovered,
        }
    }
}

#[derive(Debug, Clone)]
enum Clause {
    Text { field: TextField, pattern: Regex, negated: bool },
    Bool { field: BoolField, expected: bool },
}

impl Clause {
    fn parse(clause: &str) -> Result<Self, FilterError> {
        let captures = CLAUSE.captures(clause).ok_or_else(|| FilterError::MalformedClause(clause.to_string()))?;
        let key = &captures[1];
        let value = &captures[2];

        if let Some(field) = TextField::from_key(key) {
            let (negated, expression) = match value.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, value),
            };
            let pattern = Regex::new(expression)
                .map_err(|source| FilterError::InvalidRegex { key: key.to_string(), source })?;
            return Ok(Clause::Text { field, pattern, negated });
        }

        if let Some(field) = BoolField::from_key(key) {
            let expected = match value {
                "true" => true,
                "false" => false,
                _ => return Err(FilterError::InvalidBool { key: key.to_string(), value: value.to_string() }),
            };
            return Ok(Clause::Bool { field, expected });
        }

        Err(FilterError::UnknownKey(key.to_string()))
    }

    fn matches(&self, result: &TestResult) -> bool {
        match self {
            // An absent optional field fails the clause either way.
            Clause::Text { field, pattern, negated } => {
                field.value(result).is_some_and(|value| pattern.is_match(value) != *negated)
            }
            Clause::Bool { field, expected } => field.value(result) == *expected,
        }
    }
}

/// Compiled filter query
#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    clauses: Vec<Clause>,
}

impl ResultFilter {
    /// A blank query yields a filter matching everything. Otherwise clause
    /// values are taken verbatim, surrounding whitespace included, and an
    /// empty clause is malformed.
    pub fn compile(query: &str) -> Result<Self, FilterError> {
        if query.trim().is_empty() {
            return Ok(Self::default());
        }

        let clauses =
            split_clauses(query).iter().map(|clause| Clause::parse(clause)).collect::<Result<Vec<_>, _>>()?;

        Ok(Self { clauses })
    }

    pub fn matches(&self, result: &TestResult) -> bool {
        self.clauses.iter().all(|clause| clause.matches(result))
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// Split on commas, `\,` stands for a literal comma
fn split_clauses(query: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut chars = query.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&',') => {
                current.push(',');
                chars.next();
            }
            ',' => clauses.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    clauses.push(current);
    clauses
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(tag: &str, error: Option<&str>, is_dedup: bool, recovered: bool) -> TestResult {
        TestResult {
            input: "example.org must run ssh".to_string(),
            target: "example.org".to_string(),
            time: 1_700_000_000,
            test_type: "ssh".to_string(),
            tag: tag.to_string(),
            test_label: None,
            error: error.map(String::from),
            details: None,
            is_dedup,
            recovered,
        }
    }

    #[test]
    fn test_empty_query_matches_everything() {
        for query in ["", "   ", "\t\n"] {
            let filter = ResultFilter::compile(query).unwrap();
            assert!(filter.is_empty());
            assert!(filter.matches(&result("prod", Some("down"), true, false)));
        }
    }

    #[test]
    fn test_bool_clauses() {
        let filter = ResultFilter::compile("isDedup=true,recovered=false").unwrap();

        assert!(filter.matches(&result("", Some("down"), true, false)));
        assert!(!filter.matches(&result("", Some("down"), false, false)));
        assert!(!filter.matches(&result("", None, true, true)));
    }

    #[test]
    fn test_negated_regex() {
        let filter = ResultFilter::compile("tag=!prod").unwrap();

        assert!(filter.matches(&result("staging", None, false, false)));
        assert!(!filter.matches(&result("prod-eu", None, false, false)));
    }

    #[test]
    fn test_absent_field_never_matches() {
        let passed = result("prod", None, false, false);

        assert!(!ResultFilter::compile("error=.*").unwrap().matches(&passed));
        assert!(!ResultFilter::compile("error=!.*").unwrap().matches(&passed));
        assert!(!ResultFilter::compile("testLabel=!x").unwrap().matches(&passed));
        assert!(ResultFilter::compile("error=.*").unwrap().matches(&result("", Some(""), false, false)));
    }

    #[test]
    fn test_escaped_comma() {
        let filter = ResultFilter::compile(r"error=refused\, try again,type=ssh").unwrap();

        assert!(filter.matches(&result("", Some("refused, try again"), false, false)));
        assert!(!filter.matches(&result("", Some("refused"), false, false)));
    }

    #[test]
    fn test_clause_values_are_verbatim() {
        let filter = ResultFilter::compile("error=refused ").unwrap();

        assert!(filter.matches(&result("", Some("refused "), false, false)));
        assert!(!filter.matches(&result("", Some("refused"), false, false)));
    }

    #[test]
    fn test_empty_clause_is_malformed() {
        for query in [",", "type=ssh,,tag=x", "type=ssh,", " ,tag=x"] {
            assert!(matches!(ResultFilter::compile(query), Err(FilterError::MalformedClause(_))), "{query}");
        }
    }

    #[test]
    fn test_compile_errors() {
        assert!(matches!(ResultFilter::compile("bogus=1"), Err(FilterError::UnknownKey(key)) if key == "bogus"));
        assert!(matches!(ResultFilter::compile("isDedup=yes"), Err(FilterError::InvalidBool { .. })));
        assert!(matches!(ResultFilter::compile("tag=("), Err(FilterError::InvalidRegex { .. })));
        assert!(matches!(ResultFilter::compile("just words"), Err(FilterError::MalformedClause(_))));
    }
}
