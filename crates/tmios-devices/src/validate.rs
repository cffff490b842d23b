/*!
 * Structural validation rules for schema properties.
 *
 * A property carries its rules as one comma-separated string such as
 * `required,gte=5,lte=35`. The string is parsed once when the owning
 * property set is built; the parsed rules are then applied to the JSON form
 * of every decoded value.
 *
 * Numbers are compared by value, strings by character count, arrays and
 * objects by length. A `null` value only fails `required`.
 *
 * `required` and `omitempty` treat `false`, `0`, `""` and `null` as empty.
 * Arrays and objects are empty only when `null`: `[]` satisfies `required`.
 * Use an `Option` field to tell a missing collection from an empty one.
 */
use std::fmt;
use std::str::FromStr;

use serde_json::Value as Json;
use thiserror::Error;

/// A single validation rule
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// The value must not be the zero value of its type
    Required,
    /// Skip the remaining rules when the value is the zero value
    OmitEmpty,
    /// Lower bound, inclusive
    Min(f64),
    /// Upper bound, inclusive
    Max(f64),
    /// Strict lower bound
    Gt(f64),
    /// Inclusive lower bound
    Gte(f64),
    /// Strict upper bound
    Lt(f64),
    /// Inclusive upper bound
    Lte(f64),
    /// Exact length
    Len(usize),
    /// The value must equal one of the listed options
    OneOf(Vec<String>),
}

/// Error returned when a rule string cannot be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid rule '{rule}': {reason}")]
pub struct RuleParseError {
    /// The offending rule text
    pub rule: String,
    /// Why it was rejected
    pub reason: String,
}

impl FromStr for Rule {
    type Err = RuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (tag, param) = match s.split_once('=') {
            Some((tag, param)) => (tag.trim(), Some(param.trim())),
            None => (s, None),
        };

        let err = |reason: &str| RuleParseError {
            rule: s.to_string(),
            reason: reason.to_string(),
        };
        let number = |param: Option<&str>| -> Result<f64, RuleParseError> {
            param
                .ok_or_else(|| err("missing parameter"))?
                .parse::<f64>()
                .map_err(|_| err("parameter is not a number"))
        };

        match (tag, param) {
            ("", _) => Err(err("empty rule")),
            ("required", None) => Ok(Rule::Required),
            ("omitempty", None) => Ok(Rule::OmitEmpty),
            ("required" | "omitempty", Some(_)) => Err(err("takes no parameter")),
            ("min", p) => number(p).map(Rule::Min),
            ("max", p) => number(p).map(Rule::Max),
            ("gt", p) => number(p).map(Rule::Gt),
            ("gte", p) => number(p).map(Rule::Gte),
            ("lt", p) => number(p).map(Rule::Lt),
            ("lte", p) => number(p).map(Rule::Lte),
            ("len", p) => p
                .ok_or_else(|| err("missing parameter"))?
                .parse::<usize>()
                .map(Rule::Len)
                .map_err(|_| err("parameter is not a length")),
            ("oneof", p) => {
                let options: Vec<String> = p
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                if options.is_empty() {
                    return Err(err("needs at least one option"));
                }
                Ok(Rule::OneOf(options))
            }
            _ => Err(err("unknown rule")),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Required => write!(f, "required"),
            Rule::OmitEmpty => write!(f, "omitempty"),
            Rule::Min(n) => write!(f, "min={}", n),
            Rule::Max(n) => write!(f, "max={}", n),
            Rule::Gt(n) => write!(f, "gt={}", n),
            Rule::Gte(n) => write!(f, "gte={}", n),
            Rule::Lt(n) => write!(f, "lt={}", n),
            Rule::Lte(n) => write!(f, "lte={}", n),
            Rule::Len(n) => write!(f, "len={}", n),
            Rule::OneOf(options) => write!(f, "oneof={}", options.join(" ")),
        }
    }
}

/// Parse a comma-separated rule list. An empty string yields no rules.
pub fn parse_rules(spec: &str) -> Result<Vec<Rule>, RuleParseError> {
    if spec.trim().is_empty() {
        return Ok(Vec::new());
    }
    spec.split(',').map(str::parse).collect()
}

/// A rule violated by a property value
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// The property name
    pub property: String,
    /// The violated rule
    pub rule: Rule,
    /// Human-readable explanation
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.property, self.message, self.rule)
    }
}

/// Every violation found while validating one value
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationErrors(Vec<Violation>);

impl ValidationErrors {
    /// Create from a non-empty list of violations
    pub fn new(violations: Vec<Violation>) -> Self {
        Self(violations)
    }

    /// The individual violations
    pub fn violations(&self) -> &[Violation] {
        &self.0
    }

    /// Whether the given property has a violation
    pub fn has(&self, property: &str) -> bool {
        self.0.iter().any(|v| v.property == property)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", rendered.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Apply `rules` to `value`, returning the first violated rule
pub fn check(property: &str, rules: &[Rule], value: &Json) -> Option<Violation> {
    let empty = is_zero(value);
    let violation = |rule: &Rule, message: String| Violation {
        property: property.to_string(),
        rule: rule.clone(),
        message,
    };

    for rule in rules {
        match rule {
            Rule::OmitEmpty if empty => return None,
            Rule::OmitEmpty => {}
            Rule::Required => {
                if empty {
                    return Some(violation(rule, "is required".to_string()));
                }
            }
            _ if value.is_null() => return None,
            Rule::OneOf(options) => {
                if !one_of(value, options) {
                    return Some(violation(
                        rule,
                        format!("must be one of [{}]", options.join(" ")),
                    ));
                }
            }
            Rule::Len(n) => match measure(value) {
                Some(m) if m == *n as f64 => {}
                Some(_) => return Some(violation(rule, format!("must have length {}", n))),
                None => return Some(not_applicable(property, rule, value)),
            },
            bound => {
                let Some(m) = measure(value) else {
                    return Some(not_applicable(property, bound, value));
                };
                let (holds, message) = match bound {
                    Rule::Min(n) => (m >= *n, format!("must be at least {}", n)),
                    Rule::Max(n) => (m <= *n, format!("must be at most {}", n)),
                    Rule::Gt(n) => (m > *n, format!("must be greater than {}", n)),
                    Rule::Gte(n) => (m >= *n, format!("must be greater than or equal to {}", n)),
                    Rule::Lt(n) => (m < *n, format!("must be less than {}", n)),
                    Rule::Lte(n) => (m <= *n, format!("must be less than or equal to {}", n)),
                    _ => (true, String::new()),
                };
                if !holds {
                    return Some(violation(bound, message));
                }
            }
        }
    }

    None
}

fn not_applicable(property: &str, rule: &Rule, value: &Json) -> Violation {
    Violation {
        property: property.to_string(),
        rule: rule.clone(),
        message: format!("cannot be checked against a {} value", json_kind(value)),
    }
}

fn measure(value: &Json) -> Option<f64> {
    match value {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => Some(s.chars().count() as f64),
        Json::Array(a) => Some(a.len() as f64),
        Json::Object(o) => Some(o.len() as f64),
        Json::Bool(_) | Json::Null => None,
    }
}

fn one_of(value: &Json, options: &[String]) -> bool {
    match value {
        Json::String(s) => options.iter().any(|o| o == s),
        Json::Number(n) => {
            let Some(n) = n.as_f64() else { return false };
            options.iter().any(|o| o.parse::<f64>().map_or(false, |o| o == n))
        }
        Json::Bool(b) => options.iter().any(|o| o == if *b { "true" } else { "false" }),
        _ => false,
    }
}

fn is_zero(value: &Json) -> bool {
    match value {
        Json::Null => true,
        Json::Bool(b) => !b,
        Json::Number(n) => n.as_f64() == Some(0.0),
        Json::String(s) => s.is_empty(),
        Json::Array(_) | Json::Object(_) => false,
    }
}

fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
