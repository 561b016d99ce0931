//! Path pattern compilation and segment matching.
//!
//! A pattern is split on `/` into segments. Empty segments are dropped, so
//! `/users/`, `users` and `//users` all compile to the same single literal.
//!
//! | Syntax          | Segment                                        |
//! |-----------------|------------------------------------------------|
//! | `users`         | literal, compared case-sensitively             |
//! | `:id`           | named parameter, any non-empty segment         |
//! | `:id([0-9]+)`   | named parameter whose value must match the regex |
//! | `*rest`         | wildcard, final segment only, captures the remainder |
//!
//! Constraint regexes are anchored to the whole segment and cannot contain `/`.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;

use regex::Regex;

use crate::error::{PatternError, RouteError};
use crate::params::Params;

/// One compiled segment of a [`Pattern`].
#[derive(Debug, Clone)]
pub enum Segment {
    /// Exact text.
    Literal(String),
    /// `:name`
    Param {
        /// Capture name.
        name: String,
    },
    /// `:name(regex)`
    Constrained {
        /// Capture name.
        name: String,
        /// Anchored constraint.
        constraint: Regex,
    },
    /// `*name`
    Wildcard {
        /// Capture name.
        name: String,
    },
}

impl Segment {
    /// Returns the capture name, if this segment captures.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Literal(_) => None,
            Self::Param { name } | Self::Constrained { name, .. } | Self::Wildcard { name } => {
                Some(name)
            }
        }
    }
}

/// A compiled path pattern.
///
/// # Example
///
/// ```rust
/// use conduit_router::Pattern;
///
/// let pattern = Pattern::parse("/files/:bucket/*key").unwrap();
/// assert_eq!(pattern.param_names().collect::<Vec<_>>(), vec!["bucket", "key"]);
///
/// assert!(Pattern::parse("/files/*key/meta").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Compiles `pattern`.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let raw: Vec<&str> = split_path(pattern).collect();
        let mut seen = HashSet::new();
        let mut segments = Vec::with_capacity(raw.len());

        for (index, text) in raw.iter().enumerate() {
            let segment = parse_segment(pattern, text)?;

            if matches!(segment, Segment::Wildcard { .. }) && index + 1 != raw.len() {
                return Err(PatternError::WildcardNotLast {
                    pattern: pattern.to_string(),
                });
            }
            if let Some(name) = segment.name() {
                if !seen.insert(name.to_string()) {
                    return Err(PatternError::DuplicateName {
                        pattern: pattern.to_string(),
                        name: name.to_string(),
                    });
                }
            }
            segments.push(segment);
        }

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    /// The pattern text as registered.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Compiled segments, left to right.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Capture names in the order they appear.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(Segment::name)
    }

    /// Returns true when the pattern ends in a wildcard.
    #[must_use]
    pub fn has_wildcard(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Wildcard { .. }))
    }

    /// Matches already-split path segments, appending captures to `params`.
    ///
    /// On failure `params` is restored to its length on entry.
    pub(crate) fn match_segments(&self, path: &[&str], params: &mut Params) -> bool {
        let mark = params.len();
        let matched = self.try_match(path, params);
        if !matched {
            params.truncate(mark);
        }
        matched
    }

    fn try_match(&self, path: &[&str], params: &mut Params) -> bool {
        let mut rest = path;

        for segment in &self.segments {
            if let Segment::Wildcard { name } = segment {
                if rest.is_empty() {
                    return false;
                }
                let joined = rest.join("/");
                let Some(value) = decode(&joined) else {
                    return false;
                };
                params.push(name.as_str(), value);
                return true;
            }

            let Some((head, tail)) = rest.split_first() else {
                return false;
            };

            match segment {
                Segment::Literal(literal) => {
                    if *head != literal.as_str()
                        && decode(head).as_deref() != Some(literal.as_str())
                    {
                        return false;
                    }
                }
                Segment::Param { name } => {
                    let Some(value) = decode(head) else {
                        return false;
                    };
                    params.push(name.as_str(), value);
                }
                Segment::Constrained { name, constraint } => {
                    let Some(value) = decode(head) else {
                        return false;
                    };
                    if !constraint.is_match(&value) {
                        return false;
                    }
                    params.push(name.as_str(), value);
                }
                Segment::Wildcard { .. } => unreachable!("wildcard handled above"),
            }
            rest = tail;
        }

        rest.is_empty()
    }

    /// Renders a concrete path from `values`, percent-encoding each value.
    pub(crate) fn render(
        &self,
        route: &str,
        values: &[(&str, &str)],
    ) -> Result<String, RouteError> {
        if self.segments.is_empty() {
            return Ok("/".to_string());
        }

        let lookup = |name: &str| {
            values
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| *v)
                .ok_or_else(|| RouteError::MissingParam {
                    route: route.to_string(),
                    name: name.to_string(),
                })
        };
        let invalid = |name: &str, value: &str| RouteError::InvalidParam {
            name: name.to_string(),
            value: value.to_string(),
        };

        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            out.push('/');
            match segment {
                Segment::Literal(literal) => out.push_str(literal),
                Segment::Param { name } => {
                    let value = lookup(name)?;
                    if value.is_empty() {
                        return Err(invalid(name, value));
                    }
                    out.push_str(&urlencoding::encode(value));
                }
                Segment::Constrained { name, constraint } => {
                    let value = lookup(name)?;
                    if value.is_empty() || !constraint.is_match(value) {
                        return Err(invalid(name, value));
                    }
                    out.push_str(&urlencoding::encode(value));
                }
                Segment::Wildcard { name } => {
                    let value = lookup(name)?;
                    let pieces: Vec<_> = split_path(value).map(urlencoding::encode).collect();
                    if pieces.is_empty() {
                        return Err(invalid(name, value));
                    }
                    out.push_str(&pieces.join("/"));
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Splits a path into its non-empty segments.
pub(crate) fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Joins a group prefix and a route path into one pattern string.
///
/// ```rust
/// use conduit_router::join_paths;
///
/// assert_eq!(join_paths("/api/", "/users/:id"), "/api/users/:id");
/// assert_eq!(join_paths("", "health"), "/health");
/// assert_eq!(join_paths("/api", "/"), "/api");
/// ```
#[must_use]
pub fn join_paths(prefix: &str, path: &str) -> String {
    let joined: Vec<&str> = split_path(prefix).chain(split_path(path)).collect();
    format!("/{}", joined.join("/"))
}

fn decode(raw: &str) -> Option<Cow<'_, str>> {
    urlencoding::decode(raw).ok()
}

fn parse_segment(pattern: &str, text: &str) -> Result<Segment, PatternError> {
    if let Some(rest) = text.strip_prefix(':') {
        let (name, constraint) = match rest.find('(') {
            Some(open) => {
                let name = &rest[..open];
                let Some(body) = rest[open + 1..].strip_suffix(')') else {
                    return Err(PatternError::UnterminatedConstraint {
                        pattern: pattern.to_string(),
                        name: name.to_string(),
                    });
                };
                (name, Some(body))
            }
            None => (rest, None),
        };
        validate_name(pattern, name)?;

        return match constraint {
            Some(body) => {
                let constraint = Regex::new(&format!("^(?:{body})$")).map_err(|source| {
                    PatternError::InvalidConstraint {
                        name: name.to_string(),
                        source,
                    }
                })?;
                Ok(Segment::Constrained {
                    name: name.to_string(),
                    constraint,
                })
            }
            None => Ok(Segment::Param {
                name: name.to_string(),
            }),
        };
    }

    if let Some(name) = text.strip_prefix('*') {
        validate_name(pattern, name)?;
        return Ok(Segment::Wildcard {
            name: name.to_string(),
        });
    }

    Ok(Segment::Literal(text.to_string()))
}

fn validate_name(pattern: &str, name: &str) -> Result<(), PatternError> {
    if name.is_empty() {
        return Err(PatternError::EmptyName {
            pattern: pattern.to_string(),
        });
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(PatternError::InvalidName {
            pattern: pattern.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}
