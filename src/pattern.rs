//! Path templates with `{placeholder}` fields.
//!
//! The same template is used three ways: with some fields fixed it becomes a
//! glob to list candidate files, as a regex it recovers the remaining fields
//! from each path found, and with every field known it renders a path.
use std::collections::HashMap;

use itertools::Itertools;
use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("Unclosed '{{' in pattern '{0}'")]
    Unclosed(String),
    #[error("Empty or invalid placeholder name '{{{name}}}' in pattern '{pattern}'")]
    BadPlaceholder { pattern: String, name: String },
    #[error("No value for placeholder '{{{name}}}' in pattern '{pattern}'")]
    MissingValue { pattern: String, name: String },
    #[error("Pattern '{pattern}' has no '{{{name}}}' placeholder")]
    MissingPlaceholder { pattern: String, name: String },
    #[error("Pattern '{0}' did not make a valid regex")]
    Regex(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderPattern {
    pattern: String,
    segments: Vec<Segment>,
}

impl PlaceholderPattern {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let mut segments = vec![];
        let mut rest = pattern;
        while let Some(start) = rest.find('{') {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let end = rest[start..]
                .find('}')
                .ok_or_else(|| PatternError::Unclosed(pattern.to_string()))?;
            let name = &rest[start + 1..start + end];
            let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(PatternError::BadPlaceholder {
                    pattern: pattern.to_string(),
                    name: name.to_string(),
                });
            }
            segments.push(Segment::Placeholder(name.to_string()));
            rest = &rest[start + end + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            pattern: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Placeholder names in order of first appearance.
    pub fn keys(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(k) => Some(k.as_str()),
                Segment::Literal(_) => None,
            })
            .unique()
            .collect()
    }

    /// Substitute every placeholder. Any placeholder without a value is an error.
    pub fn render(&self, values: &HashMap<&str, String>) -> Result<String, PatternError> {
        let mut out = String::new();
        for seg in self.segments.iter() {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Placeholder(k) => {
                    let v = values.get(k.as_str()).ok_or_else(|| PatternError::MissingValue {
                        pattern: self.pattern.clone(),
                        name: k.clone(),
                    })?;
                    out.push_str(v);
                }
            }
        }
        Ok(out)
    }

    /// Substitute the placeholders that have a value and leave the rest in place.
    pub fn partial(&self, values: &HashMap<&str, String>) -> Self {
        let segments = self
            .segments
            .iter()
            .map(|seg| match seg {
                Segment::Placeholder(k) => match values.get(k.as_str()) {
                    Some(v) => Segment::Literal(v.clone()),
                    None => seg.clone(),
                },
                Segment::Literal(_) => seg.clone(),
            })
            .coalesce(|a, b| match (a, b) {
                (Segment::Literal(a), Segment::Literal(b)) => Ok(Segment::Literal(a + &b)),
                (a, b) => Err((a, b)),
            })
            .collect_vec();
        let pattern = segments
            .iter()
            .map(|s| match s {
                Segment::Literal(l) => l.clone(),
                Segment::Placeholder(k) => format!("{{{k}}}"),
            })
            .collect();
        Self { pattern, segments }
    }

    /// A glob for the file system: literals escaped (except `*`, which stays
    /// a wildcard) and every placeholder replaced by `*`.
    pub fn to_glob(&self) -> String {
        self.segments
            .iter()
            .map(|seg| match seg {
                Segment::Literal(s) => s.split('*').map(glob::Pattern::escape).join("*"),
                Segment::Placeholder(_) => "*".to_string(),
            })
            .collect()
    }

    /// A matcher recovering placeholder values from a path.
    pub fn matcher(&self) -> Result<PatternMatcher, PatternError> {
        let mut re = String::from("^");
        let mut keys = vec![];
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                Segment::Literal(s) => {
                    re.push_str(&s.split('*').map(regex::escape).join("[^/]*"));
                }
                Segment::Placeholder(k) => {
                    // Placeholders in the file name part are separated by underscores.
                    let in_file_name = self.segments[i + 1..].iter().all(|s| match s {
                        Segment::Literal(l) => !l.contains('/'),
                        Segment::Placeholder(_) => true,
                    });
                    if in_file_name {
                        re.push_str("([^/_]+)");
                    } else {
                        re.push_str("([^/]+)");
                    }
                    keys.push(k.clone());
                }
            }
        }
        re.push('$');
        let regex = Regex::new(&re).map_err(|_| PatternError::Regex(self.pattern.clone()))?;
        Ok(PatternMatcher { regex, keys })
    }
}

/// Regex form of a [`PlaceholderPattern`].
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    regex: Regex,
    keys: Vec<String>,
}

impl PatternMatcher {
    /// Placeholder values in `path`, or `None` if the path does not match or
    /// a placeholder used more than once has different values.
    pub fn captures(&self, path: &str) -> Option<HashMap<String, String>> {
        let caps = self.regex.captures(path)?;
        let mut values: HashMap<String, String> = HashMap::new();
        for (key, m) in self.keys.iter().zip(caps.iter().skip(1)) {
            let value = m?.as_str();
            if let Some(prev) = values.get(key) {
                if prev != value {
                    log::debug!("{path} has inconsistent values for '{key}': {prev} vs. {value}");
                    return None;
                }
            } else {
                values.insert(key.clone(), value.to_string());
            }
        }
        Some(values)
    }
}
