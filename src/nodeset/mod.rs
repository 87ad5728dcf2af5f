//! NodeSet: a finite set of host names with compact range syntax
//!
//! `host[10-12,15].example.org` expands to four hosts; rendering folds
//! contiguous numeric suffixes back into the compact form. Set algebra is
//! exposed through the standard operators: `|` union, `&` intersection,
//! `-` difference, `^` symmetric difference.

mod range;

use crate::core::error::{Error, Result};
use range::{expand_range_list, fold};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// An unordered, duplicate-free set of host names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSet {
    nodes: BTreeSet<String>,
}

impl NodeSet {
    /// Create an empty NodeSet
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list of node patterns.
    ///
    /// Commas inside brackets belong to the range list; commas outside
    /// separate patterns. The empty string parses to the empty set.
    pub fn parse(text: &str) -> Result<Self> {
        let mut nodes = BTreeSet::new();
        for (pattern, offset) in split_patterns(text)? {
            if pattern.is_empty() {
                return Err(Error::Parse {
                    position: offset,
                    message: "empty node pattern".to_string(),
                });
            }
            for name in expand_pattern(pattern, offset)? {
                nodes.insert(name);
            }
        }
        Ok(Self { nodes })
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.nodes.insert(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate host names in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }
}

impl fmt::Display for NodeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.nodes.iter().map(String::as_str).collect();
        write!(f, "{}", fold(&names))
    }
}

impl FromStr for NodeSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl FromIterator<String> for NodeSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<&'a str> for NodeSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter().map(String::from).collect()
    }
}

impl IntoIterator for NodeSet {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}

impl std::ops::BitOr for &NodeSet {
    type Output = NodeSet;

    fn bitor(self, rhs: &NodeSet) -> NodeSet {
        NodeSet {
            nodes: self.nodes.union(&rhs.nodes).cloned().collect(),
        }
    }
}

impl std::ops::BitAnd for &NodeSet {
    type Output = NodeSet;

    fn bitand(self, rhs: &NodeSet) -> NodeSet {
        NodeSet {
            nodes: self.nodes.intersection(&rhs.nodes).cloned().collect(),
        }
    }
}

impl std::ops::Sub for &NodeSet {
    type Output = NodeSet;

    fn sub(self, rhs: &NodeSet) -> NodeSet {
        NodeSet {
            nodes: self.nodes.difference(&rhs.nodes).cloned().collect(),
        }
    }
}

impl std::ops::BitXor for &NodeSet {
    type Output = NodeSet;

    fn bitxor(self, rhs: &NodeSet) -> NodeSet {
        NodeSet {
            nodes: self
                .nodes
                .symmetric_difference(&rhs.nodes)
                .cloned()
                .collect(),
        }
    }
}

impl Serialize for NodeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NodeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        NodeSet::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Split on commas outside brackets, keeping each pattern's byte offset
fn split_patterns(text: &str) -> Result<Vec<(&str, usize)>> {
    if text.is_empty() {
        return Ok(vec![]);
    }
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth.checked_sub(1).ok_or(Error::Parse {
                    position: i,
                    message: "unbalanced ']'".to_string(),
                })?;
            }
            ',' if depth == 0 => {
                out.push((&text[start..i], start));
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(Error::Parse {
            position: text.len(),
            message: "unbalanced '['".to_string(),
        });
    }
    out.push((&text[start..], start));
    Ok(out)
}

/// Expand one pattern: literal segments interleaved with bracketed range
/// lists, multiplied out as a cartesian product
fn expand_pattern(pattern: &str, base: usize) -> Result<Vec<String>> {
    let mut parts: Vec<Vec<String>> = Vec::new();
    let mut rest = pattern;
    let mut pos = base;

    while let Some(open) = rest.find('[') {
        let close = rest.find(']').ok_or(Error::Parse {
            position: pos + open,
            message: "unbalanced '['".to_string(),
        })?;
        if close < open {
            return Err(Error::Parse {
                position: pos + close,
                message: "unbalanced ']'".to_string(),
            });
        }
        if open > 0 {
            parts.push(vec![rest[..open].to_string()]);
        }
        parts.push(expand_range_list(&rest[open + 1..close], pos + open + 1)?);
        pos += close + 1;
        rest = &rest[close + 1..];
    }
    if rest.contains(']') {
        return Err(Error::Parse {
            position: pos,
            message: "unbalanced ']'".to_string(),
        });
    }
    if !rest.is_empty() {
        parts.push(vec![rest.to_string()]);
    }

    for part in &parts {
        for piece in part {
            if let Some(c) = piece.chars().find(|&c| !is_hostname_char(c)) {
                return Err(Error::Parse {
                    position: base,
                    message: format!("invalid character '{c}' in node pattern"),
                });
            }
        }
    }

    let mut expanded = vec![String::new()];
    for part in parts {
        let mut next = Vec::with_capacity(expanded.len() * part.len());
        for prefix in &expanded {
            for piece in &part {
                next.push(format!("{prefix}{piece}"));
            }
        }
        expanded = next;
    }
    Ok(expanded)
}

fn is_hostname_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}
