/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Tag mappings.
//!
//! A tag mapping is the identity of a task within its stage: an ordered map
//! from string keys to scalar values. Values are deliberately untyped scalars
//! (string, integer or boolean) rather than per-tool structs, so recipes can
//! thread arbitrary keys through relations without declaring them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar tag value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Str(s) => f.write_str(s),
            TagValue::Int(i) => write!(f, "{}", i),
            TagValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::Str(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::Str(s)
    }
}

impl From<i64> for TagValue {
    fn from(i: i64) -> Self {
        TagValue::Int(i)
    }
}

impl From<bool> for TagValue {
    fn from(b: bool) -> Self {
        TagValue::Bool(b)
    }
}

/// An ordered tag mapping. Ordering makes the rendered key deterministic,
/// which the stage-level dedup index and on-disk layout rely on.
pub type Tags = BTreeMap<String, TagValue>;

/// Renders tags as `k=v` pairs joined with `, ` for logs and errors.
pub fn format_tags(tags: &Tags) -> String {
    if tags.is_empty() {
        return "{}".to_string();
    }
    let pairs: Vec<String> = tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{{{}}}", pairs.join(", "))
}

/// Renders tags as a single path component (`k=v` joined with `__`).
///
/// Empty tags render as an empty string; callers collapse that to the parent
/// directory.
pub fn tags_as_dirname(tags: &Tags) -> String {
    tags.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("__")
}

/// Builds a [`Tags`] map from `key => value` pairs.
///
/// ```
/// use sluice::tags;
/// let t = tags! { "word" => "hello", "n" => 1 };
/// assert_eq!(t.len(), 2);
/// ```
#[macro_export]
macro_rules! tags {
    () => { $crate::tags::Tags::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::tags::Tags::new();
        $(map.insert($key.to_string(), $crate::tags::TagValue::from($value));)+
        map
    }};
}
