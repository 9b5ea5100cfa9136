// SPDX-License-Identifier: GPL-3.0-only

//! Module parameter file format (spec §6.3): a plain line-oriented text
//! format, `[category]` headers followed by `name = value ; description`
//! lines. Hand-written parser, not a generic config crate, because the
//! format's quirks (unknown fields ignored with a warning, missing
//! required fields fall back to defaults) don't map onto a derive-based
//! deserializer — the same reasoning the teacher applies to its
//! hand-written GStreamer caps strings.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use tracing::warn;

use crate::error::{err, Result};

/// One parsed value cell: the format tags each value with its declared
/// type so `int`/`float`/`double` round-trip without locale-dependent
/// guessing.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Text(String),
}

impl ParamValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Double(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// A parsed parameter file: `[category] -> name -> value`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamFile {
    categories: BTreeMap<String, BTreeMap<String, ParamValue>>,
}

impl ParamFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, category: &str, name: &str, value: ParamValue) {
        self.categories
            .entry(category.to_string())
            .or_default()
            .insert(name.to_string(), value);
    }

    pub fn get(&self, category: &str, name: &str) -> Option<&ParamValue> {
        self.categories.get(category)?.get(name)
    }

    pub fn category(&self, category: &str) -> Option<&BTreeMap<String, ParamValue>> {
        self.categories.get(category)
    }

    /// Parse the `[category]` / `name = value ; description` text format.
    /// Unknown type tags or malformed lines are dropped with a `warn!`
    /// rather than failing the whole parse (spec §6.3: "unknown fields are
    /// ignored with a warning").
    pub fn parse(text: &str) -> Result<Self> {
        let mut file = ParamFile::new();
        let mut current_category: Option<String> = None;

        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.split(';').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if let Some(stripped) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                current_category = Some(stripped.trim().to_string());
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(line = lineno + 1, "malformed parameter line ignored: {raw_line:?}");
                continue;
            };
            let Some(category) = current_category.as_deref() else {
                warn!(line = lineno + 1, "parameter line before any [category] header ignored");
                continue;
            };
            match parse_value(value.trim()) {
                Some(v) => file.set(category, key.trim(), v),
                None => warn!(line = lineno + 1, "unparseable value ignored: {raw_line:?}"),
            }
        }

        Ok(file)
    }

    /// Serialize back to the on-disk text format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (category, values) in &self.categories {
            let _ = writeln!(out, "[{category}]");
            for (name, value) in values {
                let _ = writeln!(out, "{name} = {}", render_value(value));
            }
            out.push('\n');
        }
        out
    }
}

fn parse_value(raw: &str) -> Option<ParamValue> {
    if let Some(rest) = raw.strip_suffix("_i") {
        return rest.trim().parse::<i64>().ok().map(ParamValue::Int);
    }
    if let Some(rest) = raw.strip_suffix("_f") {
        return rest.trim().parse::<f32>().ok().map(ParamValue::Float);
    }
    if let Some(rest) = raw.strip_suffix("_d") {
        return rest.trim().parse::<f64>().ok().map(ParamValue::Double);
    }
    match raw {
        "true" => return Some(ParamValue::Bool(true)),
        "false" => return Some(ParamValue::Bool(false)),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Some(ParamValue::Int(i));
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Some(ParamValue::Double(f));
    }
    Some(ParamValue::Text(raw.to_string()))
}

fn render_value(value: &ParamValue) -> String {
    match value {
        ParamValue::Int(v) => format!("{v}_i"),
        ParamValue::Float(v) => format!("{v}_f"),
        ParamValue::Double(v) => format!("{v}_d"),
        ParamValue::Bool(v) => v.to_string(),
        ParamValue::Text(v) => v.clone(),
    }
}

/// Read a required field or fall back to `default`, per spec §6.3
/// "missing required fields fall back to documented defaults".
pub fn required_or_default<T>(file: &ParamFile, category: &str, name: &str, default: T, read: impl FnOnce(&ParamValue) -> Option<T>) -> T {
    file.get(category, name).and_then(read).unwrap_or(default)
}

/// Validate that a category exists before reading from it, returning
/// `InvalidParameter` if it's entirely absent (distinct from a missing
/// individual field, which silently defaults).
pub fn require_category<'a>(file: &'a ParamFile, category: &str) -> Result<&'a BTreeMap<String, ParamValue>> {
    file.category(category)
        .ok_or_else(|| err!(InvalidParameter, "missing required [{category}] section"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typed_values_and_strips_comments() {
        let text = "[stereo]\nwindow = 9_i ; block size\nuniqueness = 0.15_f\n";
        let file = ParamFile::parse(text).unwrap();
        assert_eq!(file.get("stereo", "window"), Some(&ParamValue::Int(9)));
        assert_eq!(file.get("stereo", "uniqueness"), Some(&ParamValue::Float(0.15)));
    }

    #[test]
    fn unknown_line_before_category_is_ignored_not_fatal() {
        let text = "orphan = 1_i\n[filter]\nenabled = true\n";
        let file = ParamFile::parse(text).unwrap();
        assert!(file.category("filter").is_some());
        assert_eq!(file.get("filter", "enabled"), Some(&ParamValue::Bool(true)));
    }

    #[test]
    fn missing_field_falls_back_to_default() {
        let file = ParamFile::parse("[stereo]\nwindow = 9_i\n").unwrap();
        let max_disp = required_or_default(&file, "stereo", "max_disparity", 64i64, |v| v.as_int());
        assert_eq!(max_disp, 64);
    }

    #[test]
    fn render_then_parse_round_trips() {
        let mut file = ParamFile::new();
        file.set("stereo", "window", ParamValue::Int(9));
        file.set("stereo", "uniqueness", ParamValue::Float(0.2));
        let rendered = file.render();
        let reparsed = ParamFile::parse(&rendered).unwrap();
        assert_eq!(reparsed.get("stereo", "window"), Some(&ParamValue::Int(9)));
    }
}
