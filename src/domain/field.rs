//! The layered field-value model (C2).
//!
//! A field carries up to three layers: a node-level value, zero or more
//! profile-contributed alternates (each tagged with the contributing
//! profile's id), and a default. `get()` always prefers node, then the
//! first alternate, then default — this single rule is what gives node
//! values override-without-an-explicit-override-step semantics once the
//! merge engine has pushed the node's own value into the node layer last.
//!
//! Disk form is intentionally narrower than memory form: only the
//! directly-set (node) layer is ever serialized. Alternates and defaults
//! are recomputed by the merge engine on every read, so persisting them
//! would just be stale cache that can drift from the profile chain.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Values that clear a field when passed to `set`/`set_list`, matching the
/// Go source's sentinel handling (`UNSET`, `DELETE`, `UNDEF`, `--`, `nil`,
/// the literal zero IPv4 address used as an "unset" convention for address
/// fields).
const SENTINELS: &[&str] = ["UNSET", "DELETE", "UNDEF", "--", "nil", "0.0.0.0"].as_slice();

fn is_sentinel(s: &str) -> bool {
    SENTINELS.iter().any(|sentinel| sentinel.eq_ignore_ascii_case(s))
}

fn parse_bool(s: &str) -> bool {
    !matches!(s.to_ascii_lowercase().as_str(), "false" | "no" | "0")
}

/// A contributing profile's name paired with the value it supplies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alternate {
    pub source: String,
    pub value: String,
}

/// A single scalar configuration field (comment, kernel override, asset
/// key, IPMI address, ...).
#[derive(Debug, Clone, Default)]
pub struct ScalarField {
    value: Option<String>,
    alt: Vec<Alternate>,
    default: Option<String>,
}

impl ScalarField {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the node-level value directly. A sentinel clears it.
    pub fn set(&mut self, value: impl AsRef<str>) {
        let value = value.as_ref();
        if is_sentinel(value) {
            self.value = None;
        } else {
            self.value = Some(value.to_string());
        }
    }

    pub fn set_default(&mut self, value: impl AsRef<str>) {
        let value = value.as_ref();
        if is_sentinel(value) {
            self.default = None;
        } else {
            self.default = Some(value.to_string());
        }
    }

    /// Record a profile-contributed value. Used by the merge engine only.
    pub fn set_alt(&mut self, value: impl Into<String>, source: impl Into<String>) {
        let value = value.into();
        if !is_sentinel(&value) {
            self.alt.push(Alternate { source: source.into(), value });
        }
    }

    pub fn get(&self) -> Option<&str> {
        self.value
            .as_deref()
            .or_else(|| self.alt.first().map(|a| a.value.as_str()))
            .or(self.default.as_deref())
    }

    pub fn get_bool(&self) -> bool {
        self.get().map(parse_bool).unwrap_or(false)
    }

    pub fn defined(&self) -> bool {
        self.get().is_some()
    }

    /// `--` if unset on the node, the contributing profile id if set only
    /// by a profile, `SUPERSEDED` if both a node value and an alternate
    /// are present, `""` (set directly) if the node overrides with no
    /// contributing alternate of note.
    pub fn source(&self) -> String {
        match (&self.value, self.alt.first()) {
            (Some(_), Some(_)) => "SUPERSEDED".to_string(),
            (Some(_), None) => String::new(),
            (None, Some(a)) => a.source.clone(),
            (None, None) => "--".to_string(),
        }
    }

    pub fn print(&self) -> String {
        match self.get() {
            Some(v) if self.value.is_none() && self.alt.is_empty() => format!("({v})"),
            Some(v) => v.to_string(),
            None => "--".to_string(),
        }
    }

    pub fn node_value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// An ordered list field (overlays, parent profiles, kernel args, ...).
///
/// Lists merge by concatenation across the profile chain with duplicates
/// removed and order preserved; an element prefixed with `~` negates an
/// earlier-recorded *later* element of the same name and is itself
/// dropped. See `merge::merge_list` for the exact concatenation algorithm
/// — this type only stores the node's own tail and tracks provenance.
#[derive(Debug, Clone, Default)]
pub struct ListField {
    /// Values contributed directly on the node (appended last).
    value: Vec<String>,
    /// Values contributed by profiles, in chain order, each paired with
    /// the profile id that contributed it.
    alt: Vec<Alternate>,
    default: Vec<String>,
}

impl ListField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, values: impl IntoIterator<Item = impl Into<String>>) {
        self.value = values.into_iter().map(Into::into).collect();
    }

    pub fn set_default(&mut self, values: impl IntoIterator<Item = impl Into<String>>) {
        self.default = values.into_iter().map(Into::into).collect();
    }

    pub fn push_alt(&mut self, value: impl Into<String>, source: impl Into<String>) {
        self.alt.push(Alternate { source: source.into(), value: value.into() });
    }

    pub fn node_value(&self) -> &[String] {
        &self.value
    }

    pub fn alternates(&self) -> &[Alternate] {
        &self.alt
    }

    pub fn default_value(&self) -> &[String] {
        &self.default
    }

    /// Effective list: profile contributions (in chain order) followed by
    /// the node's own tail, with `~name` negation and dedup applied. Falls
    /// back to the default layer only when nothing else contributed.
    pub fn get(&self) -> Vec<String> {
        if self.alt.is_empty() && self.value.is_empty() {
            return self.default.clone();
        }
        let raw = self
            .alt
            .iter()
            .map(|a| a.value.clone())
            .chain(self.value.iter().cloned());
        merge_negated(raw)
    }

    pub fn defined(&self) -> bool {
        !self.alt.is_empty() || !self.value.is_empty() || !self.default.is_empty()
    }

    pub fn source(&self) -> String {
        if !self.value.is_empty() && !self.alt.is_empty() {
            "SUPERSEDED".to_string()
        } else if !self.value.is_empty() {
            String::new()
        } else if !self.alt.is_empty() {
            self.alt.iter().map(|a| a.source.as_str()).collect::<Vec<_>>().join(",")
        } else {
            "--".to_string()
        }
    }

    pub fn print(&self) -> String {
        let active = self.get();
        let negated: Vec<&str> = self
            .alt
            .iter()
            .map(|a| a.value.as_str())
            .chain(self.value.iter().map(String::as_str))
            .filter(|v| v.starts_with('~'))
            .map(|v| &v[1..])
            .collect();
        if active.is_empty() && negated.is_empty() {
            return "--".to_string();
        }
        let mut out = active.join(",");
        if !negated.is_empty() {
            out.push_str(&format!(" ~{{{}}}", negated.join(",")));
        }
        out
    }
}

/// Concatenate a sequence that may contain `~name` negation markers into a
/// deduplicated, order-preserving list. Negation only removes an
/// already-appended element earlier in the sequence — it is forward only
/// with respect to append order, matching spec's "negates an identically
/// named later element" framed from the later-appended negator's view.
pub fn merge_negated(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if let Some(name) = item.strip_prefix('~') {
            out.retain(|existing| existing != name);
            continue;
        }
        if !out.iter().any(|existing| existing == &item) {
            out.push(item);
        }
    }
    out
}

impl Serialize for ScalarField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ScalarField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value: Option<String> = Option::deserialize(deserializer)?;
        let mut field = ScalarField::new();
        if let Some(v) = value {
            field.set(v);
        }
        Ok(field)
    }
}

impl Serialize for ListField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ListField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value: Vec<String> = Vec::deserialize(deserializer).map_err(de::Error::custom)?;
        let mut field = ListField::new();
        field.set(value);
        Ok(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_prefers_node_over_alt_over_default() {
        let mut f = ScalarField::new();
        f.set_default("def");
        assert_eq!(f.get(), Some("def"));
        f.set_alt("alt", "profA");
        assert_eq!(f.get(), Some("alt"));
        f.set("node");
        assert_eq!(f.get(), Some("node"));
    }

    #[test]
    fn scalar_source_reports_superseded() {
        let mut f = ScalarField::new();
        f.set_alt("alt", "profA");
        f.set("node");
        assert_eq!(f.source(), "SUPERSEDED");
    }

    #[test]
    fn scalar_source_reports_contributing_profile() {
        let mut f = ScalarField::new();
        f.set_alt("alt", "profA");
        assert_eq!(f.source(), "profA");
    }

    #[test]
    fn sentinel_clears_value() {
        let mut f = ScalarField::new();
        f.set("x");
        f.set("UNSET");
        assert_eq!(f.get(), None);
    }

    #[test]
    fn bool_parsing_matches_rule() {
        let mut f = ScalarField::new();
        f.set("No");
        assert!(!f.get_bool());
        f.set("0");
        assert!(!f.get_bool());
        f.set("anything");
        assert!(f.get_bool());
    }

    #[test]
    fn list_merges_and_dedups_preserving_order() {
        let mut f = ListField::new();
        f.push_alt("a", "p1");
        f.push_alt("b", "p1");
        f.push_alt("a", "p2");
        f.set(vec!["c"]);
        assert_eq!(f.get(), vec!["a", "b", "c"]);
    }

    #[test]
    fn negation_removes_earlier_element() {
        let items = vec!["a".to_string(), "b".to_string(), "~a".to_string()];
        assert_eq!(merge_negated(items), vec!["b".to_string()]);
    }

    #[test]
    fn list_falls_back_to_default_when_nothing_contributed() {
        let mut f = ListField::new();
        f.set_default(vec!["d1", "d2"]);
        assert_eq!(f.get(), vec!["d1".to_string(), "d2".to_string()]);
    }
}
