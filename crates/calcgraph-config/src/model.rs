//! Typed shapes for the recognized top-level sections of a configuration
//! file (spec.md §6.2), deserialized with `serde_yaml`.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Accept either a single item or a list of items for sections the original
/// lets you write either way (`genno/config.py`'s handlers each call
/// `as_codes`/`_handle` on whatever shape the user wrote).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(t) => vec![t],
            OneOrMany::Many(ts) => ts,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UnitsSection {
    pub define: Option<String>,
    #[serde(default)]
    pub replace: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct FileSection {
    pub path: String,
    pub key: String,
    #[serde(default)]
    pub dims: BTreeMap<String, String>,
    pub units: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AliasSection {
    /// `[existing_key, new_key]`.
    Pair(Vec<String>),
    /// `{existing_key: new_key, …}`.
    Mapping(BTreeMap<String, String>),
}

#[derive(Debug, Deserialize)]
pub struct AggregateSection {
    #[serde(rename = "_quantities")]
    pub quantities: Vec<String>,
    #[serde(rename = "_tag")]
    pub tag: Option<String>,
    #[serde(rename = "_dim")]
    pub dim: String,
    /// Every other key in the mapping is a `{new_label: [old_labels]}` group.
    #[serde(flatten)]
    pub groups: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct CombineInput {
    pub quantity: String,
    #[serde(default)]
    pub select: BTreeMap<String, Vec<String>>,
    pub weight: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CombineSection {
    pub key: String,
    pub inputs: Vec<CombineInput>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralSection {
    pub comp: String,
    pub key: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub args: Vec<serde_yaml::Value>,
    #[serde(default)]
    pub sums: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReportSection {
    pub key: String,
    pub members: Vec<String>,
}

/// The whole file: every recognized section is optional, and anything else
/// (including `iamc`) is captured in `extra` so the loader can warn about it
/// without failing (spec.md §6.2: "Unknown sections produce a warning; they
/// are ignored").
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub units: Option<UnitsSection>,
    pub default: Option<String>,
    pub files: Option<OneOrMany<FileSection>>,
    pub alias: Option<AliasSection>,
    pub aggregate: Option<Vec<AggregateSection>>,
    pub combine: Option<Vec<CombineSection>>,
    pub general: Option<Vec<GeneralSection>>,
    pub report: Option<ReportSection>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

const KNOWN_SECTIONS: &[&str] = &[
    "units", "default", "files", "alias", "aggregate", "combine", "general", "report",
];

impl RawConfig {
    /// Section names present in `extra` that are not `iamc` or any other
    /// recognized name — purely unrecognized, as opposed to `iamc`, which is
    /// recognized but deliberately unimplemented (both still just warn).
    pub fn unknown_section_names(&self) -> Vec<&str> {
        self.extra
            .keys()
            .map(String::as_str)
            .filter(|k| !KNOWN_SECTIONS.contains(k))
            .collect()
    }
}
