// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Compose document model.
//!
//! A compose file is a hand-edited artifact. Users keep comments in it, order
//! their keys with care, and pick their own quoting style. Stackenv must not
//! trample over any of that when it rewrites a service.
//!
//! # Two Views Of One Document
//!
//! serde_yaml is not round-trip safe, so a [`ComposeDocument`] keeps two views
//! of the same file around:
//!
//! 1. The __source text__, exactly as read from disk.
//! 2. The __structure__, a [`Value`] tree parsed from that text.
//!
//! Business logic inspects and mutates a clone of the structure to describe
//! the _intended_ result. The [`layout`] module then maps that intent onto
//! targeted line edits of the source text. The edited text is parsed again and
//! compared against the intended structure. Only if both agree is the edited
//! text used. Otherwise the intended structure is serialized from scratch,
//! which is always correct but loses comments and formatting.
//!
//! # Heterogeneous Fields
//!
//! The compose format lets `environment` be either a list of `KEY=VALUE`
//! strings or a mapping, and lets `env_file` be either a single string or a
//! list. Both fields are normalized through [`Environment`] and
//! [`EnvFileRef`] before any logic runs.

pub mod layout;

use crate::compose::layout::{Edit, Layout};

use serde_yaml::{Mapping, Value};
use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};
use tracing::warn;

/// Parsed compose document.
#[derive(Debug, Clone)]
pub struct ComposeDocument {
    source: String,
    root: Value,
}

impl ComposeDocument {
    /// Parse compose document from source text.
    ///
    /// # Errors
    ///
    /// - Return [`ComposeError::Parse`] if source is not valid YAML.
    pub fn parse(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let root = serde_yaml::from_str::<Value>(&source).map_err(ComposeError::Parse)?;

        Ok(Self { source, root })
    }

    /// Load compose document from file.
    ///
    /// # Errors
    ///
    /// - Return [`ComposeError::ReadComposeFile`] if file cannot be read.
    /// - Return [`ComposeError::Parse`] if file is not valid YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = read_to_string(path.as_ref()).map_err(|err| ComposeError::ReadComposeFile {
            source: err,
            compose_path: path.as_ref().to_path_buf(),
        })?;

        Self::parse(source)
    }

    /// Original source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Structural view of document.
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Check if document holds nothing at all.
    pub fn is_empty(&self) -> bool {
        self.root.is_null()
    }

    /// Service definitions in declaration order.
    ///
    /// Services with non-string names or non-mapping definitions are skipped.
    pub fn services(&self) -> impl Iterator<Item = (&str, &Mapping)> {
        self.root
            .get("services")
            .and_then(Value::as_mapping)
            .into_iter()
            .flat_map(|services| services.iter())
            .filter_map(|(name, definition)| Some((name.as_str()?, definition.as_mapping()?)))
    }

    /// Render intended structure back into text.
    ///
    /// Applies line edits to the source text, and keeps the result only if it
    /// parses back into the intended structure. Falls back to serializing the
    /// intended structure when no edits could be computed, or when the edited
    /// text does not match.
    ///
    /// # Errors
    ///
    /// - Return [`ComposeError::Serialize`] if fallback serialization fails.
    pub fn render(&self, intended: &Value, edits: Option<Vec<Edit>>) -> Result<Rendered> {
        if let Some(edits) = edits {
            let candidate = Layout::new(&self.source).apply(edits);
            match serde_yaml::from_str::<Value>(&candidate) {
                Ok(value) if value == *intended => return Ok(Rendered::Preserved(candidate)),
                Ok(_) => warn!("edited text does not match intended structure"),
                Err(err) => warn!("edited text is not valid YAML: {err}"),
            }
        }

        let text = serde_yaml::to_string(intended).map_err(ComposeError::Serialize)?;
        Ok(Rendered::Reserialized(text))
    }
}

/// Rendered compose text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    /// Original formatting and comments survived.
    Preserved(String),

    /// Document was serialized from scratch.
    Reserialized(String),
}

impl Rendered {
    pub fn text(&self) -> &str {
        match self {
            Self::Preserved(text) | Self::Reserialized(text) => text,
        }
    }

    pub fn is_preserved(&self) -> bool {
        matches!(self, Self::Preserved(_))
    }
}

/// Environment block of a service.
#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    /// Key present but holding nothing.
    Empty,

    /// List of `KEY=VALUE` entries.
    List(Vec<Value>),

    /// Mapping of key to value.
    Map(Mapping),
}

impl Environment {
    /// Normalize environment field.
    ///
    /// Returns [`None`] for scalar shapes that compose does not accept.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Empty),
            Value::Sequence(entries) => Some(Self::List(entries.clone())),
            Value::Mapping(mapping) => Some(Self::Map(mapping.clone())),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::List(entries) => entries.is_empty(),
            Self::Map(mapping) => mapping.is_empty(),
        }
    }

    /// Flatten environment into textual key-value pairs.
    ///
    /// List entries are split at their first `=`, with key and value trimmed.
    /// Mapping values are coerced to text. Entries that cannot be expressed
    /// as text are reported through `rejected` and left out.
    pub fn to_pairs(&self, mut rejected: impl FnMut(&str)) -> Vec<(String, String)> {
        match self {
            Self::Empty => Vec::new(),
            Self::List(entries) => entries
                .iter()
                .filter_map(|entry| {
                    let pair = entry
                        .as_str()
                        .and_then(|entry| entry.split_once('='))
                        .map(|(key, value)| (key.trim().to_owned(), value.trim().to_owned()))
                        .filter(|(key, _)| !key.is_empty());
                    if pair.is_none() {
                        rejected(&describe(entry));
                    }
                    pair
                })
                .collect(),
            Self::Map(mapping) => mapping
                .iter()
                .filter_map(|(key, value)| {
                    let pair = scalar_text(key)
                        .zip(scalar_text(value))
                        .map(|(key, value)| (key.trim().to_owned(), value.trim().to_owned()))
                        .filter(|(key, _)| !key.is_empty());
                    if pair.is_none() {
                        rejected(&describe(key));
                    }
                    pair
                })
                .collect(),
        }
    }

    /// Convert environment into mapping form.
    ///
    /// List entries are split at their first `=`. The value text is kept as a
    /// string. Entries without a `=` are reported through `rejected` and
    /// dropped.
    pub fn to_mapping(&self, mut rejected: impl FnMut(&str)) -> Mapping {
        match self {
            Self::Empty => Mapping::new(),
            Self::Map(mapping) => mapping.clone(),
            Self::List(entries) => {
                let mut mapping = Mapping::new();
                for entry in entries {
                    match entry.as_str().and_then(|entry| entry.split_once('=')) {
                        Some((key, value)) if !key.trim().is_empty() => {
                            mapping.insert(key.trim().into(), value.into());
                        }
                        _ => rejected(&describe(entry)),
                    }
                }
                mapping
            }
        }
    }
}

/// Env file reference of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvFileRef {
    /// `env_file: stack.env`
    Single(String),

    /// `env_file: [stack.env, other.env]`
    List(Vec<String>),
}

impl EnvFileRef {
    /// Normalize env_file field.
    ///
    /// List entries may be plain paths, or long syntax mappings carrying a
    /// `path` key. Entries of any other shape are ignored.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(path) => Some(Self::Single(path.clone())),
            Value::Sequence(entries) => Some(Self::List(
                entries
                    .iter()
                    .filter_map(|entry| match entry {
                        Value::String(path) => Some(path.clone()),
                        Value::Mapping(long) => long.get("path")?.as_str().map(str::to_owned),
                        _ => None,
                    })
                    .collect(),
            )),
            _ => None,
        }
    }

    /// Referenced paths.
    pub fn paths(&self) -> &[String] {
        match self {
            Self::Single(path) => std::slice::from_ref(path),
            Self::List(paths) => paths,
        }
    }

    /// Check if the env file of given name is referenced.
    ///
    /// A leading `./` on the referenced path is ignored.
    pub fn references(&self, name: impl AsRef<str>) -> bool {
        self.paths()
            .iter()
            .any(|path| path.strip_prefix("./").unwrap_or(path) == name.as_ref())
    }

    /// Structural form of a single-entry list reference.
    pub fn list_value(name: impl Into<String>) -> Value {
        Value::Sequence(vec![Value::String(name.into())])
    }
}

/// Coerce scalar to text.
///
/// Null becomes the empty string. Collections and tagged values have no text.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) => Some(text.clone()),
        Value::Sequence(_) | Value::Mapping(_) | Value::Tagged(_) => None,
    }
}

fn describe(value: &Value) -> String {
    scalar_text(value).unwrap_or_else(|| format!("{value:?}"))
}

/// Compose document error types.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    /// Compose file cannot be read from.
    #[error("failed to read compose file at {:?}", compose_path.display())]
    ReadComposeFile {
        #[source]
        source: std::io::Error,
        compose_path: PathBuf,
    },

    /// Compose file cannot be written to.
    #[error("failed to write compose file at {:?}", compose_path.display())]
    WriteComposeFile {
        #[source]
        source: std::io::Error,
        compose_path: PathBuf,
    },

    /// Compose file is not valid YAML.
    #[error("invalid YAML")]
    Parse(#[source] serde_yaml::Error),

    /// Compose structure cannot be serialized.
    #[error("failed to serialize compose document")]
    Serialize(#[source] serde_yaml::Error),
}

/// Friendly result alias :3
pub type Result<T, E = ComposeError> = std::result::Result<T, E>;
