// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Env file handling.
//!
//! An __env file__ is a flat text file of `KEY=VALUE` lines that compose
//! services pull in through their `env_file` key. Lines starting with `#` are
//! comments. Lines without a `=` are ignored.
//!
//! # Canonical Layout
//!
//! Stackenv always writes env files in one canonical layout: one `KEY=VALUE`
//! line per variable, sorted lexicographically by key. Comments of an existing
//! env file do not survive a rewrite. Sorting keeps the output stable no matter
//! what order services were declared in, so re-running the merger over the
//! same input produces byte-identical files.
//!
//! # Redaction Scanner
//!
//! The scanner reads an env file and yields every variable whose value is the
//! [redaction sentinel](crate::sentinel::REDACTED_SENTINEL), in order of first
//! appearance.

use crate::sentinel::{is_redacted_sentinel, is_valid_name};

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_to_string, write},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, error};

/// Env file editor.
///
/// # Invariant
///
/// - Keys are unique, last write wins.
/// - Output is sorted by key.
/// - Inserting an identical value does not count as a change.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnvMap {
    vars: BTreeMap<String, String>,
    changed: bool,
}

impl EnvMap {
    /// Construct new empty env map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load env map from env file at target path.
    ///
    /// A missing env file is treated as an empty env map.
    ///
    /// # Errors
    ///
    /// - Return [`EnvError::ReadEnvFile`] if env file exists but cannot be
    ///   read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        match read_to_string(path.as_ref()) {
            Ok(content) => Ok(Self::from(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no env file at {:?}", path.as_ref().display());
                Ok(Self::new())
            }
            Err(err) => Err(EnvError::ReadEnvFile {
                source: err,
                env_path: path.as_ref().to_path_buf(),
            }),
        }
    }

    /// Write canonical layout of env map to target path.
    ///
    /// Leaves the file untouched if its current content already matches.
    /// Returns `true` if the file was written.
    ///
    /// # Errors
    ///
    /// - Return [`EnvError::WriteEnvFile`] if env file cannot be written to.
    pub fn store(&self, path: impl AsRef<Path>) -> Result<bool> {
        let content = self.to_string();
        if read_to_string(path.as_ref()).is_ok_and(|current| current == content) {
            return Ok(false);
        }

        write(path.as_ref(), content.as_bytes()).map_err(|err| EnvError::WriteEnvFile {
            source: err,
            env_path: path.as_ref().to_path_buf(),
        })?;

        Ok(true)
    }

    /// Insert variable.
    ///
    /// Returns the previous value if the insertion replaced a different one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.vars.get(&key) {
            Some(current) if *current == value => None,
            _ => {
                self.changed = true;
                self.vars.insert(key, value)
            }
        }
    }

    /// Get value of variable.
    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        self.vars.get(key.as_ref()).map(String::as_str)
    }

    /// Iterate through variables in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Check if env map was modified since it was loaded.
    pub fn is_changed(&self) -> bool {
        self.changed
    }
}

impl Display for EnvMap {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for (key, value) in &self.vars {
            writeln!(fmt, "{key}={value}")?;
        }

        Ok(())
    }
}

impl From<&str> for EnvMap {
    fn from(content: &str) -> Self {
        let vars = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim(), value.trim()))
            .filter(|(key, _)| !key.is_empty())
            .map(|(key, value)| (key.to_owned(), value.to_owned()))
            .collect::<BTreeMap<_, _>>();

        Self {
            vars,
            changed: false,
        }
    }
}

impl From<String> for EnvMap {
    fn from(content: String) -> Self {
        Self::from(content.as_str())
    }
}

/// List variables whose value is the redaction sentinel.
///
/// Names are yielded in order of first appearance without duplicates.
pub fn redacted_names(content: impl AsRef<str>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for line in content.as_ref().lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        let key = key.trim();
        if is_valid_name(key) && is_redacted_sentinel(value) && !names.iter().any(|n| n == key) {
            names.push(key.to_owned());
        }
    }

    names
}

/// Scan env file at target path for redacted variables.
///
/// A missing or unreadable env file is reported, and yields no names.
pub fn scan_env_file(path: impl AsRef<Path>) -> Vec<String> {
    match read_to_string(path.as_ref()) {
        Ok(content) => redacted_names(content),
        Err(err) => {
            let err = EnvError::ReadEnvFile {
                source: err,
                env_path: path.as_ref().to_path_buf(),
            };
            error!("{err}");
            Vec::new()
        }
    }
}

/// Env file error types.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    /// Env file cannot be read from.
    #[error("failed to read env file at {:?}", env_path.display())]
    ReadEnvFile {
        #[source]
        source: std::io::Error,
        env_path: PathBuf,
    },

    /// Env file cannot be written to.
    #[error("failed to write env file at {:?}", env_path.display())]
    WriteEnvFile {
        #[source]
        source: std::io::Error,
        env_path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = EnvError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[test]
    fn env_map_parse_and_sort() {
        let env = EnvMap::from(indoc! {r#"
            # database settings
            TZ=Europe/Berlin
            DB_HOST = db
            not a variable
            URL=http://host/?a=b
            =orphan
        "#});

        let expect = indoc! {r#"
            DB_HOST=db
            TZ=Europe/Berlin
            URL=http://host/?a=b
        "#};
        assert_eq!(env.to_string(), expect);
        assert!(!env.is_changed());
    }

    #[test]
    fn env_map_insertion_reports_overwrite() {
        let mut env = EnvMap::from("A=1\n");

        assert_eq!(env.insert("A", "1"), None);
        assert!(!env.is_changed());

        assert_eq!(env.insert("A", "2"), Some("1".into()));
        assert_eq!(env.insert("B", "3"), None);
        assert!(env.is_changed());
        assert_eq!(env.to_string(), "A=2\nB=3\n");
    }

    #[test]
    fn redacted_names_in_order_of_appearance() {
        let result = redacted_names(indoc! {r#"
            SECRET3=notredacted
            SECRET=redacted
            # COMMENTED=redacted

            SECRET2="redacted"
            SECRET4='redacted'
            SECRET=redacted
            SECRET5=redacted # trailing
            BAD-NAME=redacted
        "#});

        assert_eq!(result, vec!["SECRET", "SECRET2", "SECRET4"]);
    }

    #[sealed_test]
    fn env_map_store_skips_identical_content() -> anyhow::Result<()> {
        let mut env = EnvMap::new();
        env.insert("B", "2");
        env.insert("A", "1");

        assert!(env.store("stack.env")?);
        assert_eq!(read_to_string("stack.env")?, "A=1\nB=2\n");
        assert!(!env.store("stack.env")?);

        Ok(())
    }

    #[sealed_test]
    fn env_map_load_missing_file_is_empty() -> anyhow::Result<()> {
        let env = EnvMap::load("missing.env")?;
        assert!(env.is_empty());

        Ok(())
    }

    #[sealed_test]
    fn scan_missing_env_file_is_empty() {
        assert!(scan_env_file("missing.env").is_empty());
    }
}
