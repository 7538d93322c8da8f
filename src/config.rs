// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the configuration file that Stackenv uses to locate
//! its stack store. Every field is optional:
//!
//! ```toml
//! store = "$HOME/homelab-stacks"
//! compose_file = "docker-compose.yml"
//! env_file = "stack.env"
//! ```

use crate::{
    sentinel::{DEFAULT_COMPOSE_FILE, DEFAULT_ENV_FILE},
    store::StackLayout,
};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Stackenv settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Path to stack store.
    pub store: PathBuf,

    /// Name of compose file of each stack.
    pub compose_file: String,

    /// Name of shared env file of each stack.
    pub env_file: String,
}

impl Settings {
    /// Load settings from configuration file.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ReadConfig`] if file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file content is invalid.
    /// - Return [`ConfigError::ShellExpansion`] if store path cannot be
    ///   expanded.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_to_string(path.as_ref())
            .map_err(|err| ConfigError::ReadConfig {
                source: err,
                config_path: path.as_ref().to_path_buf(),
            })?
            .parse()
    }

    /// File names each stack uses.
    pub fn layout(&self) -> StackLayout {
        StackLayout {
            compose_file: self.compose_file.clone(),
            env_file: self.env_file.clone(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: PathBuf::from("homelab-stacks"),
            compose_file: DEFAULT_COMPOSE_FILE.into(),
            env_file: DEFAULT_ENV_FILE.into(),
        }
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::from_str(data)?;

        // INVARIANT: Perform shell expansion on store path.
        settings.store = PathBuf::from(
            shellexpand::full(settings.store.to_string_lossy().as_ref())?.into_owned(),
        );

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Configuration file cannot be read from.
    #[error("failed to read configuration file at {:?}", config_path.display())]
    ReadConfig {
        #[source]
        source: std::io::Error,
        config_path: PathBuf,
    },
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("STACKS", "/srv/stacks")])]
    fn deserialize_settings() -> anyhow::Result<()> {
        let result: Settings = r#"
            store = "$STACKS/homelab"
            env_file = "shared.env"
        "#
        .parse()?;

        let expect = Settings {
            store: PathBuf::from("/srv/stacks/homelab"),
            compose_file: "docker-compose.yml".into(),
            env_file: "shared.env".into(),
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn deserialize_empty_settings() -> anyhow::Result<()> {
        let result: Settings = "".parse()?;
        assert_eq!(result, Settings::default());

        Ok(())
    }

    #[test]
    fn serialize_settings() {
        let result = Settings {
            store: PathBuf::from("/srv/stacks"),
            ..Default::default()
        }
        .to_string();

        let expect = indoc! {r#"
            store = "/srv/stacks"
            compose_file = "docker-compose.yml"
            env_file = "stack.env"
        "#};

        assert_eq!(result, expect);
    }

    #[sealed_test]
    fn load_missing_settings() {
        let result = Settings::load("config.toml");
        assert!(matches!(result, Err(ConfigError::ReadConfig { .. })));
    }
}
