// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Stack store management.
//!
//! Stackenv works on a directory called the __stack store__. The stack store
//! houses one subdirectory per stack, usually populated by exporting stacks
//! from a container orchestrator, or written by hand.
//!
//! # Stack Store Layout
//!
//! Each stack is given its own unique local name. The name of a stack in the
//! stack store is the name of the directory that contains it. Inside, a stack
//! owns exactly one compose file (`docker-compose.yml` by default), and zero or
//! one env file (`stack.env` by default):
//!
//! ```text
//! homelab-stacks/
//! ├── jellyfin/
//! │   ├── docker-compose.yml
//! │   └── stack.env
//! └── pihole/
//!     └── docker-compose.yml
//! ```
//!
//! Stackenv only evaluates the top-level of the stack store. Thus, it is not
//! possible to nest stacks inside one another.
//!
//! # Exclusive Ownership
//!
//! No locking is performed. The caller must make sure nothing else edits the
//! stack store while a run is in progress.

use crate::sentinel::{DEFAULT_COMPOSE_FILE, DEFAULT_ENV_FILE};

use std::{
    fs::read_dir,
    path::{Path, PathBuf},
};

/// File names every stack in the store uses.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct StackLayout {
    /// Name of compose file.
    pub compose_file: String,

    /// Name of shared env file.
    pub env_file: String,
}

impl Default for StackLayout {
    fn default() -> Self {
        Self {
            compose_file: DEFAULT_COMPOSE_FILE.into(),
            env_file: DEFAULT_ENV_FILE.into(),
        }
    }
}

/// Single stack of stack store.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Stack {
    name: String,
    compose_path: PathBuf,
    env_path: PathBuf,
}

impl Stack {
    /// Construct new stack from its directory.
    pub fn new(path: impl AsRef<Path>, layout: &StackLayout) -> Self {
        let path = path.as_ref();
        Self {
            name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            compose_path: path.join(&layout.compose_file),
            env_path: path.join(&layout.env_file),
        }
    }

    /// Name of stack.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path to compose file.
    pub fn compose_path(&self) -> &Path {
        &self.compose_path
    }

    /// Path to env file.
    pub fn env_path(&self) -> &Path {
        &self.env_path
    }

    pub fn has_compose_file(&self) -> bool {
        self.compose_path.is_file()
    }

    pub fn has_env_file(&self) -> bool {
        self.env_path.is_file()
    }
}

/// Stack store.
#[derive(Debug, Clone)]
pub struct StackStore {
    root: PathBuf,
    layout: StackLayout,
}

impl StackStore {
    /// Open existing stack store.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::MissingRoot`] if path is not an existing
    ///   directory.
    pub fn open(path: impl Into<PathBuf>, layout: StackLayout) -> Result<Self> {
        let root = path.into();
        if !root.is_dir() {
            return Err(StoreError::MissingRoot { store_path: root });
        }

        Ok(Self { root, layout })
    }

    /// Path to stack store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File names used by stacks.
    pub fn layout(&self) -> &StackLayout {
        &self.layout
    }

    /// List all stacks sorted by name.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ReadStore`] if stack store cannot be listed.
    pub fn stacks(&self) -> Result<Vec<Stack>> {
        let read_err = |err: std::io::Error| StoreError::ReadStore {
            source: err,
            store_path: self.root.clone(),
        };

        let mut stacks = Vec::new();
        for entry in read_dir(&self.root).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.is_dir() {
                stacks.push(Stack::new(path, &self.layout));
            }
        }
        stacks.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(stacks)
    }

    /// Get stack by name.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::MissingStack`] if no stack of that name exists.
    pub fn stack(&self, name: impl AsRef<str>) -> Result<Stack> {
        let path = self.root.join(name.as_ref());
        if !path.is_dir() {
            return Err(StoreError::MissingStack {
                name: name.as_ref().into(),
                store_path: self.root.clone(),
            });
        }

        Ok(Stack::new(path, &self.layout))
    }
}

/// All possible error types for stack store interaction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Stack store does not exist.
    #[error("stack store {:?} does not exist or is not a directory", store_path.display())]
    MissingRoot { store_path: PathBuf },

    /// Stack store cannot be listed.
    #[error("failed to read stack store at {:?}", store_path.display())]
    ReadStore {
        #[source]
        source: std::io::Error,
        store_path: PathBuf,
    },

    /// Stack does not exist in stack store.
    #[error("stack {name:?} does not exist in {:?}", store_path.display())]
    MissingStack { name: String, store_path: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs::{create_dir_all, write};

    #[sealed_test]
    fn open_missing_store() {
        let result = StackStore::open("homelab-stacks", StackLayout::default());
        assert!(matches!(result, Err(StoreError::MissingRoot { .. })));
    }

    #[sealed_test]
    fn list_stacks_sorted() -> anyhow::Result<()> {
        create_dir_all("homelab-stacks/pihole")?;
        create_dir_all("homelab-stacks/jellyfin")?;
        write("homelab-stacks/jellyfin/docker-compose.yml", "services: {}\n")?;
        write("homelab-stacks/README.md", "not a stack\n")?;

        let store = StackStore::open("homelab-stacks", StackLayout::default())?;
        let stacks = store.stacks()?;
        let names = stacks.iter().map(Stack::name).collect::<Vec<_>>();
        assert_eq!(names, vec!["jellyfin", "pihole"]);

        assert!(stacks[0].has_compose_file());
        assert!(!stacks[0].has_env_file());
        assert_eq!(
            stacks[0].env_path(),
            Path::new("homelab-stacks/jellyfin/stack.env")
        );
        assert!(!stacks[1].has_compose_file());

        Ok(())
    }

    #[sealed_test]
    fn get_stack_by_name() -> anyhow::Result<()> {
        create_dir_all("homelab-stacks/pihole")?;
        let store = StackStore::open("homelab-stacks", StackLayout::default())?;

        assert_eq!(store.stack("pihole")?.name(), "pihole");
        assert!(matches!(
            store.stack("jellyfin"),
            Err(StoreError::MissingStack { .. })
        ));

        Ok(())
    }
}
