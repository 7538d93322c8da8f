// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Env merger.
//!
//! Moves inline `environment` entries of every service in a stack out of the
//! compose file, and into the stack's shared env file. Each rewritten service
//! then references the env file through `env_file` instead.
//!
//! # Merge Precedence
//!
//! The merged env file starts out as the existing env file of the stack. Then,
//! every service is overlaid in declaration order. Thus, inline entries always
//! beat the existing env file, and later services beat earlier ones. Every
//! time an overlay replaces a _different_ value, a warning is logged, because
//! the replaced value may have been edited by hand after a previous merge.
//!
//! # Placeholders
//!
//! Entries like `SECRET: ${SECRET}` are written by the
//! [compose patcher](crate::patch), and are not real values. They never end
//! up in the env file, and a service holding nothing but placeholders is left
//! alone.
//!
//! # Tabs
//!
//! Compose parsers reject tab indentation. So, before anything is parsed, every
//! compose file in the stack store gets its tabs replaced with two spaces.

use crate::{
    compose::{
        layout::{render_text, Edit, Layout},
        ComposeDocument, ComposeError, EnvFileRef, Environment,
    },
    env::{EnvError, EnvMap},
    sentinel::is_interpolation_placeholder,
    store::Stack,
};

use serde_yaml::{Mapping, Value};
use std::{
    collections::HashMap,
    fs::{read_to_string, write},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Result of merging a single stack.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Services whose inline environment was moved into the env file.
    pub services: Vec<String>,

    /// Env file was written.
    pub env_written: bool,

    /// Compose file was written.
    pub compose_written: bool,

    /// Compose file formatting had to be given up.
    pub reserialized: bool,
}

impl MergeOutcome {
    pub fn is_modified(&self) -> bool {
        self.env_written || self.compose_written
    }
}

/// Merge inline environment of all services into env file of stack.
///
/// An unreadable env file is treated as empty.
///
/// # Errors
///
/// - Return [`MergeError::Compose`] if compose file cannot be read, parsed,
///   or written.
/// - Return [`MergeError::Env`] if env file cannot be written.
#[instrument(skip(stack), fields(stack = stack.name()), level = "debug")]
pub fn merge_stack(stack: &Stack, env_file: &str) -> Result<MergeOutcome> {
    let document = ComposeDocument::load(stack.compose_path())?;
    if document.is_empty() {
        warn!("{}: compose file is empty, skipping", stack.name());
        return Ok(MergeOutcome::default());
    }

    let mut env = EnvMap::load(stack.env_path()).unwrap_or_else(|err| {
        warn!("{}: {err}, treating it as empty", stack.name());
        EnvMap::new()
    });
    let mut origins = env
        .iter()
        .map(|(key, _)| (key.to_owned(), env_file.to_owned()))
        .collect::<HashMap<_, _>>();

    let mut outcome = MergeOutcome::default();
    for (name, definition) in document.services() {
        let pairs = inline_pairs(stack.name(), name, definition);
        if pairs.is_empty() {
            continue;
        }

        for (key, value) in pairs {
            if env.insert(&key, value).is_some() {
                let origin = origins.get(&key).map_or("unknown", String::as_str);
                warn!(
                    "{}: service {name} overrides {key} previously set by {origin}",
                    stack.name()
                );
            }
            origins.insert(key, format!("service {name}"));
        }

        info!("cleaned up {}/{name}", stack.name());
        outcome.services.push(name.to_owned());
    }

    if outcome.services.is_empty() {
        debug!("{}: no inline environment found", stack.name());
        return Ok(outcome);
    }

    outcome.env_written = env.store(stack.env_path())?;
    if outcome.env_written {
        info!("merged {} written to {:?}", env_file, stack.env_path().display());
    }

    let intended = intended_structure(document.root(), &outcome.services, env_file);
    let edits = layout_edits(&document, &outcome.services, env_file);
    let rendered = document.render(&intended, edits)?;
    if !rendered.is_preserved() {
        warn!(
            "{}: could not preserve formatting of {:?}, comments are lost",
            stack.name(),
            stack.compose_path().display()
        );
        outcome.reserialized = true;
    }

    write(stack.compose_path(), rendered.text()).map_err(|err| ComposeError::WriteComposeFile {
        source: err,
        compose_path: stack.compose_path().to_path_buf(),
    })?;
    outcome.compose_written = true;
    info!("updated {:?}", stack.compose_path().display());

    Ok(outcome)
}

/// Replace tabs with two spaces in every compose file below root.
///
/// Files without tabs are left untouched. Failures are logged, and do not
/// stop the sweep. Returns number of rewritten files.
#[instrument(skip(root), level = "debug")]
pub fn normalize_tabs(root: impl AsRef<Path>, compose_file: &str) -> usize {
    info!("fixing tabs in {compose_file} files");
    let pattern = format!(
        "{}/**/{}",
        glob::Pattern::escape(&root.as_ref().to_string_lossy()),
        glob::Pattern::escape(compose_file)
    );

    let paths = match glob::glob(&pattern) {
        Ok(paths) => paths,
        Err(err) => {
            warn!("invalid search pattern {pattern:?}: {err}");
            return 0;
        }
    };

    let mut fixed = 0;
    for entry in paths {
        match entry.map_err(MergeError::from).and_then(replace_tabs) {
            Ok(true) => fixed += 1,
            Ok(false) => {}
            Err(err) => warn!("{err}"),
        }
    }

    info!("tabs replaced with spaces in {fixed} compose files");
    fixed
}

fn replace_tabs(path: PathBuf) -> Result<bool> {
    let content = read_to_string(&path).map_err(|err| MergeError::FixTabs {
        source: err,
        compose_path: path.clone(),
    })?;
    if !content.contains('\t') {
        return Ok(false);
    }

    debug!("replacing tabs in {:?}", path.display());
    write(&path, content.replace('\t', "  ")).map_err(|err| MergeError::FixTabs {
        source: err,
        compose_path: path.clone(),
    })?;

    Ok(true)
}

/// Collect inline entries of service that are worth merging.
fn inline_pairs(stack: &str, service: &str, definition: &Mapping) -> Vec<(String, String)> {
    let Some(value) = definition.get("environment") else {
        return Vec::new();
    };

    let Some(environment) = Environment::from_value(value) else {
        warn!("{stack}/{service}: environment is neither a list nor a mapping, skipping");
        return Vec::new();
    };

    environment
        .to_pairs(|entry| warn!("{stack}/{service}: cannot merge environment entry {entry:?}"))
        .into_iter()
        .filter(|(key, value)| !is_interpolation_placeholder(key, value))
        .collect()
}

/// Build structure of compose document after merge.
///
/// The `environment` key of each merged service is dropped. An existing
/// `env_file` key is replaced in place, otherwise it takes the spot of the
/// dropped `environment` key.
fn intended_structure(root: &Value, services: &[String], env_file: &str) -> Value {
    let mut root = root.clone();
    let Some(definitions) = root.get_mut("services").and_then(Value::as_mapping_mut) else {
        return root;
    };

    for name in services {
        let Some(definition) = definitions.get_mut(name.as_str()).and_then(Value::as_mapping_mut)
        else {
            continue;
        };

        let has_env_file = definition.contains_key("env_file");
        let mut rebuilt = Mapping::new();
        for (key, value) in definition.iter() {
            match key.as_str() {
                Some("environment") if has_env_file => {}
                Some("environment") | Some("env_file") => {
                    rebuilt.insert("env_file".into(), EnvFileRef::list_value(env_file));
                }
                _ => {
                    rebuilt.insert(key.clone(), value.clone());
                }
            }
        }
        *definition = rebuilt;
    }

    root
}

/// Compute line edits matching [`intended_structure`].
///
/// Returns [`None`] if the layout of any merged service cannot be located.
fn layout_edits(document: &ComposeDocument, services: &[String], env_file: &str) -> Option<Vec<Edit>> {
    let layout = Layout::new(document.source());
    let located = layout.services()?;

    let mut edits = Vec::new();
    for name in services {
        let service = located.iter().find(|service| service.name == *name)?;
        if !service.is_block() {
            return None;
        }

        let indent = " ".repeat(service.child_indent);
        let entry_indent = " ".repeat(service.child_indent + service.step());
        let env_file_lines = vec![
            format!("{indent}env_file:"),
            format!("{entry_indent}- {}", render_text(env_file)?),
        ];

        let environment = layout.key(service, "environment")?;
        match layout.key(service, "env_file") {
            Some(current) => {
                edits.push(Edit::delete(environment.span));
                let keep = document
                    .services()
                    .find(|(service, _)| *service == name.as_str())
                    .and_then(|(_, definition)| definition.get("env_file"))
                    .is_some_and(|current| *current == EnvFileRef::list_value(env_file));
                if !keep {
                    edits.push(Edit::replace(current.span, env_file_lines));
                }
            }
            None => edits.push(Edit::replace(environment.span, env_file_lines)),
        }
    }

    Some(edits)
}

/// Env merger error types.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// Compose file handling fails.
    #[error(transparent)]
    Compose(#[from] ComposeError),

    /// Env file handling fails.
    #[error(transparent)]
    Env(#[from] EnvError),

    /// Compose file path cannot be resolved while searching for tabs.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),

    /// Tabs cannot be replaced in compose file.
    #[error("failed to replace tabs in {:?}", compose_path.display())]
    FixTabs {
        #[source]
        source: std::io::Error,
        compose_path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = MergeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StackLayout;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs::create_dir_all;

    fn stack_with(compose: &str, env: Option<&str>) -> anyhow::Result<Stack> {
        create_dir_all("stacks/media")?;
        write("stacks/media/docker-compose.yml", compose)?;
        if let Some(env) = env {
            write("stacks/media/stack.env", env)?;
        }

        Ok(Stack::new("stacks/media", &StackLayout::default()))
    }

    #[sealed_test]
    fn merge_inline_over_existing_env_file() -> anyhow::Result<()> {
        let stack = stack_with(
            indoc! {r#"
                services:
                  app:
                    image: app:latest
                    environment:
                      - A=2
                      - C=3
            "#},
            Some("# managed by hand\nA=1\nB=1\n"),
        )?;

        let outcome = merge_stack(&stack, "stack.env")?;
        assert_eq!(outcome.services, vec!["app"]);
        assert!(outcome.env_written && outcome.compose_written);
        assert!(!outcome.reserialized);
        assert_eq!(read_to_string(stack.env_path())?, "A=2\nB=1\nC=3\n");

        Ok(())
    }

    #[sealed_test]
    fn merge_union_keeps_formatting() -> anyhow::Result<()> {
        let stack = stack_with(
            indoc! {r#"
                # media stack
                services:
                  web:
                    image: nginx # pinned later
                    environment:
                      A: 1
                    ports:
                      - "8080:80"

                  worker:
                    image: worker
                    env_file: other.env
                    environment:
                      - B=2
                volumes:
                  data: {}
            "#},
            None,
        )?;

        merge_stack(&stack, "stack.env")?;
        assert_eq!(read_to_string(stack.env_path())?, "A=1\nB=2\n");

        let expect = indoc! {r#"
            # media stack
            services:
              web:
                image: nginx # pinned later
                env_file:
                  - stack.env
                ports:
                  - "8080:80"

              worker:
                image: worker
                env_file:
                  - stack.env
            volumes:
              data: {}
        "#};
        assert_eq!(read_to_string(stack.compose_path())?, expect);

        Ok(())
    }

    #[sealed_test]
    fn merge_twice_changes_nothing() -> anyhow::Result<()> {
        let stack = stack_with(
            indoc! {r#"
                services:
                  app:
                    image: app
                    environment:
                      TZ: Europe/Berlin
            "#},
            None,
        )?;

        assert!(merge_stack(&stack, "stack.env")?.is_modified());
        let compose = read_to_string(stack.compose_path())?;
        let env = read_to_string(stack.env_path())?;

        let outcome = merge_stack(&stack, "stack.env")?;
        assert!(!outcome.is_modified());
        assert_eq!(read_to_string(stack.compose_path())?, compose);
        assert_eq!(read_to_string(stack.env_path())?, env);

        Ok(())
    }

    #[sealed_test]
    fn merge_skips_placeholders() -> anyhow::Result<()> {
        let compose = indoc! {r#"
            services:
              app:
                image: app
                env_file:
                  - stack.env
                environment:
                  SECRET: ${SECRET}
        "#};
        let stack = stack_with(compose, Some("SECRET=redacted\n"))?;

        let outcome = merge_stack(&stack, "stack.env")?;
        assert!(!outcome.is_modified());
        assert_eq!(read_to_string(stack.compose_path())?, compose);
        assert_eq!(read_to_string(stack.env_path())?, "SECRET=redacted\n");

        Ok(())
    }

    #[sealed_test]
    fn merge_invalid_yaml_fails() -> anyhow::Result<()> {
        let stack = stack_with("services:\n  app: [oops\n", None)?;
        let result = merge_stack(&stack, "stack.env");
        assert!(matches!(result, Err(MergeError::Compose(ComposeError::Parse(_)))));
        assert!(!stack.has_env_file());

        Ok(())
    }

    #[sealed_test]
    fn merge_flow_style_falls_back_to_serialization() -> anyhow::Result<()> {
        let stack = stack_with(
            "services: {app: {image: app, environment: [A=1]}}\n",
            None,
        )?;

        let outcome = merge_stack(&stack, "stack.env")?;
        assert!(outcome.reserialized);

        let result: Value = serde_yaml::from_str(&read_to_string(stack.compose_path())?)?;
        let expect: Value = serde_yaml::from_str("services: {app: {image: app, env_file: [stack.env]}}")?;
        assert_eq!(result, expect);

        Ok(())
    }

    #[sealed_test]
    fn normalize_tabs_in_nested_compose_files() -> anyhow::Result<()> {
        create_dir_all("stacks/a")?;
        create_dir_all("stacks/b/nested")?;
        write("stacks/a/docker-compose.yml", "services:\n\tapp:\n\t\timage: app\n")?;
        write("stacks/b/nested/docker-compose.yml", "services:\n  app:\n    image: app\n")?;
        write("stacks/a/notes.txt", "\tleave me\n")?;

        assert_eq!(normalize_tabs("stacks", "docker-compose.yml"), 1);
        assert_eq!(
            read_to_string("stacks/a/docker-compose.yml")?,
            "services:\n  app:\n    image: app\n"
        );
        assert_eq!(read_to_string("stacks/a/notes.txt")?, "\tleave me\n");
        assert_eq!(normalize_tabs("stacks", "docker-compose.yml"), 0);

        Ok(())
    }
}
