// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Compose patcher.
//!
//! Documents which variables of a stack are secrets supplied at deploy time.
//! For every service that pulls in the shared env file, each redacted
//! variable gets an interpolation placeholder in the service's `environment`
//! block:
//!
//! ```yaml
//! services:
//!   app:
//!     env_file:
//!       - stack.env
//!     environment:
//!       DB_PASSWORD: ${DB_PASSWORD}
//! ```
//!
//! The secret value itself is never written anywhere.
//!
//! # Invariants
//!
//! - Services that do not reference the env file are never touched.
//! - Variables already present in a service's environment are never
//!   overwritten, whatever their value.
//! - Files are only written when at least one placeholder was added.

use crate::{
    compose::{
        layout::{render_scalar, render_text, Edit, KeyLayout, Layout, ServiceLayout},
        ComposeDocument, ComposeError, EnvFileRef, Environment,
    },
    sentinel::placeholder,
};

use serde_yaml::{Mapping, Value};
use std::{fs::write, path::Path};
use tracing::{debug, info, instrument, warn};

/// Result of patching a single compose file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    /// Added placeholders as pairs of service name and variable name.
    pub added: Vec<(String, String)>,

    /// Compose file was written.
    pub written: bool,

    /// Compose file formatting had to be given up.
    pub reserialized: bool,
}

/// Placeholders to add to one service.
#[derive(Debug, Clone)]
struct ServicePatch {
    name: String,
    shape: Option<Environment>,
    environment: Mapping,
    missing: Vec<String>,
}

/// Inject placeholders for redacted variables into compose file.
///
/// # Errors
///
/// - Return [`PatchError::Compose`] if compose file cannot be read, parsed, or
///   written.
#[instrument(skip(path, redacted), level = "debug")]
pub fn patch_compose(
    path: impl AsRef<Path>,
    env_file: &str,
    redacted: &[String],
) -> Result<PatchOutcome> {
    let path = path.as_ref();
    info!("processing {:?}", path.display());

    let document = ComposeDocument::load(path)?;
    if document.is_empty() {
        warn!("empty or invalid YAML in {:?}", path.display());
        return Ok(PatchOutcome::default());
    }

    let patches = document
        .services()
        .filter_map(|(name, definition)| plan_service(name, definition, env_file, redacted))
        .collect::<Vec<_>>();

    let mut outcome = PatchOutcome::default();
    if patches.is_empty() {
        info!("no changes needed for {:?}", path.display());
        return Ok(outcome);
    }

    for patch in &patches {
        for var in &patch.missing {
            info!("added ${{{var}}} to service {}", patch.name);
            outcome.added.push((patch.name.clone(), var.clone()));
        }
    }

    let intended = intended_structure(document.root(), &patches);
    let edits = layout_edits(document.source(), &patches);
    let rendered = document.render(&intended, edits)?;
    if !rendered.is_preserved() {
        warn!(
            "could not preserve formatting of {:?}, comments are lost",
            path.display()
        );
        outcome.reserialized = true;
    }

    write(path, rendered.text()).map_err(|err| ComposeError::WriteComposeFile {
        source: err,
        compose_path: path.to_path_buf(),
    })?;
    outcome.written = true;
    info!("updated {:?}", path.display());

    Ok(outcome)
}

/// Decide which placeholders a service needs.
///
/// Returns [`None`] if the service must be left alone.
fn plan_service(
    name: &str,
    definition: &Mapping,
    env_file: &str,
    redacted: &[String],
) -> Option<ServicePatch> {
    let reference = EnvFileRef::from_value(definition.get("env_file")?)?;
    if !reference.references(env_file) {
        debug!("service {name} does not use {env_file}");
        return None;
    }

    let shape = match definition.get("environment") {
        Some(value) => match Environment::from_value(value) {
            Some(shape) => Some(shape),
            None => {
                warn!("service {name}: environment is neither a list nor a mapping, skipping");
                return None;
            }
        },
        None => None,
    };

    let environment = shape.as_ref().map_or_else(Mapping::new, |shape| {
        shape.to_mapping(|entry| warn!("service {name}: dropping environment entry {entry:?}"))
    });
    let missing = redacted
        .iter()
        .filter(|var| !environment.contains_key(var.as_str()))
        .cloned()
        .collect::<Vec<_>>();
    if missing.is_empty() {
        return None;
    }

    Some(ServicePatch {
        name: name.to_owned(),
        shape,
        environment,
        missing,
    })
}

/// Build structure of compose document after patching.
fn intended_structure(root: &Value, patches: &[ServicePatch]) -> Value {
    let mut root = root.clone();
    let Some(definitions) = root.get_mut("services").and_then(Value::as_mapping_mut) else {
        return root;
    };

    for patch in patches {
        let Some(definition) = definitions
            .get_mut(patch.name.as_str())
            .and_then(Value::as_mapping_mut)
        else {
            continue;
        };

        let mut environment = patch.environment.clone();
        for var in &patch.missing {
            environment.insert(var.as_str().into(), placeholder(var).into());
        }
        definition.insert("environment".into(), Value::Mapping(environment));
    }

    root
}

/// Compute line edits matching [`intended_structure`].
///
/// Returns [`None`] if the layout of any patched service cannot be located.
fn layout_edits(source: &str, patches: &[ServicePatch]) -> Option<Vec<Edit>> {
    let layout = Layout::new(source);
    let located = layout.services()?;

    let mut edits = Vec::new();
    for patch in patches {
        let service = located.iter().find(|service| service.name == patch.name)?;
        if !service.is_block() {
            return None;
        }

        let edit = match layout.key(service, "environment") {
            Some(current) => edit_environment(service, &current, patch)?,
            None => {
                let mut lines = vec![format!("{}environment:", " ".repeat(service.child_indent))];
                lines.extend(placeholder_lines(service.child_indent + service.step(), &patch.missing)?);
                Edit::insert(service.span.end, lines)
            }
        };
        edits.push(edit);
    }

    Some(edits)
}

/// Edit existing environment key of service.
///
/// Block mappings and bare keys are appended to. Every other shape is
/// rewritten as a block mapping.
fn edit_environment(service: &ServiceLayout, current: &KeyLayout, patch: &ServicePatch) -> Option<Edit> {
    let entry_indent = service.child_indent + service.step();
    match (&patch.shape, current.block_indent) {
        (Some(Environment::Map(_)), Some(indent)) if current.inline.is_empty() => {
            if indent <= service.child_indent {
                return None;
            }

            Some(Edit::insert(current.span.end, placeholder_lines(indent, &patch.missing)?))
        }
        (Some(Environment::Empty), None) if current.inline.is_empty() => Some(Edit::insert(
            current.span.end,
            placeholder_lines(entry_indent, &patch.missing)?,
        )),
        _ => {
            let mut lines = vec![format!("{}environment:", " ".repeat(service.child_indent))];
            for (key, value) in &patch.environment {
                let key = match key {
                    Value::String(key) => render_text(key)?,
                    key => render_scalar(key)?,
                };
                lines.push(format!("{}{key}: {}", " ".repeat(entry_indent), render_scalar(value)?));
            }
            lines.extend(placeholder_lines(entry_indent, &patch.missing)?);
            Some(Edit::replace(current.span, lines))
        }
    }
}

fn placeholder_lines(indent: usize, vars: &[String]) -> Option<Vec<String>> {
    vars.iter()
        .map(|var| {
            let key = render_text(var)?;
            let value = render_text(&placeholder(var))?;
            Some(format!("{}{key}: {value}", " ".repeat(indent)))
        })
        .collect()
}

/// Compose patcher error types.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// Compose file handling fails.
    #[error(transparent)]
    Compose(#[from] ComposeError),
}

/// Friendly result alias :3
pub type Result<T, E = PatchError> = std::result::Result<T, E>;
