// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Pipeline driving loops.
//!
//! Runs each stage over every stack in a [`StackStore`]. Stacks are processed
//! one after another, and independently of each other. Any failure is
//! contained to the stack it happened in: it gets logged, counted, and the
//! loop moves on to the next stack.

use crate::{
    env::scan_env_file,
    merge::{merge_stack, normalize_tabs},
    patch::patch_compose,
    store::{StackStore, StoreError},
};

use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
};
use tracing::{debug, error, info, instrument, warn};

/// Counts of a pipeline run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Stacks that qualified for processing.
    pub considered: usize,

    /// Stacks whose files were written.
    pub modified: usize,

    /// Stacks left out for missing files.
    pub skipped: usize,

    /// Stacks that failed.
    pub failed: usize,
}

impl Display for RunSummary {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "processed {} stacks, updated {}",
            self.considered, self.modified
        )?;

        if self.skipped > 0 {
            write!(fmt, ", skipped {}", self.skipped)?;
        }

        if self.failed > 0 {
            write!(fmt, ", failed {}", self.failed)?;
        }

        Ok(())
    }
}

/// Run env merger over every stack with a compose file.
///
/// Fixes tabs in all compose files of the store first.
///
/// # Errors
///
/// - Return [`StoreError::ReadStore`] if stack store cannot be listed.
#[instrument(skip(store), level = "debug")]
pub fn merge_store(store: &StackStore) -> Result<RunSummary, StoreError> {
    let layout = store.layout();
    normalize_tabs(store.root(), &layout.compose_file);

    let mut summary = RunSummary::default();
    for stack in store.stacks()? {
        if !stack.has_compose_file() {
            debug!("{}: no {}, skipping", stack.name(), layout.compose_file);
            summary.skipped += 1;
            continue;
        }

        summary.considered += 1;
        match merge_stack(&stack, &layout.env_file) {
            Ok(outcome) if outcome.is_modified() => summary.modified += 1,
            Ok(_) => {}
            Err(err) => {
                error!("skipping {}: {}", stack.name(), error_chain(&err));
                summary.failed += 1;
            }
        }
    }

    info!("{summary}");
    Ok(summary)
}

/// Run redaction scanner and compose patcher over every stack with both
/// a compose file and an env file.
///
/// # Errors
///
/// - Return [`StoreError::ReadStore`] if stack store cannot be listed.
#[instrument(skip(store), level = "debug")]
pub fn annotate_store(store: &StackStore) -> Result<RunSummary, StoreError> {
    let layout = store.layout();

    let mut summary = RunSummary::default();
    for stack in store.stacks()? {
        if !stack.has_env_file() || !stack.has_compose_file() {
            warn!(
                "stack {} is missing {} or {}, skipping",
                stack.name(),
                layout.env_file,
                layout.compose_file
            );
            summary.skipped += 1;
            continue;
        }

        summary.considered += 1;
        let redacted = scan_env_file(stack.env_path());
        if redacted.is_empty() {
            info!("no redacted variables found in {}", stack.name());
            continue;
        }

        info!(
            "found {} redacted variables in {}: {}",
            redacted.len(),
            stack.name(),
            redacted.join(", ")
        );

        match patch_compose(stack.compose_path(), &layout.env_file, &redacted) {
            Ok(outcome) if outcome.written => summary.modified += 1,
            Ok(_) => {}
            Err(err) => {
                error!("error updating {}: {}", stack.name(), error_chain(&err));
                summary.failed += 1;
            }
        }
    }

    info!("{summary}");
    Ok(summary)
}

/// List redacted variables of one stack.
///
/// # Errors
///
/// - Return [`StoreError::MissingStack`] if stack does not exist.
pub fn redacted_in_stack(store: &StackStore, name: impl AsRef<str>) -> Result<Vec<String>, StoreError> {
    let stack = store.stack(name)?;
    Ok(scan_env_file(stack.env_path()))
}

/// Render error with all of its sources.
fn error_chain(err: &dyn Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn summary_line() {
        let summary = RunSummary {
            considered: 4,
            modified: 2,
            ..Default::default()
        };
        assert_eq!(summary.to_string(), "processed 4 stacks, updated 2");

        let summary = RunSummary {
            considered: 4,
            modified: 2,
            skipped: 1,
            failed: 1,
        };
        assert_eq!(
            summary.to_string(),
            "processed 4 stacks, updated 2, skipped 1, failed 1"
        );
    }

    #[test]
    fn render_error_chain() {
        let err = crate::compose::ComposeDocument::parse("services: [oops\n").unwrap_err();
        let result = error_chain(&err);
        assert!(result.starts_with("invalid YAML: "));
    }
}
