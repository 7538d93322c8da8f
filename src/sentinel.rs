// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Textual conventions shared by both pipeline stages.
//!
//! Stackenv does not manage secrets itself. Instead, it recognizes two plain
//! text conventions:
//!
//! 1. The __redaction sentinel__. An env file value of `redacted`, optionally
//!    wrapped in one layer of matching single or double quotes, marks the
//!    variable as a secret whose real value is supplied elsewhere.
//! 2. The __interpolation placeholder__. A compose environment value of
//!    `${VAR}` tells the compose runtime to substitute `VAR` from the
//!    deployment environment.
//!
//! Both conventions live here so the merger and the patcher agree on them.

/// Literal value marking a variable as a secret placeholder.
pub const REDACTED_SENTINEL: &str = "redacted";

/// Default name of the shared env file of a stack.
pub const DEFAULT_ENV_FILE: &str = "stack.env";

/// Default name of the compose file of a stack.
pub const DEFAULT_COMPOSE_FILE: &str = "docker-compose.yml";

/// Check if env file value is the redaction sentinel.
///
/// Surrounding whitespace and a single layer of matching quotes are ignored.
/// Comparison is case-sensitive.
pub fn is_redacted_sentinel(value: impl AsRef<str>) -> bool {
    unquote(value.as_ref().trim()) == REDACTED_SENTINEL
}

/// Build interpolation placeholder for variable name.
pub fn placeholder(name: impl AsRef<str>) -> String {
    format!("${{{}}}", name.as_ref())
}

/// Check if value is the interpolation placeholder of the given variable.
pub fn is_interpolation_placeholder(name: impl AsRef<str>, value: impl AsRef<str>) -> bool {
    value.as_ref().trim() == placeholder(name)
}

/// Check if variable name only uses `[A-Za-z0-9_]`.
pub fn is_valid_name(name: impl AsRef<str>) -> bool {
    let name = name.as_ref();
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Strip one layer of matching quotes.
pub(crate) fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }

    value
}
