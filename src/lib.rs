// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Shared env file tooling for compose stacks.
//!
//! Stackenv maintains a store of compose stacks, where each stack is a
//! directory holding a compose file and an optional shared env file. It runs
//! in two stages:
//!
//! 1. __Merge__: inline `environment` entries of every service are folded into
//!    the shared env file of the stack, and each service is pointed at that
//!    file through `env_file`. Inline values take precedence over values
//!    already in the env file.
//! 2. __Annotate__: variables whose value in the env file is the redaction
//!    sentinel `redacted` are given an interpolation placeholder
//!    (`KEY: ${KEY}`) in every service that does not define them yet.
//!
//! Both stages keep the original formatting of compose files wherever the
//! change can be expressed as a targeted text edit, and only fall back to full
//! reserialization when it cannot.

pub mod compose;
pub mod config;
pub mod env;
pub mod merge;
pub mod patch;
pub mod path;
pub mod pipeline;
pub mod sentinel;
pub mod store;
