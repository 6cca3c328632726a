// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Domain types for the terminal activity tracker
//!
//! These types describe what gets recorded: shell sessions, the commands run
//! inside them and the output chunks captured for each command. They are
//! shared by the storage layer, the capture pipeline and the CLI.

pub mod command;
pub mod session;
pub mod time;

pub use command::*;
pub use session::*;
pub use time::*;
