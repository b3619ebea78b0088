// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Process-level plumbing shared by the rfa binaries: configuration file
//! discovery and logging setup.

pub mod config;
pub mod logging;

pub use config::{config_search_paths, ConfigError, ConfigFile, CONFIG_FILE_NAME};
pub use logging::{init_logging, parse_level};
