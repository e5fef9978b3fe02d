// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use crate::config::ClientConfig;
use crate::error::Result;

/// Print the effective configuration.
pub fn run(config: &ClientConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
