// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Errors raised while decoding shared types
#[derive(Debug, Error)]
pub enum TypesError {
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to encode TOML: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
