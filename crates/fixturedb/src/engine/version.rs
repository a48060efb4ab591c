use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Engine release reported by `--version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineVersion {
    /// Major release number.
    pub major: u32,
    /// Minor release number.
    pub minor: u32,
    /// Patch level, when reported.
    pub patch: Option<u32>,
    /// Version token exactly as printed (`8.0.36`, `10.11.6-MariaDB`).
    pub text: String,
    /// Platform token (`Linux`, `debian-linux-gnu`).
    pub platform: String,
}

/// Error returned when `--version` output has an unexpected shape.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unrecognised version output: {output}")]
pub struct VersionParseError {
    /// Raw output.
    pub output: String,
}

impl EngineVersion {
    /// Parses `--version` output such as
    /// `mysqld  Ver 8.0.36 for Linux on x86_64 (MySQL Community Server - GPL)`.
    ///
    /// The version is the token after `Ver`; the platform is the token after
    /// the following `for`.
    pub fn parse(output: &str) -> Result<Self, VersionParseError> {
        let error = || VersionParseError {
            output: output.trim().to_owned(),
        };
        let tokens: Vec<&str> = output.split_whitespace().collect();
        let ver_index = tokens
            .iter()
            .position(|token| token.eq_ignore_ascii_case("ver"))
            .ok_or_else(error)?;
        let text = *tokens.get(ver_index + 1).ok_or_else(error)?;
        let platform = tokens
            .iter()
            .skip(ver_index + 2)
            .position(|token| *token == "for")
            .and_then(|offset| tokens.get(ver_index + 2 + offset + 1))
            .ok_or_else(error)?;

        let numeric = text.split(['-', '_']).next().unwrap_or(text);
        let mut parts = numeric.split('.');
        let major = parts
            .next()
            .and_then(|part| part.parse().ok())
            .ok_or_else(error)?;
        let minor = parts
            .next()
            .and_then(|part| part.parse().ok())
            .ok_or_else(error)?;
        let patch = parts.next().and_then(|part| part.parse().ok());

        Ok(Self {
            major,
            minor,
            patch,
            text: text.to_owned(),
            platform: (*platform).to_owned(),
        })
    }
}

impl FromStr for EngineVersion {
    type Err = VersionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} ({})", self.text, self.platform)
    }
}
