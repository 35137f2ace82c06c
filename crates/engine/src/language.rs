//! Cell language tags and routing.
//!
//! Routing looks only at the declared tag, never at the cell text: a
//! passthrough cell full of fenced code is still echoed, not executed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned for a language tag outside the closed set.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported cell language: {0:?} (expected executable/python or passthrough/markdown)")]
pub struct LanguageError(pub String);

/// Declared language of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// Code for the interpreter backend.
    #[serde(alias = "python")]
    Executable,
    /// Narrative text echoed back unchanged.
    #[serde(alias = "markdown")]
    Passthrough,
}

/// Where a cell goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Submit to the session.
    Interpreter,
    /// Return the input as output.
    Echo,
}

impl Language {
    /// Returns the route for this language.
    pub fn route(self) -> Route {
        match self {
            Language::Executable => Route::Interpreter,
            Language::Passthrough => Route::Echo,
        }
    }

    /// Guess the language from a file extension (`md`/`markdown` are
    /// passthrough, everything else executable).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Language::Passthrough,
            _ => Language::Executable,
        }
    }

    /// Canonical tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Executable => "executable",
            Language::Passthrough => "passthrough",
        }
    }
}

impl FromStr for Language {
    type Err = LanguageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "executable" | "python" => Ok(Language::Executable),
            "passthrough" | "markdown" => Ok(Language::Passthrough),
            _ => Err(LanguageError(s.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
