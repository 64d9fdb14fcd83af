//! Error context and chaining utilities
//!
//! Lets the manager say *which* target and step failed without losing the
//! typed error underneath.

use super::Error;
use std::fmt;

/// Trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to the error
    fn context<C>(self, context: C) -> Result<T, Error>
    where
        C: Into<String>;

    /// Add context with lazy evaluation
    fn with_context<C, F>(self, f: F) -> Result<T, Error>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> ErrorContext<T> for Result<T, Error> {
    fn context<C>(self, context: C) -> Result<T, Error>
    where
        C: Into<String>,
    {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T, Error>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

/// Helper for walking an error chain
pub struct ErrorChain<'a> {
    error: &'a Error,
    chain: Vec<String>,
}

impl<'a> ErrorChain<'a> {
    pub fn new(error: &'a Error) -> Self {
        let mut chain = Vec::new();
        Self::build_chain(error, &mut chain);
        Self { error, chain }
    }

    fn build_chain(error: &Error, chain: &mut Vec<String>) {
        chain.push(error.to_string());

        if let Error::WithContext { source, .. } = error {
            Self::build_chain(source, chain);
        }
    }

    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    /// Get the root cause of the error
    pub fn root_cause(&self) -> &Error {
        let mut current = self.error;
        while let Error::WithContext { source, .. } = current {
            current = source;
        }
        current
    }

    /// Single-line form for log records
    pub fn format_for_log(&self) -> String {
        self.chain.join(" -> ")
    }

    pub fn format_for_display(&self) -> String {
        if self.chain.len() == 1 {
            self.chain[0].clone()
        } else {
            format!(
                "{}\n\nCaused by:\n{}",
                self.chain[0],
                self.chain[1..]
                    .iter()
                    .enumerate()
                    .map(|(i, msg)| format!("  {}. {}", i + 1, msg))
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        }
    }
}

impl<'a> fmt::Display for ErrorChain<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_for_display())
    }
}
