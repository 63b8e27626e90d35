//! Change detection
//!
//! Maps the files touched by a revision range to logical service identifiers:
//! - `apps/<category>/<name>/...` → `category/name`
//! - `community/<file>.yaml` → `community/<file>`

mod detect;
mod git;

pub use detect::detect_services;
pub use git::changed_paths;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Category assigned to flat community references
pub const COMMUNITY_CATEGORY: &str = "community";

#[derive(Debug, Error)]
pub enum ChangeError {
    #[error("git error: {0}")]
    Git(String),

    #[error("invalid service identifier: {0}")]
    InvalidServiceId(String),
}

/// Logical service identifier, displayed as `category/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceId {
    pub category: String,
    pub name: String,
}

impl ServiceId {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }

    /// Parse a `category/name` identifier
    pub fn parse(raw: &str) -> Result<Self, ChangeError> {
        let trimmed = raw.trim().trim_matches('/');
        match trimmed.split_once('/') {
            Some((category, name))
                if !category.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(category, name))
            }
            _ => Err(ChangeError::InvalidServiceId(raw.to_string())),
        }
    }

    /// `category-name`, usable in label values and hostnames
    pub fn slug(&self) -> String {
        format!("{}-{}", self.category, self.name)
    }

    pub fn is_community(&self) -> bool {
        self.category == COMMUNITY_CATEGORY
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.name)
    }
}

// Sorted by the displayed identifier, not field by field
impl Ord for ServiceId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl PartialOrd for ServiceId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TryFrom<String> for ServiceId {
    type Error = ChangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ServiceId> for String {
    fn from(id: ServiceId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
#[path = "detect_test.rs"]
mod tests;
