//! Action reference parsing (`[org/]name[@version]`).

use std::fmt;
use std::str::FromStr;

use crate::error::ReferenceError;

/// Publisher assumed when a reference omits the organization.
pub const DEFAULT_ORGANIZATION: &str = "prepare-assignment";

/// Version sentinel for "whatever the default branch points at".
///
/// Never resolved to a concrete version: it is a cache key of its own.
pub const LATEST: &str = "latest";

/// Structured identifier of a versioned action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionReference {
    pub organization: String,
    pub name: String,
    pub version: String,
}

impl ActionReference {
    pub fn new(
        organization: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            organization: organization.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parse `[org/]name[@version]`, filling in defaults for omitted parts.
    pub fn parse(raw: &str) -> Result<Self, ReferenceError> {
        if raw.matches('/').count() > 1 {
            return Err(ReferenceError::TooManySlashes(raw.to_string()));
        }
        let (organization, rest) = raw.split_once('/').unwrap_or((DEFAULT_ORGANIZATION, raw));

        if rest.matches('@').count() > 1 {
            return Err(ReferenceError::TooManyAts(raw.to_string()));
        }
        let (name, version) = match rest.split_once('@') {
            Some((name, version)) => (name, Some(version)),
            None => (rest, None),
        };

        if organization.is_empty() {
            return Err(ReferenceError::EmptySegment(raw.to_string(), "organization"));
        }
        if name.is_empty() {
            return Err(ReferenceError::EmptySegment(raw.to_string(), "name"));
        }
        let version = match version {
            Some("") => return Err(ReferenceError::EmptySegment(raw.to_string(), "version")),
            Some(version) => version,
            None => LATEST,
        };

        Ok(Self::new(organization, name, version))
    }

    pub fn is_latest(&self) -> bool {
        self.version == LATEST
    }
}

impl FromStr for ActionReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Formats the shortest string that parses back to `self`.
impl fmt::Display for ActionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.organization != DEFAULT_ORGANIZATION {
            write!(f, "{}/", self.organization)?;
        }
        f.write_str(&self.name)?;
        if !self.is_latest() {
            write!(f, "@{}", self.version)?;
        }
        Ok(())
    }
}
