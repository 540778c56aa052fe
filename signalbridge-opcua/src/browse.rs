//! Browse paths to data points.
//!
//! A configured path is a list of segments such as
//! `["0:Objects", "{idx}:PLC", "{idx}:read_conveyor_sensor_check"]`.
//! Each segment is `<namespace>:<name>`, where the namespace is a number or the
//! `{idx}` placeholder for the index the server assigns to the configured
//! namespace URI. A segment without a prefix is in namespace 0.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Placeholder for the namespace index resolved at connect time.
pub const NAMESPACE_PLACEHOLDER: &str = "{idx}";

/// Errors parsing a browse path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrowsePathError {
    #[error("Browse path is empty")]
    Empty,

    #[error("Segment '{0}' has an empty name")]
    EmptyName(String),

    #[error("Segment '{0}' has an invalid namespace prefix")]
    BadNamespace(String),
}

/// A browse name qualified by a concrete namespace index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub namespace: u16,
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: u16, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Namespace {
    Fixed(u16),
    Resolved,
}

/// One segment of a browse path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    namespace: Namespace,
    name: String,
}

impl PathSegment {
    /// Qualify the segment with the session's namespace index.
    pub fn qualify(&self, index: u16) -> QualifiedName {
        let namespace = match self.namespace {
            Namespace::Fixed(ns) => ns,
            Namespace::Resolved => index,
        };
        QualifiedName::new(namespace, self.name.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FromStr for PathSegment {
    type Err = BrowsePathError;

    fn from_str(segment: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = match segment.split_once(':') {
            None => (Namespace::Fixed(0), segment),
            Some((NAMESPACE_PLACEHOLDER, name)) => (Namespace::Resolved, name),
            Some((prefix, name)) => {
                let ns = prefix
                    .parse()
                    .map_err(|_| BrowsePathError::BadNamespace(segment.to_string()))?;
                (Namespace::Fixed(ns), name)
            }
        };

        if name.is_empty() {
            return Err(BrowsePathError::EmptyName(segment.to_string()));
        }

        Ok(Self {
            namespace,
            name: name.to_string(),
        })
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace {
            Namespace::Fixed(ns) => write!(f, "{}:{}", ns, self.name),
            Namespace::Resolved => write!(f, "{}:{}", NAMESPACE_PLACEHOLDER, self.name),
        }
    }
}

/// Ordered segments from the root folder to a data point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowsePath {
    segments: Vec<PathSegment>,
}

impl BrowsePath {
    /// Parse configured segments.
    pub fn parse<S: AsRef<str>>(segments: &[S]) -> Result<Self, BrowsePathError> {
        if segments.is_empty() {
            return Err(BrowsePathError::Empty);
        }

        let segments = segments
            .iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<Vec<PathSegment>, _>>()?;

        Ok(Self { segments })
    }

    /// `Objects/<folder>/<node>` in the resolved namespace.
    pub fn object(folder: &str, node: &str) -> Result<Self, BrowsePathError> {
        Self::parse(&[
            "0:Objects".to_string(),
            format!("{}:{}", NAMESPACE_PLACEHOLDER, folder),
            format!("{}:{}", NAMESPACE_PLACEHOLDER, node),
        ])
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Qualify every segment with the session's namespace index.
    pub fn qualify(&self, index: u16) -> Vec<QualifiedName> {
        self.segments.iter().map(|s| s.qualify(index)).collect()
    }
}

impl fmt::Display for BrowsePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}
