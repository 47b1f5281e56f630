//! Image reference parsing.
//!
//! Supports formats:
//! - `alpine` -> docker.io/library/alpine:latest
//! - `alpine:3.19` -> docker.io/library/alpine:3.19
//! - `stackhpc/squid:3.5.20-1` -> docker.io/stackhpc/squid:3.5.20-1
//! - `ghcr.io/owner/repo:tag` -> ghcr.io/owner/repo:tag
//! - `localhost:5000/image` -> localhost:5000/image:latest
//! - `repo@sha256:...` -> digest reference

use std::fmt;

use thiserror::Error;

/// Registry assumed when an image reference names none.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag assumed when an image reference names none.
pub const DEFAULT_TAG: &str = "latest";

const MAX_TAG_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageRefError {
    #[error("empty image reference")]
    Empty,
    #[error("invalid image reference '{0}'")]
    Invalid(String),
    #[error("invalid tag '{0}'")]
    InvalidTag(String),
}

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Name as written, without tag or digest (e.g. "stackhpc/squid")
    pub name: String,
    /// Registry host (e.g. "docker.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g. "library/alpine")
    pub repository: String,
    /// Tag or digest (e.g. "latest" or "sha256:...")
    pub tag: String,
}

impl ImageReference {
    /// Parse an image reference string into components.
    pub fn parse(image: &str) -> Result<Self, ImageRefError> {
        let image = image.trim();
        if image.is_empty() {
            return Err(ImageRefError::Empty);
        }
        if image.chars().any(char::is_whitespace) {
            return Err(ImageRefError::Invalid(image.to_string()));
        }

        // A digest pins the content; any tag written before it is dropped.
        let (name, tag) = match image.split_once('@') {
            Some((named, digest)) => (split_tag(named).0, digest.to_string()),
            None => match split_tag(image) {
                (name, Some(tag)) => (name, tag.to_string()),
                (name, None) => (name, DEFAULT_TAG.to_string()),
            },
        };

        if name.is_empty() || tag.is_empty() || name.ends_with('/') || name.starts_with('/') {
            return Err(ImageRefError::Invalid(image.to_string()));
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository
        };

        Ok(Self {
            name: name.to_string(),
            registry,
            repository,
            tag,
        })
    }

    /// Whether the reference pins a content digest rather than a tag.
    pub fn is_digest(&self) -> bool {
        self.tag.contains(':')
    }

    /// The reference as written, with its tag replaced.
    pub fn with_tag(&self, tag: &str) -> Result<String, ImageRefError> {
        validate_tag(tag)?;
        Ok(format!("{}:{}", self.name, tag))
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = if self.is_digest() { '@' } else { ':' };
        write!(
            f,
            "{}/{}{}{}",
            self.registry, self.repository, separator, self.tag
        )
    }
}

/// Split `name[:tag]`. A colon before the last slash belongs to a registry port.
fn split_tag(image: &str) -> (&str, Option<&str>) {
    let last_slash = image.rfind('/');
    match image.rfind(':') {
        Some(colon) if last_slash.map_or(true, |slash| colon > slash) => {
            (&image[..colon], Some(&image[colon + 1..]))
        }
        _ => (image, None),
    }
}

/// Check a tag against the registry tag grammar: `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`.
pub fn validate_tag(tag: &str) -> Result<(), ImageRefError> {
    let mut chars = tag.chars();
    let valid_first = chars
        .next()
        .map_or(false, |c| c.is_ascii_alphanumeric() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if valid_first && valid_rest && tag.len() <= MAX_TAG_LEN {
        Ok(())
    } else {
        Err(ImageRefError::InvalidTag(tag.to_string()))
    }
}

/// Canonical `registry/repository:tag` form, or the trimmed input if it does not parse.
pub fn canonical_image(image: &str) -> String {
    ImageReference::parse(image)
        .map(|r| r.to_string())
        .unwrap_or_else(|_| image.trim().to_string())
}
