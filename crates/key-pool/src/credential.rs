//! Static credential definitions

use common::Secret;

/// One API key plus its display metadata.
///
/// Immutable for the process lifetime. `Debug` redacts the secret.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Stable identifier, the key of the status store
    pub id: String,
    /// Display/project name shown to operators
    pub name: String,
    pub secret: Secret<String>,
}

impl Credential {
    pub fn new(id: impl Into<String>, name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            secret: Secret::new(secret.into()),
        }
    }

    /// Whether `needle` names this credential by id or display name.
    pub fn matches(&self, needle: &str) -> bool {
        self.id == needle || self.name == needle
    }
}
