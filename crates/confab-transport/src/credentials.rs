//! Credential resolution.
//!
//! Resolution order, stopping at the first hit:
//!
//! 1. Explicit API key from configuration.
//! 2. Environment variables, in configured order.
//! 3. Ambient platform credentials (delegated to the platform auth layer;
//!    this module only *selects* them).
//!
//! Key material is never logged and never appears in `Debug` output.

use std::fmt;

/// Default ordered list of environment variables consulted for an API key.
pub const DEFAULT_ENV_KEYS: [&str; 3] = [
    "GOOGLE_API_KEY",
    "GEMINI_API_KEY",
    "GENERATIVE_LANGUAGE_API_KEY",
];

/// The resolved authentication mode.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// A concrete API key, sent per-request.
    ApiKey(String),
    /// Ambient platform credentials; the transport layer delegates the
    /// actual exchange to the platform auth stack.
    Ambient,
}

impl Credentials {
    /// The API key, when one was resolved.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        match self {
            Self::ApiKey(key) => Some(key),
            Self::Ambient => None,
        }
    }
}

// Redacted by hand so key material cannot leak through logging.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("Credentials::ApiKey(<redacted>)"),
            Self::Ambient => f.write_str("Credentials::Ambient"),
        }
    }
}

/// Resolves credentials once, at session construction.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    explicit: Option<String>,
    env_keys: Vec<String>,
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new(None)
    }
}

impl CredentialResolver {
    /// A resolver with the default environment variable order.
    #[must_use]
    pub fn new(explicit_api_key: Option<String>) -> Self {
        Self {
            explicit: explicit_api_key.filter(|k| !k.trim().is_empty()),
            env_keys: DEFAULT_ENV_KEYS.iter().map(ToString::to_string).collect(),
        }
    }

    /// Override the ordered environment variable list.
    #[must_use]
    pub fn with_env_keys(mut self, keys: impl IntoIterator<Item = String>) -> Self {
        self.env_keys = keys.into_iter().collect();
        self
    }

    /// Resolve against the process environment.
    #[must_use]
    pub fn resolve(&self) -> Credentials {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolve against an arbitrary lookup (test seam).
    #[must_use]
    pub fn resolve_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Credentials {
        if let Some(key) = &self.explicit {
            tracing::debug!("Using explicit API key from configuration");
            return Credentials::ApiKey(key.clone());
        }
        for name in &self.env_keys {
            if let Some(key) = lookup(name).filter(|k| !k.trim().is_empty()) {
                tracing::debug!(source = %name, "Using API key from environment");
                return Credentials::ApiKey(key);
            }
        }
        tracing::debug!("No API key found — falling back to ambient credentials");
        Credentials::Ambient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_key_wins() {
        let resolver = CredentialResolver::new(Some("explicit".into()));
        let creds = resolver.resolve_with(|_| Some("env".into()));
        assert_eq!(creds.api_key(), Some("explicit"));
    }

    #[test]
    fn env_keys_are_consulted_in_order() {
        let resolver = CredentialResolver::new(None);
        let creds = resolver.resolve_with(|name| match name {
            "GEMINI_API_KEY" => Some("second".into()),
            "GENERATIVE_LANGUAGE_API_KEY" => Some("third".into()),
            _ => None,
        });
        assert_eq!(creds.api_key(), Some("second"));
    }

    #[test]
    fn blank_keys_are_skipped() {
        let resolver = CredentialResolver::new(Some("   ".into()));
        let creds = resolver.resolve_with(|name| {
            (name == "GENERATIVE_LANGUAGE_API_KEY").then(|| "real".into())
        });
        assert_eq!(creds.api_key(), Some("real"));
    }

    #[test]
    fn falls_back_to_ambient() {
        let resolver = CredentialResolver::new(None);
        assert_eq!(resolver.resolve_with(|_| None), Credentials::Ambient);
    }

    #[test]
    fn debug_output_redacts_key() {
        let debug = format!("{:?}", Credentials::ApiKey("super-secret".into()));
        assert!(!debug.contains("super-secret"));
    }
}
