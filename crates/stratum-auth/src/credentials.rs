//! HTTP Basic authentication against a static credential list.

use std::collections::HashMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::error::{AuthError, Result};

/// A principal and its secret.
#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    /// The principal name.
    pub principal: String,
    /// The shared secret.
    pub secret: String,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    credentials: Vec<Credential>,
}

/// The set of principals allowed to authenticate.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    secrets: HashMap<String, String>,
}

impl Credentials {
    /// Build from a list of credentials. Later entries win on duplicate principals.
    #[must_use]
    pub fn new(credentials: impl IntoIterator<Item = Credential>) -> Self {
        Self {
            secrets: credentials
                .into_iter()
                .map(|c| (c.principal, c.secret))
                .collect(),
        }
    }

    /// Parse `{"credentials":[{"principal":…,"secret":…}]}`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Load` if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: CredentialsFile = serde_json::from_str(json).map_err(|e| AuthError::Load {
            what: "credentials",
            reason: e.to_string(),
        })?;
        Ok(Self::new(file.credentials))
    }

    /// Load credentials from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Load` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| AuthError::Load {
            what: "credentials",
            reason: format!("{}: {e}", path.display()),
        })?;
        let credentials = Self::from_json(&json)?;
        tracing::info!(
            path = %path.display(),
            principals = credentials.len(),
            "Loaded credentials"
        );
        Ok(credentials)
    }

    /// Number of known principals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// Whether no principals are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Authenticate an `Authorization: Basic …` header value.
    ///
    /// Returns the authenticated principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is missing, malformed, or names
    /// unknown credentials.
    pub fn authenticate(&self, header: Option<&str>) -> Result<String> {
        let header = header.ok_or(AuthError::MissingCredentials)?;

        let encoded = header
            .strip_prefix("Basic ")
            .ok_or_else(|| AuthError::MalformedCredentials("expected 'Basic' scheme".into()))?;

        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| AuthError::MalformedCredentials(e.to_string()))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| AuthError::MalformedCredentials("credentials are not UTF-8".into()))?;

        let (principal, secret) = decoded.split_once(':').ok_or_else(|| {
            AuthError::MalformedCredentials("expected 'principal:secret'".into())
        })?;

        match self.secrets.get(principal) {
            Some(expected) if expected == secret => Ok(principal.to_string()),
            _ => {
                tracing::warn!(principal, "Rejected credentials");
                Err(AuthError::InvalidCredentials(principal.to_string()))
            }
        }
    }
}

/// Authenticate against optional credentials.
///
/// With no credentials configured every request is anonymous and `Ok(None)`
/// is returned regardless of the header.
///
/// # Errors
///
/// Returns an error if credentials are configured and the header does not
/// authenticate against them.
pub fn authenticate(credentials: Option<&Credentials>, header: Option<&str>) -> Result<Option<String>> {
    credentials
        .map(|credentials| credentials.authenticate(header))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn basic(principal: &str, secret: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{principal}:{secret}")))
    }

    fn credentials() -> Credentials {
        Credentials::from_json(
            r#"{"credentials":[{"principal":"ops","secret":"s3cret"},{"principal":"web","secret":"pw"}]}"#,
        )
        .unwrap()
    }

    #[test]
    fn accepts_known_principal() {
        let creds = credentials();
        assert_eq!(creds.len(), 2);
        let principal = creds.authenticate(Some(&basic("ops", "s3cret"))).unwrap();
        assert_eq!(principal, "ops");
    }

    #[test]
    fn rejects_wrong_secret() {
        let err = credentials()
            .authenticate(Some(&basic("ops", "nope")))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials(_)));
        assert_eq!(err.http_status_code(), 401);
    }

    #[test]
    fn rejects_missing_and_malformed() {
        let creds = credentials();
        assert!(matches!(
            creds.authenticate(None),
            Err(AuthError::MissingCredentials)
        ));
        assert!(matches!(
            creds.authenticate(Some("Bearer abc")),
            Err(AuthError::MalformedCredentials(_))
        ));
        assert!(matches!(
            creds.authenticate(Some("Basic !!!")),
            Err(AuthError::MalformedCredentials(_))
        ));

        let no_colon = format!("Basic {}", STANDARD.encode("ops"));
        assert!(matches!(
            creds.authenticate(Some(&no_colon)),
            Err(AuthError::MalformedCredentials(_))
        ));
    }

    #[test]
    fn anonymous_without_credentials() {
        assert_eq!(authenticate(None, None).unwrap(), None);
        assert_eq!(authenticate(None, Some("garbage")).unwrap(), None);

        let creds = credentials();
        assert_eq!(
            authenticate(Some(&creds), Some(&basic("web", "pw"))).unwrap(),
            Some("web".to_string())
        );
        assert!(authenticate(Some(&creds), None).is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"credentials":[{{"principal":"p","secret":"s"}}]}}"#).unwrap();

        let creds = Credentials::load(file.path()).unwrap();
        assert_eq!(creds.authenticate(Some(&basic("p", "s"))).unwrap(), "p");
    }

    #[test]
    fn load_missing_file_fails() {
        let err = Credentials::load("/nonexistent/credentials.json").unwrap_err();
        assert_eq!(err.http_status_code(), 500);
    }
}
