//! Application secrets for the Spotify token endpoint.
//!
//! The refresh protocol authenticates with HTTP Basic credentials built from
//! a client id/secret pair. Both are read from a small TOML file that must be
//! kept out of version control:
//!
//! ```toml
//! client_id = "0123456789abcdef0123456789abcdef"
//! client_secret = "fedcba9876543210fedcba9876543210"
//! ```
//!
//! The secret is redacted from all debug output.

use std::{fs, path::Path};

use base64::prelude::*;
use serde::Deserialize;
use veil::Redact;

use crate::error::{Error, Result};

/// Client credentials for the provider's token endpoint.
///
/// Obtained by registering an application in the provider's developer
/// dashboard. The pair never travels anywhere except the `Authorization`
/// header of refresh requests.
#[derive(Clone, Eq, PartialEq, Deserialize, Redact)]
pub struct Secrets {
    /// Public application identifier.
    pub client_id: String,

    /// Confidential application secret.
    ///
    /// Redacted in debug output.
    #[redact]
    pub client_secret: String,
}

impl Secrets {
    /// Maximum allowed size of the secrets file in bytes.
    ///
    /// The file holds two short strings; anything larger is rejected before
    /// reading to prevent out-of-memory conditions on malformed input.
    const MAX_FILE_SIZE: u64 = 1024;

    /// Loads secrets from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * The file cannot be read
    /// * The file exceeds the size sanity cap
    /// * The contents are not valid TOML with both fields present
    pub fn from_file<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();

        let attributes = fs::metadata(path)?;
        let file_size = attributes.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::invalid_argument(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        let secrets: Self = toml::from_str(&contents)?;

        if secrets.client_id.is_empty() || secrets.client_secret.is_empty() {
            return Err(Error::invalid_argument(format!(
                "{} must set both client_id and client_secret",
                path.display()
            )));
        }

        Ok(secrets)
    }

    /// The pair encoded for HTTP Basic authentication.
    ///
    /// Format: `base64(client_id:client_secret)` without the `Basic ` prefix.
    #[must_use]
    pub fn basic_auth(&self) -> String {
        BASE64_STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_well_formed_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "client_id = \"id\"\nclient_secret = \"secret\"").expect("write");

        let secrets = Secrets::from_file(file.path()).expect("load");
        assert_eq!(secrets.client_id, "id");
        assert_eq!(secrets.client_secret, "secret");
        assert_eq!(secrets.basic_auth(), BASE64_STANDARD.encode("id:secret"));
    }

    #[test]
    fn rejects_oversized_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        let padding = "x".repeat(2048);
        writeln!(file, "client_id = \"id\"\nclient_secret = \"{padding}\"").expect("write");

        assert!(Secrets::from_file(file.path()).is_err());
    }

    #[test]
    fn rejects_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "client_id = \"id\"").expect("write");

        assert!(Secrets::from_file(file.path()).is_err());
    }

    #[test]
    fn debug_output_hides_secret() {
        let secrets = Secrets {
            client_id: "id".to_owned(),
            client_secret: "super-secret".to_owned(),
        };

        let debug = format!("{secrets:?}");
        assert!(!debug.contains("super-secret"));
    }
}
