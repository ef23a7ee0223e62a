//! Runtime configuration for the synchronization engine.
//!
//! Bundles application identity, provider endpoints, the credential storage
//! location and the client secrets. Constructed once at startup with
//! [`Config::with_secrets`] and shared by reference afterwards.

use std::path::PathBuf;

use url::Url;
use uuid::Uuid;

use crate::secrets::Secrets;

/// Configuration for the engine and its HTTP clients.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Application name, used in the user agent and the data directory.
    pub app_name: String,
    /// Application version, used in the user agent.
    pub app_version: String,
    /// Preferred language as a two-letter code, served in `Accept-Language`.
    pub app_lang: String,

    /// Name of this host as shown in log output.
    pub device_name: String,
    /// Stable identifier for this installation.
    ///
    /// Derived from the machine id so it survives restarts; falls back to a
    /// random id when the machine id is unavailable.
    pub device_id: Uuid,

    /// `User-Agent` string for all outbound requests.
    pub user_agent: String,

    /// Base URL of the provider's Web API.
    ///
    /// Ends in a slash so relative endpoint paths join below it.
    pub api_url: Url,
    /// Base URL of the provider's accounts service, hosting the token
    /// endpoint.
    pub auth_url: Url,

    /// Directory holding the encrypted credential store.
    pub data_dir: PathBuf,

    /// Client credentials for the token endpoint.
    pub secrets: Secrets,
}

impl Config {
    /// Default Web API base.
    const API_URL: &'static str = "https://api.spotify.com/v1/";

    /// Default accounts service base.
    const AUTH_URL: &'static str = "https://accounts.spotify.com/";

    /// Creates a configuration with the given client secrets and defaults
    /// for everything else.
    ///
    /// # Panics
    ///
    /// Panics when the application name, version or language contain
    /// characters that are illegal in a `User-Agent` string, or when the
    /// compiled-in endpoint URLs do not parse. Both indicate build-time
    /// mistakes, not runtime conditions.
    #[must_use]
    pub fn with_secrets(secrets: Secrets) -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();
        let app_lang = "en".to_owned();

        let device_id = match machine_uid::get() {
            Ok(machine_id) => {
                let namespace = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"spotify.com");
                Uuid::new_v5(&namespace, machine_id.as_bytes())
            }
            Err(e) => {
                warn!("machine id unavailable ({e}); falling back to a random device id");
                Uuid::new_v4()
            }
        };
        trace!("device id: {device_id}");

        // `HeaderValue` validation alone does not keep the product tokens legal.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
            || app_lang.chars().count() != 2
            || app_lang.contains(illegal_chars)
        {
            panic!(
                "bad application name, version or language (\"{app_name}\"; \"{app_version}\"; \"{app_lang}\")"
            );
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));
        if os_name.is_empty()
            || os_name.contains(illegal_chars)
            || os_version.is_empty()
            || os_version.contains(illegal_chars)
        {
            panic!("bad os name or version (\"{os_name}\"; \"{os_version}\")");
        }

        let user_agent =
            format!("{app_name}/{app_version} (Rust; {os_name}/{os_version}; {app_lang})");
        trace!("presenting as: {user_agent}");

        let api_url = Url::parse(Self::API_URL)
            .unwrap_or_else(|e| panic!("api url invalid: {e}"));
        let auth_url = Url::parse(Self::AUTH_URL)
            .unwrap_or_else(|e| panic!("auth url invalid: {e}"));

        let data_dir = dirs::data_dir().map_or_else(
            || {
                warn!("could not find the platform data directory, using the working directory");
                PathBuf::from(".")
            },
            |dir| dir.join(&app_name),
        );

        Self {
            app_name,
            app_version,
            app_lang,

            device_name: env!("CARGO_PKG_NAME").to_owned(),
            device_id,

            user_agent,

            api_url,
            auth_url,

            data_dir,

            secrets,
        }
    }
}
