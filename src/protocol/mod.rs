//! Wire types and parsing for the provider's HTTP services.
//!
//! Two services are covered, one submodule each:
//!
//! * [`player`] - Web API playback state responses
//! * [`token`] - Accounts service token endpoint responses
//!
//! Both deserialize through [`json`], which layers uniform logging on
//! top of `serde_json` so every response can be traced or diagnosed
//! the same way regardless of which endpoint produced it.
//!
//! # Usage Example
//!
//! ```
//! use soundtrail::protocol::{self, token::Grant};
//!
//! # fn main() -> soundtrail::error::Result<()> {
//! let body = r#"{ "access_token": "a1", "expires_in": 3600 }"#;
//! let grant: Grant = protocol::json(body, "api/token")?;
//! # Ok(())
//! # }
//! ```

pub mod player;
pub mod token;

use crate::error::Result;
use serde::Deserialize;
use std::fmt::Debug;

/// Deserializes a response body into `T`, logging what came back.
///
/// `origin` names the endpoint in log lines. Successful parses are
/// dumped at TRACE. On failure the body is re-parsed as loose JSON so
/// its structure still shows up at TRACE; bodies that are not JSON at
/// all are reported at ERROR with the raw text behind them at TRACE.
///
/// # Errors
///
/// Returns `Err` when the body is not valid JSON or does not match
/// the shape of `T`.
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{}: {result:#?}", origin);
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                trace!("{}: {json:#?}", origin);
            } else {
                error!("{}: failed parsing response ({e:?})", origin);
                trace!("{body}");
            }
            Err(e.into())
        }
    }
}
