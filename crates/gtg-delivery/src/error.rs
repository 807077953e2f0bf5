// error.rs — Error types for delivery transports.
//
// These cover calls whose caller needs a hard error (connection checks,
// update polling). Message delivery itself never returns an error: it
// returns a classified DeliveryResult instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The HTTP request could not be completed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with `ok: false`.
    #[error("api error ({code:?}): {description}")]
    Api {
        code: Option<u16>,
        description: String,
    },

    /// The API answered with something we could not interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
