//! User-visible texts streamed in place of protocol-level errors.
//!
//! The transport is a long-lived event stream the client is already
//! consuming, so failures surface as in-band text and the stream still
//! terminates with the closing marker.

pub const NO_EMPTY_PROMPT: &str = "Your prompt is empty. Please enter a message and try again.";

pub const EXCEED_LIMIT: &str =
    "This API key has used up its quota for the current period. Please wait for the quota to reset or upgrade the key.";

pub const NO_AVAILABLE_ACCOUNTS: &str =
    "The service is temporarily unavailable: no account is able to take this request right now. Please retry in a moment.";

pub const STREAM_FAILED_PREFIX: &str = "The upstream request failed: ";

/// Terminal marker appended by the outer event-stream framing.
pub const CLOSING_MARKER: &str = "closed";
