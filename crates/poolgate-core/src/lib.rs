mod balancer;
mod context;
mod error;
mod orchestrator;
mod stream;
mod sweep;

pub use balancer::{BalanceError, select};
pub use context::{render_transcript, token_length, trim_to_token_budget};
pub use error::GatewayError;
pub use orchestrator::{ChatGateway, ChatRequest, ChatStream};
pub use stream::{
    CompletionHooks, DeltaDecoder, INBAND_ERROR_MARKER, NoopHooks, RetryPolicy, StreamRequest,
    stream_with_retry,
};
pub use sweep::UsageSweep;
