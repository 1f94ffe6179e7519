//! Streaming client for the Anthropic Messages API

mod error;
mod messages;

pub use error::CompletionError;
pub use messages::{
    AnthropicClient, CompletionEndpoint, CompletionRequest, FragmentStream, MAX_OUTPUT_TOKENS,
};
