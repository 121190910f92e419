//! Generation-provider contract for the aide assistant.
//!
//! Defines the message model shared by the stores and the agent core, the
//! incremental stream events a provider yields, usage and pricing, and an
//! OpenAI-compatible streaming adapter.

pub mod errors;
pub mod openai_compat;
pub mod pricing;
pub mod provider;
pub mod stream;
pub mod testing;
pub mod types;
pub mod utils;

pub use errors::{ProviderError, ProviderErrorKind};
pub use openai_compat::{OpenAiCompatibleConfig, OpenAiCompatibleProvider};
pub use pricing::{ModelPricing, PriceTable};
pub use provider::GenerationProvider;
pub use stream::{StreamEvent, StreamEventStream};
pub use types::*;
