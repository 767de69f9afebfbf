pub mod chain;
pub mod gateway;
pub mod provider;
pub mod providers;

pub use chain::{ProviderChain, ProviderDescriptor, ProviderKind};
pub use gateway::{
    AttemptFailure, GatewayAnswer, GatewayError, LlmGateway, ModelUsageSnapshot, Prompt, ProviderRoute,
    RetryPolicy,
};
pub use provider::{Completion, FailureKind, GenerationParams, LlmError, LlmProvider, Message, Role};
