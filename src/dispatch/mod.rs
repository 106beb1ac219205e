//! Outbound request dispatch to text-generation backends.

pub mod budget;
pub mod gemini;
pub mod openai_compat;
pub mod provider;
pub mod relay;
pub mod selfhosted;
mod transport;

pub use provider::{
    DispatchError, DispatchOptions, Dispatcher, Provider, ProviderClient, SUPPORTED_PROVIDERS,
    api_key_env, default_endpoint, default_model, is_api_key_present,
};
