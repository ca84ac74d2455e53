pub mod jwt;
pub mod pipeline;

pub use pipeline::{AuthPipeline, AuthStores, CredentialHeaders};
