pub mod metadata;
pub mod provider;
pub mod symphonia_provider;
