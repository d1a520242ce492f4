// Azure resource manager plumbing
pub mod auth;
pub mod client;
pub mod clientset;

pub use auth::{acquire_token, AccessToken, Authorizer};
pub use client::{ArmClient, ArmResponse, RetryPolicy};
pub use clientset::{ArmRequest, ClientSet, ClientSetFactory, Endpoints, RequestKind};
