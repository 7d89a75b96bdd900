//! Model-client ports: the `ModelClient` trait and its object-safe boxed
//! wrapper. Implementations (HTTP providers, mocks) live outside the core
//! and are constructor-injected.

pub mod box_client;
pub mod client;

pub use box_client::BoxModelClient;
pub use client::ModelClient;
