//! Embedded translation proxy.
//!
//! Listens on a loopback port, authenticates each request by its opaque
//! route token, and re-emits the canonical Anthropic-shaped request in
//! the upstream provider's native dialect — streaming the answer back as
//! Anthropic SSE (or JSON). The LLM-CLI subprocess is pointed here via
//! `ANTHROPIC_BASE_URL`, so every call it makes flows through this crate.

pub mod auth;
pub mod context;
pub mod error;
pub mod executors;
pub mod instructions;
pub mod metadata;
pub mod registry;
pub mod server;
pub mod sse;
pub mod translators;

pub use registry::RouteRegistry;
pub use server::{start_proxy, ProxyState};
