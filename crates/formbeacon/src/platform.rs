//! Host bindings for the traits the core modules are written against.

#[cfg(target_arch = "wasm32")]
pub mod browser;
