pub mod compat;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod logging;
pub mod providers;
pub mod server;
pub mod tools;
pub mod translate;
pub mod upstream;

pub use compat::{check_compatibility, CompatibilityResult};
pub use config::BridgeConfig;
pub use detect::detect_provider;
pub use engine::{translate, translate_response, translate_stream, TranslationOptions, TranslationResult};
pub use error::{BridgeError, Result};
pub use logging::SharedLogger;
pub use providers::Provider;
pub use server::{build_router, AppState};
