pub mod module;
pub mod registry;
pub mod settings;

pub use module::{InitCtx, Module};
pub use registry::ModuleRegistry;
pub use settings::{
    DatabaseSettings, Environment, LogFormat, OrderSettings, OrderStrategy, RetrySettings,
    ServerSettings, Settings, TelemetrySettings,
};
