pub mod books;

use bookstore_db::DocumentStore;
use bookstore_kernel::{settings::Settings, ModuleRegistry};
use tokio_util::sync::CancellationToken;

/// Register all application modules with the registry
pub fn register_all(
    registry: &mut ModuleRegistry,
    store: &DocumentStore,
    settings: &Settings,
    shutdown: &CancellationToken,
) {
    registry.register(books::create_module(store, settings, shutdown.clone()));
}
