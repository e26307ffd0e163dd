//! Fantasy bookstore application library
//!
//! Wires the document store, the books module and the HTTP server together.

pub mod modules;

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use bookstore_db::{DocumentStore, TracingCommandListener};
use bookstore_kernel::{settings::Settings, InitCtx, ModuleRegistry};
use tokio_util::sync::CancellationToken;

/// Re-export commonly used types
pub use modules::*;

/// A bootstrapped bookstore: store created, modules registered and initialized.
pub struct Application {
    settings: Settings,
    store: DocumentStore,
    registry: ModuleRegistry,
    shutdown: CancellationToken,
}

impl Application {
    /// `shutdown` stops the server and cancels in-flight reactive orders.
    pub async fn build(settings: Settings, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let store = DocumentStore::builder()
            .lock_timeout(settings.database.lock_timeout())
            .change_stream_capacity(settings.database.change_stream_capacity)
            .command_listener(Arc::new(TracingCommandListener))
            .build();

        let mut registry = ModuleRegistry::new();
        modules::register_all(&mut registry, &store, &settings, &shutdown);

        let ctx = InitCtx {
            settings: &settings,
            db: &store,
        };
        registry.ensure_collections(&ctx);
        registry
            .init_modules(&ctx)
            .await
            .context("failed to initialize modules")?;

        tracing::info!(
            database = %settings.database.name,
            strategy = ?settings.order.strategy,
            "bookstore ready"
        );

        Ok(Self {
            settings,
            store,
            registry,
            shutdown,
        })
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The full HTTP router, without binding a socket.
    pub fn router(&self) -> Router {
        bookstore_http::build_router(&self.registry, &self.settings)
    }

    /// Serves until the shutdown token fires, then stops the modules.
    pub async fn run(self) -> anyhow::Result<()> {
        let ctx = InitCtx {
            settings: &self.settings,
            db: &self.store,
        };
        self.registry.start_modules(&ctx).await?;

        let served = bookstore_http::start_server(
            &self.registry,
            &self.settings,
            self.shutdown.clone().cancelled_owned(),
        )
        .await;

        // Stop modules even when the server failed
        self.shutdown.cancel();
        self.registry.stop_modules().await?;
        served
    }
}
