pub mod fixtures;
pub mod models;
pub mod orders;
pub mod routes;
pub mod watcher;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use bookstore_db::{DocumentStore, ReactiveClient, StoreError};
use bookstore_kernel::{settings::Settings, InitCtx, Module};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use models::{BOOKS_COLLECTION, ORDER_COLLECTION};
use orders::PurchaseStrategy;
use routes::BooksState;

type WatcherHandle = (CancellationToken, JoinHandle<Result<u64, StoreError>>);

/// Catalogue browsing and ordering
pub struct BooksModule {
    state: BooksState,
    shutdown: CancellationToken,
    watcher: Mutex<Option<WatcherHandle>>,
}

impl BooksModule {
    pub fn new(store: &DocumentStore, settings: &Settings, shutdown: CancellationToken) -> Self {
        let state = BooksState {
            books: ReactiveClient::new(store.clone()).collection(BOOKS_COLLECTION),
            strategy: PurchaseStrategy::from_settings(&settings.order, store, shutdown.clone()),
        };
        Self {
            state,
            shutdown,
            watcher: Mutex::new(None),
        }
    }

    /// Cancels the order watcher, if running, and returns how many orders it saw.
    async fn stop_watcher(&self) -> Option<u64> {
        let (stop, handle) = self.watcher.lock().await.take()?;
        stop.cancel();
        match handle.await {
            Ok(Ok(observed)) => {
                tracing::debug!(observed, "order watcher finished");
                Some(observed)
            }
            Ok(Err(error)) => {
                tracing::warn!(%error, "order watcher ended with an error");
                None
            }
            Err(error) => {
                tracing::warn!(%error, "order watcher panicked");
                None
            }
        }
    }
}

#[async_trait]
impl Module for BooksModule {
    fn name(&self) -> &'static str {
        "books"
    }

    fn collections(&self) -> Vec<&'static str> {
        vec![BOOKS_COLLECTION, ORDER_COLLECTION]
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        if ctx.settings.database.reset_data {
            fixtures::reset_test_data(ctx.db, &ctx.settings.database.seed_dir)?;
        }
        tracing::info!(
            module = self.name(),
            strategy = self.state.strategy.name(),
            environment = ?ctx.settings.environment,
            "books module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        routes::router(self.state.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        Some(openapi())
    }

    async fn start(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        if ctx.settings.order.watch_changes {
            let stop = self.shutdown.child_token();
            let stream = watcher::order_inserts(ctx.db);
            let handle = tokio::spawn(watcher::watch_orders(stream, stop.clone()));
            *self.watcher.lock().await = Some((stop, handle));
        }
        tracing::info!(module = self.name(), "books module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stop_watcher().await;
        tracing::info!(module = self.name(), "books module stopped");
        Ok(())
    }
}

fn error_response(description: &str) -> serde_json::Value {
    serde_json::json!({
        "description": description,
        "content": {
            "application/json": {
                "schema": { "$ref": "#/components/schemas/ErrorResponse" }
            }
        }
    })
}

fn openapi() -> serde_json::Value {
    let id_parameter = serde_json::json!({
        "name": "id",
        "in": "path",
        "required": true,
        "schema": { "type": "string" }
    });

    serde_json::json!({
        "paths": {
            "/books": {
                "get": {
                    "summary": "List books",
                    "tags": ["Books"],
                    "responses": {
                        "200": {
                            "description": "Every book in the catalogue",
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "array",
                                        "items": { "$ref": "#/components/schemas/Book" }
                                    }
                                }
                            }
                        },
                        "500": error_response("Internal server error")
                    }
                }
            },
            "/book/{id}": {
                "get": {
                    "summary": "Get a book",
                    "tags": ["Books"],
                    "parameters": [id_parameter.clone()],
                    "responses": {
                        "200": {
                            "description": "The book",
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/Book" }
                                }
                            }
                        },
                        "404": error_response("No book with this id"),
                        "500": error_response("Internal server error")
                    }
                }
            },
            "/book/{id}/order": {
                "post": {
                    "summary": "Order one copy of a book",
                    "tags": ["Books"],
                    "parameters": [
                        id_parameter,
                        {
                            "name": "customer",
                            "in": "query",
                            "required": false,
                            "description": "Customer alias or email; the guest when absent",
                            "schema": { "type": "string" }
                        }
                    ],
                    "responses": {
                        "200": {
                            "description": "The placed order",
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/Order" }
                                }
                            }
                        },
                        "404": error_response("No book with this id"),
                        "409": error_response("The book is sold out"),
                        "503": error_response("The order was cancelled"),
                        "500": error_response("Internal server error")
                    }
                }
            }
        },
        "components": {
            "schemas": {
                "Book": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "title": { "type": "string" },
                        "authors": { "type": "array", "items": { "type": "string" } },
                        "publishDate": { "type": ["string", "null"] },
                        "pages": { "type": "integer", "minimum": 0 },
                        "language": { "type": ["string", "null"] },
                        "publisherId": { "type": ["string", "null"] },
                        "stock": {
                            "type": "integer",
                            "minimum": 0,
                            "description": "Copies left"
                        }
                    },
                    "required": ["id", "title", "authors", "pages", "stock"]
                },
                "Order": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "customer": { "type": "string", "description": "Customer email" },
                        "date": { "type": "string", "format": "date-time" },
                        "books": {
                            "type": "array",
                            "items": { "$ref": "#/components/schemas/Book" }
                        }
                    },
                    "required": ["id", "customer", "date", "books"]
                }
            }
        }
    })
}

/// Create a new instance of the books module
pub fn create_module(
    store: &DocumentStore,
    settings: &Settings,
    shutdown: CancellationToken,
) -> Arc<dyn Module> {
    Arc::new(BooksModule::new(store, settings, shutdown))
}
