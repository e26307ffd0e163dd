//! HTTP handlers for browsing and ordering books.

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use bookstore_db::{Filter, ReactiveCollection};
use bookstore_http::AppError;
use serde::Deserialize;
use serde_json::json;

use super::models::{Book, Customer, Order};
use super::orders::{PurchaseError, PurchaseStrategy};

/// Shared handler state; reads go straight to the catalogue, orders through
/// the configured strategy.
#[derive(Clone, Debug)]
pub struct BooksState {
    pub books: ReactiveCollection,
    pub strategy: PurchaseStrategy,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderParams {
    pub customer: Option<String>,
}

pub fn router(state: BooksState) -> Router {
    Router::new()
        .route("/books", get(list_books))
        .route("/book/{id}", get(get_book))
        .route("/book/{id}/order", post(order_book))
        .with_state(state)
}

async fn list_books(State(state): State<BooksState>) -> Result<Json<Vec<Book>>, AppError> {
    let documents = state
        .books
        .find(Filter::new())
        .await
        .context("failed to list books")?;

    let books = documents
        .into_iter()
        .map(Book::from_document)
        .collect::<Result<Vec<_>, _>>()
        .context("stored book has an unexpected shape")?;
    Ok(Json(books))
}

async fn get_book(
    State(state): State<BooksState>,
    Path(id): Path<String>,
) -> Result<Json<Book>, AppError> {
    Ok(Json(find_book(&state, &id).await?))
}

async fn order_book(
    State(state): State<BooksState>,
    Path(id): Path<String>,
    Query(params): Query<OrderParams>,
) -> Result<Json<Order>, AppError> {
    let book = find_book(&state, &id).await?;
    let customer = Customer::resolve(params.customer.as_deref());

    let order = state.strategy.buy(customer, book).await?;
    tracing::info!(
        order_id = %order.id,
        customer = %order.customer,
        book_id = %id,
        strategy = state.strategy.name(),
        "order placed"
    );
    Ok(Json(order))
}

async fn find_book(state: &BooksState, id: &str) -> Result<Book, AppError> {
    let document = state
        .books
        .find_one(Filter::by_id(id))
        .await
        .with_context(|| format!("failed to load book '{id}'"))?
        .ok_or_else(|| AppError::not_found(format!("book '{id}' not found")))?;

    Book::from_document(document)
        .with_context(|| format!("stored book '{id}' has an unexpected shape"))
        .map_err(AppError::from)
}

impl From<PurchaseError> for AppError {
    fn from(error: PurchaseError) -> Self {
        match error {
            PurchaseError::SoldOut(book) => AppError::conflict(
                "book_sold_out",
                vec![json!({ "bookId": book.id, "title": book.title })],
                format!("'{}' is sold out", book.title),
            ),
            PurchaseError::Cancelled => {
                AppError::unavailable("the order was cancelled before it completed")
            }
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}
