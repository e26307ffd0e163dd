use std::path::Path;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use bookstore_app::Application;
use bookstore_kernel::settings::{OrderStrategy, Settings};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn settings(strategy: OrderStrategy) -> Settings {
    let mut settings = Settings::default();
    settings.database.reset_data = true;
    settings.database.seed_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("data");
    settings.database.lock_timeout_ms = 5_000;
    settings.order.strategy = strategy;
    settings
}

async fn app(strategy: OrderStrategy) -> Application {
    Application::build(settings(strategy), CancellationToken::new())
        .await
        .unwrap()
}

async fn send(router: Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn lists_the_seeded_catalogue() {
    let app = app(OrderStrategy::Atomic).await;

    let (status, books) = send(app.router(), Method::GET, "/books").await;
    assert_eq!(status, StatusCode::OK);
    let titles: Vec<&str> = books
        .as_array()
        .unwrap()
        .iter()
        .map(|book| book["title"].as_str().unwrap())
        .collect();
    assert!(titles.contains(&"The Hobbit"));
    assert!(titles.contains(&"Good Omens"));
}

#[tokio::test]
async fn fetches_a_single_book() {
    let app = app(OrderStrategy::Atomic).await;

    let (status, book) = send(app.router(), Method::GET, "/book/good-omens").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(book["authors"][1], "Neil Gaiman");
    assert_eq!(book["publisherId"], "gollancz");
    assert_eq!(book["stock"], 4);

    let (status, body) = send(app.router(), Method::GET, "/book/the-silmarillion").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn ordering_returns_the_customer_and_reduces_stock() {
    for strategy in [
        OrderStrategy::Atomic,
        OrderStrategy::NativeTransaction,
        OrderStrategy::ManagedTransaction,
        OrderStrategy::ReactiveTransaction,
        OrderStrategy::RetryableTransaction,
    ] {
        let app = app(strategy).await;

        let (status, order) = send(
            app.router(),
            Method::POST,
            "/book/the-hobbit/order?customer=christoph",
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{strategy:?}");
        assert_eq!(order["customer"], "cstrobl@pivotal.io");
        assert_eq!(order["books"][0]["id"], "the-hobbit");

        let (_, book) = send(app.router(), Method::GET, "/book/the-hobbit").await;
        assert_eq!(book["stock"], 4, "{strategy:?}");
    }
}

#[tokio::test]
async fn missing_customer_orders_as_guest() {
    let app = app(OrderStrategy::ManagedTransaction).await;

    let (status, order) = send(app.router(), Method::POST, "/book/good-omens/order").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["customer"], "guest@fantasy-bookstore.io");
}

#[tokio::test]
async fn sold_out_book_is_a_conflict() {
    let app = app(OrderStrategy::NativeTransaction).await;

    let (status, body) = send(
        app.router(),
        Method::POST,
        "/book/die-unendliche-geschichte/order?customer=jeff",
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "book_sold_out");
    assert_eq!(body["error"]["details"][0]["bookId"], "die-unendliche-geschichte");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_one_of_two_buyers_gets_the_last_copy() {
    for strategy in [
        OrderStrategy::Atomic,
        OrderStrategy::NativeTransaction,
        OrderStrategy::ManagedTransaction,
        OrderStrategy::ReactiveTransaction,
        OrderStrategy::RetryableTransaction,
    ] {
        let app = app(strategy).await;

        let jeff = tokio::spawn(send(
            app.router(),
            Method::POST,
            "/book/the-last-unicorn/order?customer=jeff",
        ));
        let christoph = tokio::spawn(send(
            app.router(),
            Method::POST,
            "/book/the-last-unicorn/order?customer=christoph",
        ));

        let mut statuses = vec![jeff.await.unwrap().0, christoph.await.unwrap().0];
        statuses.sort();
        assert_eq!(
            statuses,
            vec![StatusCode::OK, StatusCode::CONFLICT],
            "{strategy:?}"
        );

        let (_, book) = send(app.router(), Method::GET, "/book/the-last-unicorn").await;
        assert_eq!(book["stock"], 0, "{strategy:?}");
    }
}

#[tokio::test]
async fn openapi_documents_the_book_routes() {
    let app = app(OrderStrategy::Atomic).await;

    let (status, spec) = send(app.router(), Method::GET, "/docs/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(spec["paths"]["/books"]["get"].is_object());
    assert!(spec["paths"]["/book/{id}"]["get"].is_object());
    assert!(spec["paths"]["/book/{id}/order"]["post"].is_object());
    assert!(spec["components"]["schemas"]["Book"].is_object());
}
