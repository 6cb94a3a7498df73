//! Wiremock tests for the storefront catalog client.

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wbops_storefront::{CatalogClient, StorefrontError};

fn template(server: &MockServer) -> String {
    format!("{}/brands/catalog?brand={{brand_id}}", server.uri())
}

#[tokio::test]
async fn fetches_a_brand_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/brands/catalog"))
        .and(query_param("brand", "12345"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 1000,
            "products": [{"id": 1, "sizes": [{"price": {"basic": 10000, "product": 9000}}]}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = CatalogClient::new(5, "wbops-test").expect("client");
    let page = client
        .fetch_brand_page(&template(&server), 12345, 1)
        .await
        .expect("page");

    assert_eq!(wbops_storefront::extract_expected_total(&page), Some(1000));
    assert_eq!(wbops_storefront::extract_total_pages(&page, 100), Some(10));
    assert_eq!(wbops_storefront::extract_products(&page).len(), 1);
}

#[tokio::test]
async fn surfaces_429_with_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/brands/catalog"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
        .expect(1)
        .mount(&server)
        .await;

    let client = CatalogClient::new(5, "wbops-test").expect("client");
    let result = client.fetch_brand_page(&template(&server), 1, 1).await;
    assert!(
        matches!(result, Err(StorefrontError::RateLimited { retry_after_secs: 30 })),
        "expected RateLimited, got: {result:?}"
    );
}

#[tokio::test]
async fn surfaces_server_errors_without_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/brands/catalog"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let client = CatalogClient::new(5, "wbops-test").expect("client");
    let result = client.fetch_brand_page(&template(&server), 1, 1).await;
    assert!(matches!(
        result,
        Err(StorefrontError::UnexpectedStatus { status: 500, .. })
    ));
}
