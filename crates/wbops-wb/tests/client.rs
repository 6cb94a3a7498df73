//! Wiremock tests for the WB seller API client.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wbops_wb::{CardsCursor, WbApiError, WbClient, WbClientOptions};

fn test_client(server: &MockServer) -> WbClient {
    let options = WbClientOptions {
        min_interval_ms: 0,
        backoff_base_secs: 0,
        ..WbClientOptions::default()
    };
    WbClient::new("test-token", &options)
        .expect("client")
        .with_base_url(&server.uri())
}

#[tokio::test]
async fn cards_page_parses_cursor_and_total() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/content/v2/get/cards/list"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "settings": {"cursor": {"limit": 2}, "filter": {"withPhoto": -1}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cards": [
                {"nmID": 101, "vendorCode": "SKU-101", "title": "First"},
                {"nmID": 102, "vendorCode": "SKU-102", "title": "Second"}
            ],
            "cursor": {"updatedAt": "2024-05-01T00:00:00Z", "nmID": 102, "total": 250}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let page = test_client(&server)
        .fetch_cards_page(None, 2)
        .await
        .expect("page");

    assert_eq!(page.cards.len(), 2);
    assert_eq!(page.total, Some(250));
    let cursor = page.next_cursor.expect("cursor");
    assert_eq!(cursor.nm_id, 102);
    assert_eq!(cursor.updated_at, "2024-05-01T00:00:00Z");
}

#[tokio::test]
async fn cards_page_forwards_the_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/content/v2/get/cards/list"))
        .and(body_partial_json(json!({
            "settings": {"cursor": {"limit": 100, "updatedAt": "2024-05-01T00:00:00Z", "nmID": 102}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"cards": [], "cursor": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let cursor = CardsCursor {
        updated_at: "2024-05-01T00:00:00Z".to_owned(),
        nm_id: 102,
    };
    let page = test_client(&server)
        .fetch_cards_page(Some(&cursor), 100)
        .await
        .expect("page");
    assert!(page.cards.is_empty());
    assert!(page.next_cursor.is_none(), "empty page ends the walk");
}

#[tokio::test]
async fn rate_limit_is_retried_then_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/supplier/stocks"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let options = WbClientOptions {
        min_interval_ms: 0,
        backoff_base_secs: 0,
        max_retries: 1,
        ..WbClientOptions::default()
    };
    let client = WbClient::new("t", &options)
        .expect("client")
        .with_base_url(&server.uri());

    let result = client.fetch_supplier_stocks("2019-06-20T00:00:00Z").await;
    assert!(
        matches!(result, Err(WbApiError::RateLimited { retry_after_secs: 7, .. })),
        "expected RateLimited, got: {result:?}"
    );
    // 1 initial + 1 retry
    assert_eq!(server.received_requests().await.expect("requests").len(), 2);
}

#[tokio::test]
async fn unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/offices"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let result = test_client(&server).fetch_offices().await;
    assert!(matches!(result, Err(WbApiError::Unauthorized { status: 401, .. })));
}

#[tokio::test]
async fn supplier_stocks_pass_date_from_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/supplier/stocks"))
        .and(query_param("dateFrom", "2024-05-01T10:00:00Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"nmId": 5, "lastChangeDate": "2024-05-01T11:00:00Z", "quantity": 2}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let rows = test_client(&server)
        .fetch_supplier_stocks("2024-05-01T10:00:00Z")
        .await
        .expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["nmId"], 5);
}

#[tokio::test]
async fn finance_lines_paginate_by_rrdid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v5/supplier/reportDetailByPeriod"))
        .and(query_param("dateFrom", "2024-01-01"))
        .and(query_param("dateTo", "2024-01-31"))
        .and(query_param("rrdid", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"realizationreport_id": 9000, "rrd_id": 1, "retail_amount": 100.0}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let lines = test_client(&server)
        .fetch_finance_report_lines(
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"),
            chrono::NaiveDate::from_ymd_opt(2024, 1, 31).expect("date"),
            0,
            1000,
        )
        .await
        .expect("lines");
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["rrd_id"], 1);
}

#[tokio::test]
async fn server_error_is_retried_until_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/warehouses"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let options = WbClientOptions {
        min_interval_ms: 0,
        backoff_base_secs: 0,
        max_retries: 2,
        ..WbClientOptions::default()
    };
    let client = WbClient::new("t", &options)
        .expect("client")
        .with_base_url(&server.uri());

    let result = client.fetch_seller_warehouses().await;
    assert!(matches!(result, Err(WbApiError::UnexpectedStatus { status: 503, .. })));
    assert_eq!(server.received_requests().await.expect("requests").len(), 3);
}
