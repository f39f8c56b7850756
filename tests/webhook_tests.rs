//! End-to-end tests for the ERP pricing webhook over a real listener.

use reqwest::StatusCode;
use sea_orm::ConnectionTrait;
use serde_json::{Value, json};

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{
    OPERATOR_TOKEN, TestServer, WEBHOOK_SECRET, insert_item, spawn_test_app, stored_pricing,
    test_config,
};

const ITEM_ID: i64 = 101;
const PRODUCT_ID: i64 = 5001;

fn envelope(item_code: &str, skip: bool, prices: [f64; 4]) -> Value {
    json!({
        "eventType": "item.pricing.updated",
        "timestamp": "2025-06-02T10:00:00Z",
        "source": "netsuite",
        "itemData": {
            "itemid": item_code,
            "custitemf3_lisa_item": skip,
            "price_1_": prices[0],
            "itemPriceLine2_itemPrice": prices[1],
            "cost": prices[2],
            "custitem_f3_rollprice": prices[3],
            "lastmodifieddate": "2025-06-02T09:59:00Z"
        }
    })
}

async fn setup() -> (TestServer, reqwest::Client) {
    let server = spawn_test_app(test_config()).await;
    insert_item(&server.db, ITEM_ID, PRODUCT_ID, "opmsAPI01")
        .await
        .unwrap();
    (server, reqwest::Client::new())
}

async fn deliver(server: &TestServer, client: &reqwest::Client, body: &Value) -> (StatusCode, Value) {
    let response = client
        .post(format!("{}/sync/webhook", server.url))
        .bearer_auth(WEBHOOK_SECRET)
        .json(body)
        .send()
        .await
        .unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

async fn operator_get(server: &TestServer, client: &reqwest::Client, path: &str) -> Value {
    let response = client
        .get(format!("{}{}", server.url, path))
        .bearer_auth(OPERATOR_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK, "GET {}", path);
    response.json().await.unwrap()
}

#[tokio::test]
async fn rejects_missing_or_wrong_secret() {
    let (server, client) = setup().await;
    let body = envelope("opmsAPI01", false, [100.0, 150.0, 40.0, 50.0]);

    let response = client
        .post(format!("{}/sync/webhook", server.url))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .post(format!("{}/sync/webhook", server.url))
        .bearer_auth(OPERATOR_TOKEN)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert!(stored_pricing(&server.db, PRODUCT_ID).await.unwrap().is_empty());
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn scenario_a_then_b_updates_then_skips() {
    let (server, client) = setup().await;

    let (status, body) = deliver(
        &server,
        &client,
        &envelope("opmsAPI01", false, [100.0, 150.0, 40.0, 50.0]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "updated");
    assert_eq!(body["itemId"], "opmsAPI01");
    assert!(body["processingTimeMs"].is_u64());
    assert!(body["jobId"].is_string());

    let stored = stored_pricing(&server.db, PRODUCT_ID).await.unwrap();
    assert_eq!(stored.cut_price, Some(100.0));
    assert_eq!(stored.roll_price, Some(150.0));
    assert_eq!(stored.cut_cost, Some(40.0));
    assert_eq!(stored.roll_cost, Some(50.0));

    let item_status = operator_get(&server, &client, &format!("/sync/items/{}/status", ITEM_ID)).await;
    assert_eq!(item_status["syncStatus"], "SUCCESS");
    assert_eq!(item_status["syncAttempts"], 1);

    let (status, body) = deliver(
        &server,
        &client,
        &envelope("opmsAPI01", true, [200.0, 250.0, 80.0, 100.0]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "skipped");
    assert!(body["reason"].as_str().unwrap().contains("custitemf3_lisa_item"));

    assert_eq!(stored_pricing(&server.db, PRODUCT_ID).await.unwrap(), stored);

    // The skipped delivery still counts as an attempt on the item.
    let item_status = operator_get(&server, &client, &format!("/sync/items/{}/status", ITEM_ID)).await;
    assert_eq!(item_status["syncStatus"], "SUCCESS");
    assert_eq!(item_status["syncAttempts"], 2);
    assert!(item_status["lastError"].is_null());
    assert!(
        item_status["fieldValidationResults"]["skipped"]
            .as_str()
            .unwrap()
            .contains("custitemf3_lisa_item")
    );

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn skip_flag_accepts_checkbox_string() {
    let (server, client) = setup().await;
    let mut body = envelope("opmsAPI01", false, [100.0, 150.0, 40.0, 50.0]);
    body["itemData"]["custitemf3_lisa_item"] = json!("T");

    let (status, body) = deliver(&server, &client, &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "skipped");
    assert!(stored_pricing(&server.db, PRODUCT_ID).await.unwrap().is_empty());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn scenario_c_unknown_item_reports_error_and_fails_job() {
    let (server, client) = setup().await;

    let (status, body) = deliver(
        &server,
        &client,
        &envelope("opmsAPI99", false, [100.0, 150.0, 40.0, 50.0]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "error");
    assert!(body["reason"].as_str().unwrap().contains("not found"));

    let job_id = body["jobId"].as_str().unwrap().to_string();
    let detail = operator_get(&server, &client, &format!("/sync/jobs/{}", job_id)).await;
    assert_eq!(detail["job"]["status"], "failed");
    assert_eq!(detail["job"]["failedItems"], 1);
    assert_eq!(detail["items"][0]["status"], "failed");
    assert_eq!(detail["items"][0]["itemCode"], "opmsAPI99");

    assert!(stored_pricing(&server.db, PRODUCT_ID).await.unwrap().is_empty());
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn scenario_d_negative_price_reports_validation_error() {
    let (server, client) = setup().await;

    let (status, body) = deliver(
        &server,
        &client,
        &envelope("opmsAPI01", false, [-50.0, 150.0, 40.0, 50.0]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "error");
    assert!(body["reason"].as_str().unwrap().contains("cut_price"));

    let item_status = operator_get(&server, &client, &format!("/sync/items/{}/status", ITEM_ID)).await;
    assert_eq!(item_status["syncStatus"], "FAILED");
    assert_eq!(item_status["syncAttempts"], 1);
    assert!(item_status["lastError"].as_str().unwrap().contains("cut_price"));
    assert!(item_status["fieldValidationResults"]["fields"]["cut_price"].is_string());

    assert!(stored_pricing(&server.db, PRODUCT_ID).await.unwrap().is_empty());
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn empty_item_code_is_bad_request() {
    let (server, client) = setup().await;

    let (status, body) = deliver(
        &server,
        &client,
        &envelope("  ", false, [100.0, 150.0, 40.0, 50.0]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let (server, client) = setup().await;

    let response = client
        .post(format!("{}/sync/webhook", server.url))
        .bearer_auth(WEBHOOK_SECRET)
        .header("content-type", "application/json")
        .body("{\"eventType\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let (server, client) = setup().await;
    let mut body = envelope("opmsAPI01", false, [100.0, 150.0, 40.0, 50.0]);
    body["itemData"]["padding"] = json!("x".repeat(8 * 1024));

    let response = client
        .post(format!("{}/sync/webhook", server.url))
        .bearer_auth(WEBHOOK_SECRET)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(stored_pricing(&server.db, PRODUCT_ID).await.unwrap().is_empty());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn dry_run_records_payload_without_writing() {
    let (server, client) = setup().await;

    let response = client
        .post(format!("{}/sync/webhook", server.url))
        .bearer_auth(WEBHOOK_SECRET)
        .header("X-Dry-Run", "true")
        .json(&envelope("opmsAPI01", false, [100.0, 150.0, 40.0, 50.0]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"], "updated");
    assert_eq!(body["dryRun"], true);
    assert!(body["dryRunId"].is_string());
    assert!(body.get("jobId").is_none());

    assert!(stored_pricing(&server.db, PRODUCT_ID).await.unwrap().is_empty());

    let records = operator_get(&server, &client, "/sync/dry-runs?item_code=opmsAPI01").await;
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["syncType"], "ns_to_opms_pricing");
    assert_eq!(records[0]["wouldSucceed"], true);
    assert_eq!(records[0]["validationStatus"], "valid");
    assert_eq!(records[0]["fieldCount"], 4);
    assert_eq!(records[0]["payload"]["cut_price"], 100.0);

    let jobs = operator_get(&server, &client, "/sync/jobs").await;
    assert_eq!(jobs["total"], 0);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn dry_run_of_invalid_payload_records_errors() {
    let (server, client) = setup().await;

    let response = client
        .post(format!("{}/sync/webhook", server.url))
        .bearer_auth(WEBHOOK_SECRET)
        .header("X-Dry-Run", "true")
        .json(&envelope("opmsAPI01", false, [-1.0, 150.0, 40.0, 50.0]))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"], "error");
    assert_eq!(body["dryRun"], true);

    let records = operator_get(&server, &client, "/sync/dry-runs?sync_type=ns_to_opms_pricing").await;
    assert_eq!(records[0]["wouldSucceed"], false);
    assert_eq!(records[0]["validationStatus"], "invalid");
    assert!(records[0]["simulatedErrors"].to_string().contains("cut_price"));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn successful_delivery_is_audited() {
    let (server, client) = setup().await;

    let (_, body) = deliver(
        &server,
        &client,
        &envelope("opmsAPI01", false, [100.0, 150.0, 40.0, 50.0]),
    )
    .await;
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let jobs = operator_get(&server, &client, "/sync/jobs?status=completed&job_type=pricing_sync").await;
    assert_eq!(jobs["total"], 1);
    let job = &jobs["jobs"][0];
    assert_eq!(job["id"], job_id.as_str());
    assert_eq!(job["source"], "webhook");
    assert_eq!(job["triggeredBy"], "netsuite");
    assert_eq!(job["processedItems"], 1);
    assert_eq!(job["successfulItems"], 1);

    let detail = operator_get(&server, &client, &format!("/sync/jobs/{}", job_id)).await;
    let item = &detail["items"][0];
    assert_eq!(item["status"], "success");
    assert_eq!(item["opmsItemId"], ITEM_ID);
    assert_eq!(item["pricingAfter"]["cut_price"], 100.0);

    let logs = operator_get(&server, &client, &format!("/sync/jobs/{}/logs", job_id)).await;
    assert!(!logs.as_array().unwrap().is_empty());

    let status = operator_get(&server, &client, &format!("/sync/items/{}/status", ITEM_ID)).await;
    assert_eq!(status["syncStatus"], "SUCCESS");
    assert_eq!(status["syncAttempts"], 1);
    assert!(status["lastSyncAt"].is_string());
    assert!(status["lastError"].is_null());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn bookkeeping_failure_still_closes_the_job() {
    let (server, client) = setup().await;
    server
        .db
        .execute_unprepared("DROP TABLE opms_item_sync_status")
        .await
        .unwrap();

    let (status, _) = deliver(
        &server,
        &client,
        &envelope("opmsAPI01", false, [100.0, 150.0, 40.0, 50.0]),
    )
    .await;
    assert!(status.is_server_error());

    let running = operator_get(&server, &client, "/sync/jobs?status=running").await;
    assert_eq!(running["total"], 0);
    let failed = operator_get(&server, &client, "/sync/jobs?status=failed&job_type=pricing_sync").await;
    assert_eq!(failed["total"], 1);
    assert!(failed["jobs"][0]["completedAt"].is_string());
    assert!(failed["jobs"][0]["errorMessage"].is_string());

    server.shutdown().await.unwrap();
}
