//! Admission, validation, and stats-surface tests.

mod common;

use std::time::Duration;

use actix_web::test;

use common::*;
use delta::models::instance_meta::InstanceMeta;
use delta::models::status::*;

fn minimal_import_request(cid: &str) -> serde_json::Value {
    serde_json::json!({
        "cid": cid,
        "size": 4096i64,
        "piece_commitment": {
            "piece": "baga6ea4seaqao7s73y24kcutaosvacpdjgfe5pw76ooefnyqw4ynr3d2y6x2mpq",
            "padded_piece_size": 4096i64,
            "unpadded_piece_size": 4064i64
        },
        "connection_mode": "import",
        "miner": "f0123",
        "transfer_parameters": { "url": "https://example.com/payload.car" }
    })
}

#[actix_web::test]
async fn test_requests_without_api_key_are_unauthorized() {
    let harness = harness();
    let app = test::init_service(build_app(&harness)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/deal/import")
        .set_json(minimal_import_request("bafyunauthenticated"))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), actix_web::http::StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_import_endpoint_rejects_e2e_mode() {
    let harness = harness();
    let app = test::init_service(build_app(&harness)).await;

    let mut request = minimal_import_request("bafyrejected");
    request["connection_mode"] = serde_json::json!("e2e");

    let req = test::TestRequest::post()
        .uri("/api/v1/deal/import")
        .insert_header(bearer())
        .set_json(&request)
        .to_request();
    let response: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(response["status"], "error");
    assert_eq!(
        response["message"],
        "Connection mode e2e is not supported on this import endpoint"
    );
    assert_eq!(count_rows(&harness.pool, "contents"), 0);
}

#[actix_web::test]
async fn test_unknown_wallet_rolls_back_everything() {
    let harness = harness();
    let app = test::init_service(build_app(&harness)).await;

    let mut request = minimal_import_request("bafywalletless");
    request["wallet"] = serde_json::json!({ "address": "f3-does-not-exist" });

    let req = test::TestRequest::post()
        .uri("/api/v1/deal/import")
        .insert_header(bearer())
        .set_json(&request)
        .to_request();
    let response: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(response["status"], "error");
    assert!(response["message"]
        .as_str()
        .unwrap()
        .contains("Wallet not found"));

    // The whole transaction rolled back: no content, no piece commitment,
    // no miner assignment survives.
    assert_eq!(count_rows(&harness.pool, "contents"), 0);
    assert_eq!(count_rows(&harness.pool, "piece_commitments"), 0);
    assert_eq!(count_rows(&harness.pool, "content_miners"), 0);
}

#[actix_web::test]
async fn test_kill_switch_rejects_before_validation() {
    let harness = harness();
    let app = test::init_service(build_app(&harness)).await;

    {
        let mut conn = harness.pool.get().unwrap();
        InstanceMeta::set_disable_request(&mut conn, true).unwrap();
    }

    let req = test::TestRequest::post()
        .uri("/api/v1/deal/import")
        .insert_header(bearer())
        .set_json(minimal_import_request("bafykilled"))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), actix_web::http::StatusCode::FORBIDDEN);

    let body = test::read_body(res).await;
    assert_eq!(body, "\"request is disabled\"".as_bytes());
    assert_eq!(count_rows(&harness.pool, "contents"), 0);
}

#[actix_web::test]
async fn test_small_verified_e2e_file_rejected() {
    let harness = harness();
    let app = test::init_service(build_app(&harness)).await;

    let payload = vec![0u8; 1024];
    let metadata = r#"{"connection_mode":"e2e","deal_verify_state":"verified"}"#;
    let (content_type, body) = multipart_body(&payload, metadata);

    let req = test::TestRequest::post()
        .uri("/api/v1/deal/end-to-end")
        .insert_header(bearer())
        .insert_header(("Content-Type", content_type))
        .set_payload(body)
        .to_request();
    let response: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(response["status"], "error");
    assert_eq!(response["message"], "File size is too small");
    assert_eq!(count_rows(&harness.pool, "contents"), 0);
}

#[actix_web::test]
async fn test_end_to_end_endpoint_rejects_import_mode() {
    let harness = harness();
    let app = test::init_service(build_app(&harness)).await;

    let payload = vec![0u8; 2_000_000];
    let metadata = r#"{"connection_mode":"import"}"#;
    let (content_type, body) = multipart_body(&payload, metadata);

    let req = test::TestRequest::post()
        .uri("/api/v1/deal/end-to-end")
        .insert_header(bearer())
        .insert_header(("Content-Type", content_type))
        .set_payload(body)
        .to_request();
    let response: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(
        response["message"],
        "Connection mode import is not supported for end-to-end deal endpoint"
    );
}

#[actix_web::test]
async fn test_replication_over_cap_rejected() {
    let harness = harness();
    let app = test::init_service(build_app(&harness)).await;

    let payload = vec![0u8; 2_000_000];
    let metadata = r#"{"connection_mode":"e2e","replication":7}"#;
    let (content_type, body) = multipart_body(&payload, metadata);

    let req = test::TestRequest::post()
        .uri("/api/v1/deal/end-to-end")
        .insert_header(bearer())
        .insert_header(("Content-Type", content_type))
        .set_payload(body)
        .to_request();
    let response: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(response["status"], "error");
    assert!(response["message"]
        .as_str()
        .unwrap()
        .contains("replication"));
    assert_eq!(count_rows(&harness.pool, "contents"), 0);
}

#[actix_web::test]
async fn test_batch_import_round_trip() {
    let harness = harness();
    let app = test::init_service(build_app(&harness)).await;

    let batch = serde_json::json!([
        minimal_import_request("bafybatchitemone"),
        minimal_import_request("bafybatchitemtwo"),
    ]);

    let req = test::TestRequest::post()
        .uri("/api/v1/deal/batch/imports")
        .insert_header(bearer())
        .set_json(&batch)
        .to_request();
    let response: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(response["status"], "success");
    let batch_id = response["batch_import_id"].as_i64().unwrap();
    assert!(batch_id > 0);

    // Items are processed asynchronously; wait for the batch to settle.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status: String = {
            let mut conn = harness.pool.get().unwrap();
            delta::models::batch_import::BatchImport::find_by_id(&mut conn, batch_id)
                .unwrap()
                .status
        };
        if status == BATCH_IMPORT_STATUS_COMPLETED {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "batch stuck in {status}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // The batch lookup returns all and only the submitted contents.
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/stats/batch/imports/{batch_id}"))
        .insert_header(bearer())
        .to_request();
    let views: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let views = views.as_array().unwrap();
    assert_eq!(views.len(), 2);

    let cids: Vec<&str> = views
        .iter()
        .map(|v| v["content"]["cid"].as_str().unwrap())
        .collect();
    assert!(cids.contains(&"bafybatchitemone"));
    assert!(cids.contains(&"bafybatchitemtwo"));
}

#[actix_web::test]
async fn test_stats_read_triggers_reconcile_of_in_flight_deal() {
    let harness = harness();
    let app = test::init_service(build_app(&harness)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/deal/import")
        .insert_header(bearer())
        .set_json(minimal_import_request("bafyreconciled"))
        .to_request();
    let response: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let content_id = response["content_id"].as_i64().unwrap();

    wait_for_status(
        &harness.pool,
        content_id,
        CONTENT_DEAL_PROPOSAL_SENT,
        Duration::from_secs(10),
    )
    .await;

    // Reading the deal enqueues a reconcile; the mock provider reports the
    // deal sealed, so the content follows without any explicit job.
    let req = test::TestRequest::get()
        .uri("/api/v1/stats/deal/by-cid/bafyreconciled")
        .insert_header(bearer())
        .to_request();
    let view: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(view["content"]["id"].as_i64().unwrap(), content_id);
    assert_eq!(view["content"]["requesting_api_key"], "");

    wait_for_status(&harness.pool, content_id, CONTENT_SEALED, Duration::from_secs(10)).await;
}

#[actix_web::test]
async fn test_totals_and_paged_deals_surface() {
    let harness = harness();
    let app = test::init_service(build_app(&harness)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/deal/import")
        .insert_header(bearer())
        .set_json(minimal_import_request("bafytotals"))
        .to_request();
    let response: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let content_id = response["content_id"].as_i64().unwrap();
    wait_for_status(
        &harness.pool,
        content_id,
        CONTENT_DEAL_PROPOSAL_SENT,
        Duration::from_secs(10),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/api/v1/stats/totals/info")
        .insert_header(bearer())
        .to_request();
    let totals: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(totals["total_content_consumed"], 1);
    assert_eq!(totals["total_import_deals"], 1);
    assert_eq!(totals["total_piece_committed"], 1);
    assert_eq!(totals["total_proposal_made"], 1);

    let req = test::TestRequest::get()
        .uri("/api/v1/stats/deals?page=1&page_size=10")
        .insert_header(bearer())
        .to_request();
    let page: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["page"], 1);
    assert_eq!(page["total"], 1);
    assert_eq!(page["deals"].as_array().unwrap().len(), 1);
}
