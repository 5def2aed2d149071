//! End-to-end pipeline tests: ingestion through piece commitment, deal
//! making, transfer tracking, and sealing, against a scripted provider.

mod common;

use std::time::Duration;

use actix_web::test;
use diesel::prelude::*;

use common::*;
use delta::epochs::EPOCH_PER_DAY;
use delta::jobs::Job;
use delta::models::content_deal::ContentDeal;
use delta::models::deal_proposal_parameters::ContentDealProposalParameters;
use delta::models::piece_commitment::PieceCommitment;
use delta::models::status::*;
use delta::provider::mock::MockProviderClient;
use delta::provider::ProviderDealState;
use delta::schema::{contents, piece_commitments};

#[actix_web::test]
async fn test_e2e_happy_path_reaches_sealed() {
    let provider = MockProviderClient::new().with_script(
        vec![
            ProviderDealState::Accepted,
            ProviderDealState::TransferStarted,
            ProviderDealState::TransferFinished,
            ProviderDealState::Published { deal_id: 73001 },
        ],
        ProviderDealState::Sealed { deal_id: 73001 },
    );
    let harness = harness_with_provider(provider);
    let app = test::init_service(build_app(&harness)).await;

    let payload = vec![0xa5u8; 2 * 1024 * 1024];
    let metadata = r#"{"connection_mode":"e2e","deal_verify_state":"verified","start_epoch_in_days":7,"duration_in_days":180}"#;
    let (content_type, body) = multipart_body(&payload, metadata);

    let req = test::TestRequest::post()
        .uri("/api/v1/deal/end-to-end")
        .insert_header(bearer())
        .insert_header(("Content-Type", content_type))
        .set_payload(body)
        .to_request();
    let response: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(response["status"], "success", "unexpected: {response}");
    let content_id = response["content_id"].as_i64().unwrap();
    assert!(content_id > 0);

    wait_for_status(&harness.pool, content_id, CONTENT_SEALED, Duration::from_secs(20)).await;

    let mut conn = harness.pool.get().unwrap();

    // Exactly one committed piece commitment describing the content's cid.
    let content_cid: String = contents::table
        .filter(contents::id.eq(content_id))
        .select(contents::cid)
        .first(&mut conn)
        .unwrap();
    let commitment: PieceCommitment = piece_commitments::table
        .first(&mut conn)
        .unwrap();
    assert_eq!(commitment.status, COMMP_STATUS_COMMITTED);
    assert_eq!(commitment.cid, content_cid);
    assert!(commitment.padded_piece_size.is_positive());
    assert_eq!(
        commitment.unpadded_piece_size,
        commitment.padded_piece_size - commitment.padded_piece_size / 128
    );

    // The deal carries the provider handle and the on-chain id.
    let deal = ContentDeal::current_for_content(&mut conn, content_id)
        .unwrap()
        .expect("deal row missing");
    assert!(deal.deal_uuid.starts_with("mock-deal-"));
    assert_eq!(deal.deal_id, 73001);

    // Proposal parameters carry the requested epoch window.
    let params = ContentDealProposalParameters::find_by_content(&mut conn, content_id).unwrap();
    assert_eq!(params.end_epoch - params.start_epoch, EPOCH_PER_DAY * 173);
    assert_eq!(params.duration, params.end_epoch - params.start_epoch);
    assert!(params.verified_deal);
    assert!(params.transfer_params.contains("libp2p://"));

    assert_eq!(harness.provider.proposal_count(), 1);
}

#[actix_web::test]
async fn test_import_happy_path_stops_at_proposal_sent() {
    let harness = harness();
    let app = test::init_service(build_app(&harness)).await;
    seed_wallet(&harness.pool, "f3importwallet", API_KEY);

    let request = serde_json::json!({
        "cid": "bafkreigh2akiscaildcqabsyg3dfr6chu3fgpregiymsck7e7aqa4s52zy",
        "size": 34359738368i64,
        "piece_commitment": {
            "piece": "baga6ea4seaqao7s73y24kcutaosvacpdjgfe5pw76ooefnyqw4ynr3d2y6x2mpq",
            "padded_piece_size": 34359738368i64,
            "unpadded_piece_size": 34091302912i64
        },
        "connection_mode": "import",
        "deal_verify_state": "verified",
        "miner": "f0123",
        "wallet": { "address": "f3importwallet" },
        "transfer_parameters": { "url": "https://example.com/payload.car" }
    });

    let req = test::TestRequest::post()
        .uri("/api/v1/deal/import")
        .insert_header(bearer())
        .set_json(&request)
        .to_request();
    let response: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(response["status"], "success", "unexpected: {response}");
    let content_id = response["content_id"].as_i64().unwrap();

    // Import deals hand transfer to the provider: the deal maker stops at
    // deal-proposal-sent and the reconciler owns the rest.
    wait_for_status(
        &harness.pool,
        content_id,
        CONTENT_DEAL_PROPOSAL_SENT,
        Duration::from_secs(10),
    )
    .await;

    let mut conn = harness.pool.get().unwrap();
    let commitment: PieceCommitment = piece_commitments::table.first(&mut conn).unwrap();
    assert_eq!(commitment.status, COMMP_STATUS_COMMITTED);

    let deal = ContentDeal::current_for_content(&mut conn, content_id)
        .unwrap()
        .expect("deal row missing");
    assert_eq!(deal.deal_id, 0);

    let params = ContentDealProposalParameters::find_by_content(&mut conn, content_id).unwrap();
    assert!(params.transfer_params.contains("https://example.com/payload.car"));
    drop(conn);

    // A reconcile pass observes the provider-side sealing and finishes the
    // state machine.
    harness.ctx.dispatcher.add_job_and_dispatch(Job::DealStatusCheck { content_id }, 1);
    wait_for_status(&harness.pool, content_id, CONTENT_SEALED, Duration::from_secs(10)).await;

    let mut conn = harness.pool.get().unwrap();
    let deal = ContentDeal::current_for_content(&mut conn, content_id)
        .unwrap()
        .unwrap();
    assert_eq!(deal.deal_id, 73001);
}

#[actix_web::test]
async fn test_replication_fans_out_to_independent_contents() {
    let harness = harness();
    let app = test::init_service(build_app(&harness)).await;

    let payload = vec![0x3cu8; 1_200_000];
    let metadata = r#"{"connection_mode":"e2e","deal_verify_state":"verified","replication":3}"#;
    let (content_type, body) = multipart_body(&payload, metadata);

    let req = test::TestRequest::post()
        .uri("/api/v1/deal/end-to-end")
        .insert_header(bearer())
        .insert_header(("Content-Type", content_type))
        .set_payload(body)
        .to_request();
    let response: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(response["status"], "success", "unexpected: {response}");
    assert_eq!(response["replicated_contents"].as_array().unwrap().len(), 3);

    // The original plus three clones, each with its own parameters and an
    // independently assigned miner.
    assert_eq!(count_rows(&harness.pool, "contents"), 4);
    assert_eq!(count_rows(&harness.pool, "content_deal_proposal_parameters"), 4);
    assert_eq!(count_rows(&harness.pool, "content_miners"), 4);

    let content_id = response["content_id"].as_i64().unwrap();
    wait_for_status(&harness.pool, content_id, CONTENT_SEALED, Duration::from_secs(20)).await;
    for replica in response["replicated_contents"].as_array().unwrap() {
        let replica_id = replica["content_id"].as_i64().unwrap();
        wait_for_status(&harness.pool, replica_id, CONTENT_SEALED, Duration::from_secs(20)).await;
    }

    assert_eq!(harness.provider.proposal_count(), 4);
}

#[actix_web::test]
async fn test_duplicate_processor_run_is_a_noop() {
    let harness = harness();
    let app = test::init_service(build_app(&harness)).await;

    let request = serde_json::json!({
        "cid": "bafkreigh2akiscaildcqabsyg3dfr6chu3fgpregiymsck7e7aqa4s52zy",
        "size": 2048i64,
        "piece_commitment": {
            "piece": "baga6ea4seaqao7s73y24kcutaosvacpdjgfe5pw76ooefnyqw4ynr3d2y6x2mpq",
            "padded_piece_size": 2048i64,
            "unpadded_piece_size": 2032i64
        },
        "connection_mode": "import",
        "miner": "f0123",
        "transfer_parameters": { "url": "https://example.com/p.car" }
    });

    let req = test::TestRequest::post()
        .uri("/api/v1/deal/import")
        .insert_header(bearer())
        .set_json(&request)
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
    let deals_before = count_rows(&harness.pool, "content_deals");
    let commitments_before = count_rows(&harness.pool, "piece_commitments");

    // Re-running either processor against the progressed content must not
    // change any row.
    Job::PieceCommp { content_id, attempt: 0 }
        .run(&harness.ctx)
        .await
        .unwrap();
    Job::DealMaker { content_id, attempt: 0 }
        .run(&harness.ctx)
        .await
        .unwrap();

    assert_eq!(content_status_of(&harness.pool, content_id), CONTENT_DEAL_PROPOSAL_SENT);
    assert_eq!(count_rows(&harness.pool, "content_deals"), deals_before);
    assert_eq!(count_rows(&harness.pool, "piece_commitments"), commitments_before);
}

#[actix_web::test]
async fn test_piece_commitment_failure_is_terminal_after_retries() {
    let harness = harness();

    // A content whose cid was never pinned: the computer cannot load it.
    let content_id = {
        use delta::models::content::{Content, NewContent};
        let mut conn = harness.pool.get().unwrap();
        Content::create(
            &mut conn,
            NewContent::new(
                "ghost",
                "bafkreiunpinnedpayloadneverstoredanywhere",
                1024,
                API_KEY,
                "e2e",
                CONTENT_PINNED,
            ),
        )
        .unwrap()
        .id
    };

    // Run the final allowed attempt directly; it must mark the content
    // failed rather than scheduling another retry.
    let result = Job::PieceCommp { content_id, attempt: 2 }.run(&harness.ctx).await;
    assert!(result.is_err());
    assert_eq!(
        content_status_of(&harness.pool, content_id),
        CONTENT_PIECE_COMMITMENT_FAILED
    );
}
