//! Read-only aggregate and per-entity queries over the persistence store.
//!
//! An explicit handle constructed at startup; the HTTP surface gets it via
//! app data instead of a process-wide singleton.

use anyhow::{Context, Result};
use diesel::prelude::*;
use serde_json::{json, Value};

use crate::db::DbPool;
use crate::models::content::Content;
use crate::models::content_deal::ContentDeal;
use crate::models::content_deal_proposal::ContentDealProposal;
use crate::models::deal_proposal_parameters::ContentDealProposalParameters;
use crate::models::piece_commitment::PieceCommitment;
use crate::models::status;
use crate::schema::{
    batch_import_contents, content_deal_proposal_parameters, content_deal_proposals,
    content_deals, content_miners, contents, piece_commitments,
};

/// A stats response plus the content the caller should reconcile, when the
/// observed status is still in flight against the provider.
pub struct DealView {
    pub body: Value,
    pub reconcile_content_id: Option<i64>,
}

#[derive(Clone)]
pub struct StatsService {
    pool: DbPool,
}

impl StatsService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<SqliteConnection>>> {
        self.pool.get().context("Failed to get DB connection")
    }

    /// Joined view of everything known about one content.
    pub fn content_status(&self, content_id: i64) -> Result<DealView> {
        let mut conn = self.conn()?;
        let content = Content::find_by_id(&mut conn, content_id)?;
        let reconcile_content_id = status::needs_reconcile(&content.status).then_some(content.id);

        let deals: Vec<ContentDeal> = content_deals::table
            .filter(content_deals::content.eq(content_id))
            .load(&mut conn)?;
        let commitments: Vec<PieceCommitment> = piece_commitments::table
            .filter(piece_commitments::id.eq(content.piece_commitment_id))
            .load(&mut conn)?;
        let proposals: Vec<ContentDealProposal> = content_deal_proposals::table
            .filter(content_deal_proposals::content.eq(content_id))
            .load(&mut conn)?;
        let parameters: Vec<ContentDealProposalParameters> = content_deal_proposal_parameters::table
            .filter(content_deal_proposal_parameters::content.eq(content_id))
            .load(&mut conn)?;

        Ok(DealView {
            body: json!({
                "content": content.redacted(),
                "deals": deals,
                "piece_commitments": commitments,
                "deal_proposals": proposals,
                "deal_proposal_parameters": parameters,
            }),
            reconcile_content_id,
        })
    }

    pub fn all_content_ids(&self) -> Result<Vec<i64>> {
        let mut conn = self.conn()?;
        contents::table
            .select(contents::id)
            .order(contents::id.asc())
            .load(&mut conn)
            .context("Failed to list content ids")
    }

    pub fn batch_content_ids(&self, batch_id: i64) -> Result<Vec<i64>> {
        let mut conn = self.conn()?;
        batch_import_contents::table
            .filter(batch_import_contents::batch_import_id.eq(batch_id))
            .order(batch_import_contents::content_id.asc())
            .select(batch_import_contents::content_id)
            .load(&mut conn)
            .context("Failed to list batch content ids")
    }

    pub fn deal_by_cid(&self, cid: &str) -> Result<DealView> {
        let mut conn = self.conn()?;
        let content = Content::find_by_cid(&mut conn, cid)?;
        self.deal_view_for(&mut conn, content)
    }

    pub fn deal_by_uuid(&self, deal_uuid: &str) -> Result<DealView> {
        let mut conn = self.conn()?;
        let deal = ContentDeal::find_by_deal_uuid(&mut conn, deal_uuid)?
            .ok_or_else(|| anyhow::anyhow!("Deal {deal_uuid} not found"))?;
        let content = Content::find_by_id(&mut conn, deal.content)?;
        self.deal_view_for(&mut conn, content)
    }

    pub fn deal_by_deal_id(&self, deal_id: i64) -> Result<DealView> {
        let mut conn = self.conn()?;
        let deal = ContentDeal::find_by_deal_id(&mut conn, deal_id)?
            .ok_or_else(|| anyhow::anyhow!("Deal with chain id {deal_id} not found"))?;
        let content = Content::find_by_id(&mut conn, deal.content)?;
        self.deal_view_for(&mut conn, content)
    }

    fn deal_view_for(&self, conn: &mut SqliteConnection, content: Content) -> Result<DealView> {
        let reconcile_content_id = status::needs_reconcile(&content.status).then_some(content.id);

        let deal = ContentDeal::current_for_content(conn, content.id)?;
        let proposal = ContentDealProposal::find_by_content(conn, content.id)?;
        let commitment: Option<PieceCommitment> = piece_commitments::table
            .filter(piece_commitments::id.eq(content.piece_commitment_id))
            .first(conn)
            .optional()?;

        Ok(DealView {
            body: json!({
                "content": content.redacted(),
                "deal": deal,
                "deal_proposal": proposal,
                "piece_commitment": commitment,
            }),
            reconcile_content_id,
        })
    }

    /// Everything a given storage provider has consumed.
    pub fn miner_stats(&self, miner: &str) -> Result<Value> {
        let mut conn = self.conn()?;

        let content_ids: Vec<i64> = content_miners::table
            .filter(content_miners::miner.eq(miner))
            .select(content_miners::content)
            .load(&mut conn)?;

        let miner_contents: Vec<Content> = contents::table
            .filter(contents::id.eq_any(&content_ids))
            .load::<Content>(&mut conn)?
            .into_iter()
            .map(Content::redacted)
            .collect();

        let deals: Vec<ContentDeal> = content_deals::table
            .filter(content_deals::content.eq_any(&content_ids))
            .load(&mut conn)?;

        let commitment_ids: Vec<i64> =
            miner_contents.iter().map(|c| c.piece_commitment_id).collect();
        let commitments: Vec<PieceCommitment> = piece_commitments::table
            .filter(piece_commitments::id.eq_any(commitment_ids))
            .load(&mut conn)?;

        let proposals: Vec<ContentDealProposal> = content_deal_proposals::table
            .filter(content_deal_proposals::content.eq_any(&content_ids))
            .load(&mut conn)?;

        let parameters: Vec<ContentDealProposalParameters> = content_deal_proposal_parameters::table
            .filter(content_deal_proposal_parameters::content.eq_any(&content_ids))
            .load(&mut conn)?;

        Ok(json!({
            "content": miner_contents,
            "deals": deals,
            "piece_commitments": commitments,
            "deal_proposals": proposals,
            "deal_parameters": parameters,
        }))
    }

    pub fn miner_deals(&self, miner: &str) -> Result<Value> {
        let mut conn = self.conn()?;
        let deals: Vec<ContentDeal> = content_deals::table
            .filter(content_deals::miner.eq(miner))
            .order(content_deals::id.desc())
            .load(&mut conn)?;
        Ok(json!({ "deals": deals }))
    }

    /// Paged list of deals, newest deal per content only.
    pub fn deals_paged(&self, page: i64, page_size: i64) -> Result<Value> {
        let mut conn = self.conn()?;
        let page = page.max(1);
        let page_size = page_size.max(1);

        let total: i64 = content_deals::table.count().get_result(&mut conn)?;

        let current_ids: Vec<Option<i64>> = content_deals::table
            .group_by(content_deals::content)
            .select(diesel::dsl::max(content_deals::id))
            .load(&mut conn)?;
        let current_ids: Vec<i64> = current_ids.into_iter().flatten().collect();

        let deals: Vec<ContentDeal> = content_deals::table
            .filter(content_deals::id.eq_any(current_ids))
            .order(content_deals::id.desc())
            .limit(page_size)
            .offset((page - 1) * page_size)
            .load(&mut conn)?;

        Ok(json!({
            "page": page,
            "total": total,
            "deals": deals,
        }))
    }

    /// Global aggregates across the whole instance.
    pub fn totals(&self) -> Result<Value> {
        use diesel::dsl::sql;
        use diesel::sql_types::{BigInt, Nullable};
        let mut conn = self.conn()?;

        let total_content_consumed: i64 = contents::table.count().get_result(&mut conn)?;
        let total_transfer_started: i64 = contents::table
            .filter(contents::status.eq(status::CONTENT_TRANSFER_STARTED))
            .count()
            .get_result(&mut conn)?;
        let total_transfer_finished: i64 = contents::table
            .filter(contents::status.eq(status::CONTENT_TRANSFER_FINISHED))
            .count()
            .get_result(&mut conn)?;
        let total_proposal_made: i64 =
            content_deal_proposals::table.count().get_result(&mut conn)?;
        let total_commitment_piece: i64 =
            piece_commitments::table.count().get_result(&mut conn)?;
        let total_piece_committed: i64 = piece_commitments::table
            .filter(piece_commitments::status.eq(status::COMMP_STATUS_COMMITTED))
            .count()
            .get_result(&mut conn)?;

        let distinct_miners: Vec<String> = content_miners::table
            .select(content_miners::miner)
            .distinct()
            .load(&mut conn)?;

        let total_storage_allocated: Option<i64> = contents::table
            .select(sql::<Nullable<BigInt>>("SUM(size)"))
            .first(&mut conn)?;
        let total_proposal_sent: i64 = contents::table
            .filter(contents::status.eq(status::CONTENT_DEAL_PROPOSAL_SENT))
            .count()
            .get_result(&mut conn)?;
        let total_sealed_deal_in_bytes: Option<i64> = contents::table
            .filter(contents::status.eq_any(status::RECONCILABLE_STATUSES))
            .select(sql::<Nullable<BigInt>>("SUM(size)"))
            .first(&mut conn)?;

        let total_import_deals: i64 = contents::table
            .filter(contents::connection_mode.eq(status::CONNECTION_MODE_IMPORT))
            .count()
            .get_result(&mut conn)?;
        let total_e2e_deals: i64 = contents::table
            .filter(contents::connection_mode.eq(status::CONNECTION_MODE_E2E))
            .count()
            .get_result(&mut conn)?;
        let total_e2e_deals_in_bytes: Option<i64> = contents::table
            .filter(contents::connection_mode.eq(status::CONNECTION_MODE_E2E))
            .select(sql::<Nullable<BigInt>>("SUM(size)"))
            .first(&mut conn)?;
        let total_import_deals_in_bytes: Option<i64> = contents::table
            .filter(contents::connection_mode.eq(status::CONNECTION_MODE_IMPORT))
            .select(sql::<Nullable<BigInt>>("SUM(size)"))
            .first(&mut conn)?;

        Ok(json!({
            "total_content_consumed": total_content_consumed,
            "total_transfer_started": total_transfer_started,
            "total_transfer_finished": total_transfer_finished,
            "total_piece_commitment_made": total_commitment_piece,
            "total_piece_committed": total_piece_committed,
            "total_miners": distinct_miners.len(),
            "total_storage_allocated": total_storage_allocated.unwrap_or(0),
            "total_proposal_made": total_proposal_made,
            "total_proposal_sent": total_proposal_sent,
            "total_sealed_deal_in_bytes": total_sealed_deal_in_bytes.unwrap_or(0),
            "total_import_deals": total_import_deals,
            "total_e2e_deals": total_e2e_deals,
            "total_e2e_deals_in_bytes": total_e2e_deals_in_bytes.unwrap_or(0),
            "total_import_deals_in_bytes": total_import_deals_in_bytes.unwrap_or(0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use crate::models::content::NewContent;
    use crate::models::content_deal::NewContentDeal;
    use tempfile::TempDir;

    #[test]
    fn test_totals_on_seeded_rows() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(dir.path());
        let mut conn = pool.get().unwrap();

        Content::create(
            &mut conn,
            NewContent::new("a", "bafya", 100, "k", "e2e", status::CONTENT_TRANSFER_STARTED),
        )
        .unwrap();
        Content::create(
            &mut conn,
            NewContent::new("b", "bafyb", 50, "k", "import", status::CONTENT_SEALED),
        )
        .unwrap();

        let stats = StatsService::new(pool.clone());
        let totals = stats.totals().unwrap();
        assert_eq!(totals["total_content_consumed"], 2);
        assert_eq!(totals["total_transfer_started"], 1);
        assert_eq!(totals["total_storage_allocated"], 150);
        assert_eq!(totals["total_e2e_deals"], 1);
        assert_eq!(totals["total_import_deals_in_bytes"], 50);
    }

    #[test]
    fn test_deals_paged_returns_newest_per_content() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(dir.path());
        let mut conn = pool.get().unwrap();

        ContentDeal::create(&mut conn, NewContentDeal::new(1, "f01", "uuid-old", true)).unwrap();
        ContentDeal::create(&mut conn, NewContentDeal::new(1, "f01", "uuid-new", true)).unwrap();
        ContentDeal::create(&mut conn, NewContentDeal::new(2, "f02", "uuid-other", true)).unwrap();

        let stats = StatsService::new(pool.clone());
        let page = stats.deals_paged(1, 10).unwrap();
        assert_eq!(page["total"], 3);

        let deals = page["deals"].as_array().unwrap();
        assert_eq!(deals.len(), 2, "one deal per content expected");
        let uuids: Vec<&str> = deals.iter().map(|d| d["deal_uuid"].as_str().unwrap()).collect();
        assert!(uuids.contains(&"uuid-new"));
        assert!(!uuids.contains(&"uuid-old"));
    }

    #[test]
    fn test_content_status_flags_reconcilable_content() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(dir.path());
        let mut conn = pool.get().unwrap();

        let in_flight = Content::create(
            &mut conn,
            NewContent::new("a", "bafya", 1, "k", "e2e", status::CONTENT_TRANSFER_STARTED),
        )
        .unwrap();
        let sealed = Content::create(
            &mut conn,
            NewContent::new("b", "bafyb", 1, "k", "e2e", status::CONTENT_SEALED),
        )
        .unwrap();

        let stats = StatsService::new(pool.clone());
        assert_eq!(
            stats.content_status(in_flight.id).unwrap().reconcile_content_id,
            Some(in_flight.id)
        );
        assert_eq!(stats.content_status(sealed.id).unwrap().reconcile_content_id, None);

        // API keys never leak through stats responses.
        let body = stats.content_status(in_flight.id).unwrap().body;
        assert_eq!(body["content"]["requesting_api_key"], "");
    }
}
