//! Per-content deal proposal parameters, written once by the ingestion
//! coordinator and read by the deal maker.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::content_deal_proposal_parameters;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = content_deal_proposal_parameters)]
pub struct ContentDealProposalParameters {
    pub id: i64,
    pub content: i64,
    pub label: String,
    pub verified_deal: bool,
    pub unverified_deal_max_price: String,
    pub start_epoch: i64,
    pub end_epoch: i64,
    pub duration: i64,
    pub remove_unsealed_copy: bool,
    pub skip_ipni_announce: bool,
    /// JSON-encoded transfer parameters: `{"url": ...}`.
    pub transfer_params: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = content_deal_proposal_parameters)]
pub struct NewContentDealProposalParameters {
    pub content: i64,
    pub label: String,
    pub verified_deal: bool,
    pub unverified_deal_max_price: String,
    pub start_epoch: i64,
    pub end_epoch: i64,
    pub duration: i64,
    pub remove_unsealed_copy: bool,
    pub skip_ipni_announce: bool,
    pub transfer_params: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ContentDealProposalParameters {
    pub fn create(
        conn: &mut SqliteConnection,
        new_params: NewContentDealProposalParameters,
    ) -> Result<ContentDealProposalParameters> {
        diesel::insert_into(content_deal_proposal_parameters::table)
            .values(&new_params)
            .get_result(conn)
            .context("Failed to insert deal proposal parameters")
    }

    pub fn find_by_content(
        conn: &mut SqliteConnection,
        content_id: i64,
    ) -> Result<ContentDealProposalParameters> {
        content_deal_proposal_parameters::table
            .filter(content_deal_proposal_parameters::content.eq(content_id))
            .order(content_deal_proposal_parameters::id.desc())
            .first(conn)
            .with_context(|| format!("Deal parameters for content {content_id} not found"))
    }

    /// Clone this row for a replica content, keeping every proposal knob but
    /// pointing at the new content id.
    pub fn replicate_for(&self, content_id: i64) -> NewContentDealProposalParameters {
        let now = chrono::Utc::now().naive_utc();
        NewContentDealProposalParameters {
            content: content_id,
            label: self.label.clone(),
            verified_deal: self.verified_deal,
            unverified_deal_max_price: self.unverified_deal_max_price.clone(),
            start_epoch: self.start_epoch,
            end_epoch: self.end_epoch,
            duration: self.duration,
            remove_unsealed_copy: self.remove_unsealed_copy,
            skip_ipni_announce: self.skip_ipni_announce,
            transfer_params: self.transfer_params.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use tempfile::TempDir;

    fn sample(content: i64) -> NewContentDealProposalParameters {
        let now = chrono::Utc::now().naive_utc();
        NewContentDealProposalParameters {
            content,
            label: "bafylabel".to_string(),
            verified_deal: true,
            unverified_deal_max_price: "0".to_string(),
            start_epoch: 100,
            end_epoch: 2980,
            duration: 2880,
            remove_unsealed_copy: false,
            skip_ipni_announce: false,
            transfer_params: "{\"url\":\"libp2p://example\"}".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_replicate_keeps_parameters_but_repoints_content() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(dir.path());
        let mut conn = pool.get().unwrap();

        let original = ContentDealProposalParameters::create(&mut conn, sample(1)).unwrap();
        let replica = original.replicate_for(2);
        assert_eq!(replica.content, 2);
        assert_eq!(replica.label, original.label);
        assert_eq!(replica.start_epoch, original.start_epoch);
        assert_eq!(replica.duration, original.duration);

        let inserted = ContentDealProposalParameters::create(&mut conn, replica).unwrap();
        assert_ne!(inserted.id, original.id);
        assert_eq!(
            ContentDealProposalParameters::find_by_content(&mut conn, 2).unwrap().id,
            inserted.id
        );
    }
}
