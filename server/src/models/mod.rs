//! Database models. Column order in every `Queryable` struct must match
//! the table definition in `schema.rs`.

pub mod batch_import;
pub mod content;
pub mod content_deal;
pub mod content_deal_proposal;
pub mod content_miner;
pub mod content_wallet;
pub mod deal_proposal_parameters;
pub mod instance_meta;
pub mod piece_commitment;
pub mod status;
pub mod wallet;
