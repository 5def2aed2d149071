//! Content, piece-commitment and batch-import status vocabulary, plus the
//! legal edges of the content state machine.

pub const CONTENT_PINNED: &str = "pinned";
pub const CONTENT_PIECE_COMPUTING: &str = "piece-computing";
pub const CONTENT_PIECE_ASSIGNED: &str = "piece-assigned";
pub const CONTENT_PIECE_COMMITMENT_FAILED: &str = "piece-commitment-failed";
pub const CONTENT_DEAL_MAKING_PROPOSAL: &str = "deal-making-proposal";
pub const CONTENT_DEAL_PROPOSAL_SENT: &str = "deal-proposal-sent";
pub const CONTENT_TRANSFER_STARTED: &str = "transfer-started";
pub const CONTENT_TRANSFER_FINISHED: &str = "transfer-finished";
pub const CONTENT_SEALED: &str = "sealed";
pub const CONTENT_FAILED: &str = "failed";

pub const COMMP_STATUS_OPEN: &str = "open";
pub const COMMP_STATUS_COMMITTED: &str = "committed";
pub const COMMP_STATUS_FAILED: &str = "failed";

pub const BATCH_IMPORT_STATUS_STARTED: &str = "started";
pub const BATCH_IMPORT_STATUS_COMPLETED: &str = "completed";
pub const BATCH_IMPORT_STATUS_FAILED: &str = "failed";

pub const CONNECTION_MODE_E2E: &str = "e2e";
pub const CONNECTION_MODE_IMPORT: &str = "import";

pub const DEAL_VERIFIED: &str = "verified";
pub const DEAL_UNVERIFIED: &str = "unverified";

/// Every status a content row may carry.
pub const ALL_CONTENT_STATUSES: &[&str] = &[
    CONTENT_PINNED,
    CONTENT_PIECE_COMPUTING,
    CONTENT_PIECE_ASSIGNED,
    CONTENT_PIECE_COMMITMENT_FAILED,
    CONTENT_DEAL_MAKING_PROPOSAL,
    CONTENT_DEAL_PROPOSAL_SENT,
    CONTENT_TRANSFER_STARTED,
    CONTENT_TRANSFER_FINISHED,
    CONTENT_SEALED,
    CONTENT_FAILED,
];

/// Statuses the reconciler considers in-flight against the provider.
pub const RECONCILABLE_STATUSES: &[&str] = &[
    CONTENT_TRANSFER_STARTED,
    CONTENT_DEAL_PROPOSAL_SENT,
    CONTENT_TRANSFER_FINISHED,
];

/// The legal edges of the content state machine. `failed` re-enters
/// `deal-making-proposal` only for auto-retryable failures.
const EDGES: &[(&str, &str)] = &[
    (CONTENT_PINNED, CONTENT_PIECE_COMPUTING),
    (CONTENT_PIECE_COMPUTING, CONTENT_PIECE_ASSIGNED),
    (CONTENT_PIECE_COMPUTING, CONTENT_PIECE_COMMITMENT_FAILED),
    (CONTENT_PIECE_ASSIGNED, CONTENT_DEAL_MAKING_PROPOSAL),
    (CONTENT_DEAL_MAKING_PROPOSAL, CONTENT_DEAL_PROPOSAL_SENT),
    (CONTENT_DEAL_PROPOSAL_SENT, CONTENT_TRANSFER_STARTED),
    (CONTENT_DEAL_PROPOSAL_SENT, CONTENT_FAILED),
    (CONTENT_DEAL_PROPOSAL_SENT, CONTENT_SEALED),
    (CONTENT_TRANSFER_STARTED, CONTENT_TRANSFER_FINISHED),
    (CONTENT_TRANSFER_FINISHED, CONTENT_SEALED),
    (CONTENT_FAILED, CONTENT_DEAL_MAKING_PROPOSAL),
];

pub fn is_legal_transition(from: &str, to: &str) -> bool {
    EDGES.iter().any(|(f, t)| *f == from && *t == to)
}

pub fn is_terminal(status: &str) -> bool {
    matches!(
        status,
        CONTENT_SEALED | CONTENT_FAILED | CONTENT_PIECE_COMMITMENT_FAILED
    )
}

/// Whether a stats read on this content should trigger a reconcile job.
pub fn needs_reconcile(status: &str) -> bool {
    RECONCILABLE_STATUSES.contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_e2e_happy_path_is_fully_legal() {
        let path = [
            CONTENT_PINNED,
            CONTENT_PIECE_COMPUTING,
            CONTENT_PIECE_ASSIGNED,
            CONTENT_DEAL_MAKING_PROPOSAL,
            CONTENT_DEAL_PROPOSAL_SENT,
            CONTENT_TRANSFER_STARTED,
            CONTENT_TRANSFER_FINISHED,
            CONTENT_SEALED,
        ];
        for pair in path.windows(2) {
            assert!(
                is_legal_transition(pair[0], pair[1]),
                "expected {} -> {} to be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_import_path_skips_piece_computation() {
        assert!(is_legal_transition(
            CONTENT_DEAL_MAKING_PROPOSAL,
            CONTENT_DEAL_PROPOSAL_SENT
        ));
        assert!(is_legal_transition(CONTENT_DEAL_PROPOSAL_SENT, CONTENT_SEALED));
    }

    #[test]
    fn test_terminal_states() {
        assert!(is_terminal(CONTENT_SEALED));
        assert!(is_terminal(CONTENT_FAILED));
        assert!(is_terminal(CONTENT_PIECE_COMMITMENT_FAILED));
        assert!(!is_terminal(CONTENT_TRANSFER_STARTED));
    }

    #[test]
    fn test_failed_reenters_deal_making_only() {
        assert!(is_legal_transition(CONTENT_FAILED, CONTENT_DEAL_MAKING_PROPOSAL));
        assert!(!is_legal_transition(CONTENT_FAILED, CONTENT_DEAL_PROPOSAL_SENT));
        assert!(!is_legal_transition(CONTENT_FAILED, CONTENT_SEALED));
    }

    #[test]
    fn test_no_backwards_edges_in_pipeline() {
        assert!(!is_legal_transition(CONTENT_SEALED, CONTENT_PINNED));
        assert!(!is_legal_transition(CONTENT_TRANSFER_FINISHED, CONTENT_TRANSFER_STARTED));
        assert!(!is_legal_transition(CONTENT_PIECE_ASSIGNED, CONTENT_PINNED));
    }

    #[test]
    fn test_every_edge_endpoint_is_a_known_status() {
        for (from, to) in EDGES {
            assert!(ALL_CONTENT_STATUSES.contains(from), "unknown status {from}");
            assert!(ALL_CONTENT_STATUSES.contains(to), "unknown status {to}");
        }
    }

    #[test]
    fn test_reconcilable_statuses_are_non_terminal() {
        for status in RECONCILABLE_STATUSES {
            assert!(!is_terminal(status));
            assert!(needs_reconcile(status));
        }
        assert!(!needs_reconcile(CONTENT_SEALED));
    }
}
