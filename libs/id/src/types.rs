//! Typed ID definitions.

use crate::{define_id, define_seq_id};

// =============================================================================
// Server-minted entities
// =============================================================================

define_id!(HistoryId, "oph");
define_id!(GroupId, "grp");
define_id!(AgentId, "agent");

// =============================================================================
// Sequence ids
// =============================================================================

define_seq_id!(ResourceId);
define_seq_id!(RequestId);

// =============================================================================
// Tests
// =============================================================================
