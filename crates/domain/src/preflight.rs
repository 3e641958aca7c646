//! Preflight result shape — produced once per turn, consumed by the
//! orchestrator and the prompt assembler.

use serde::{Deserialize, Serialize};

use crate::types::RetrievedChunk;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Boundary signals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A classifier tag for a kind of attempted manipulation. Distinct from
/// a terminate verdict — signals steer the prompt, they never gate the
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundarySignal {
    PromptProbing,
    IdentityBreaking,
    ExtractionFraming,
    BoundaryErosion,
    AdversarialStress,
}

impl BoundarySignal {
    pub fn as_str(self) -> &'static str {
        match self {
            BoundarySignal::PromptProbing => "prompt_probing",
            BoundarySignal::IdentityBreaking => "identity_breaking",
            BoundarySignal::ExtractionFraming => "extraction_framing",
            BoundarySignal::BoundaryErosion => "boundary_erosion",
            BoundarySignal::AdversarialStress => "adversarial_stress",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation phase
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the conversation is heading, per the state classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    #[default]
    Active,
    WrappingUp,
    OffTopic,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PreflightResult
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory, per-turn result of the three preflight branches.
#[derive(Debug, Clone, Default)]
pub struct PreflightResult {
    pub boundary_signal: Option<BoundarySignal>,
    pub terminate: bool,
    pub in_scope: bool,
    pub retrieved_chunks: Vec<RetrievedChunk>,
    pub conversation_state: ConversationPhase,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_signal_serde_matches_wire_tags() {
        let sig: BoundarySignal = serde_json::from_str("\"prompt_probing\"").unwrap();
        assert_eq!(sig, BoundarySignal::PromptProbing);
        assert_eq!(
            serde_json::to_string(&BoundarySignal::AdversarialStress).unwrap(),
            "\"adversarial_stress\""
        );
    }

    #[test]
    fn phase_defaults_to_active() {
        assert_eq!(ConversationPhase::default(), ConversationPhase::Active);
        let phase: ConversationPhase = serde_json::from_str("\"wrapping_up\"").unwrap();
        assert_eq!(phase, ConversationPhase::WrappingUp);
    }

    #[test]
    fn default_result_is_the_safe_default() {
        let r = PreflightResult::default();
        assert!(r.boundary_signal.is_none());
        assert!(!r.terminate);
        assert!(!r.in_scope);
        assert!(r.retrieved_chunks.is_empty());
        assert_eq!(r.conversation_state, ConversationPhase::Active);
    }
}
