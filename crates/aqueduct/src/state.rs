/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Request lifecycle state machine.
//!
//! Every request moves monotonically forward along the processing pipeline,
//! with four terminal side states reachable from any in-flight state:
//!
//! ```text
//! Received -> Parsing -> Validating -> Enriching -> ProcessingAttachments
//!     -> Mapping -> CallingDownstream -> BuildingResponse -> Completed
//!
//! any in-flight state -> Error | Failed | Cancelled | ValidationFailed
//! ```
//!
//! Transitions are validated here and applied as single atomic updates by
//! the request store. Repeating a transition with identical arguments is a
//! no-op, which makes stage handlers safe to retry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a request record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Intake accepted the submission and created the record.
    Received,
    /// Payload is being parsed into its structured form.
    Parsing,
    /// Structural and business validation is running.
    Validating,
    /// Reference data is being attached to the request.
    Enriching,
    /// Attachments are being scanned and staged.
    ProcessingAttachments,
    /// The request is being mapped to the downstream target format.
    Mapping,
    /// The downstream integration call is in flight.
    CallingDownstream,
    /// The final response artifact is being assembled.
    BuildingResponse,
    /// Terminal: a final decision was produced.
    Completed,
    /// Terminal: a stage failed with a recoverable-looking error that was
    /// not retried to success.
    Error,
    /// Terminal: a stage failed permanently.
    Failed,
    /// Terminal: the request was cancelled.
    Cancelled,
    /// Terminal: the payload failed validation.
    ValidationFailed,
}

impl RequestStatus {
    /// String form stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Received => "Received",
            RequestStatus::Parsing => "Parsing",
            RequestStatus::Validating => "Validating",
            RequestStatus::Enriching => "Enriching",
            RequestStatus::ProcessingAttachments => "ProcessingAttachments",
            RequestStatus::Mapping => "Mapping",
            RequestStatus::CallingDownstream => "CallingDownstream",
            RequestStatus::BuildingResponse => "BuildingResponse",
            RequestStatus::Completed => "Completed",
            RequestStatus::Error => "Error",
            RequestStatus::Failed => "Failed",
            RequestStatus::Cancelled => "Cancelled",
            RequestStatus::ValidationFailed => "ValidationFailed",
        }
    }

    /// Parses the stored string form back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Received" => Some(RequestStatus::Received),
            "Parsing" => Some(RequestStatus::Parsing),
            "Validating" => Some(RequestStatus::Validating),
            "Enriching" => Some(RequestStatus::Enriching),
            "ProcessingAttachments" => Some(RequestStatus::ProcessingAttachments),
            "Mapping" => Some(RequestStatus::Mapping),
            "CallingDownstream" => Some(RequestStatus::CallingDownstream),
            "BuildingResponse" => Some(RequestStatus::BuildingResponse),
            "Completed" => Some(RequestStatus::Completed),
            "Error" => Some(RequestStatus::Error),
            "Failed" => Some(RequestStatus::Failed),
            "Cancelled" => Some(RequestStatus::Cancelled),
            "ValidationFailed" => Some(RequestStatus::ValidationFailed),
            _ => None,
        }
    }

    /// True for states from which no further pipeline transition occurs.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed
                | RequestStatus::Error
                | RequestStatus::Failed
                | RequestStatus::Cancelled
                | RequestStatus::ValidationFailed
        )
    }

    /// Position of a pipeline status in forward order. Terminal side states
    /// have no position.
    fn pipeline_index(&self) -> Option<usize> {
        match self {
            RequestStatus::Received => Some(0),
            RequestStatus::Parsing => Some(1),
            RequestStatus::Validating => Some(2),
            RequestStatus::Enriching => Some(3),
            RequestStatus::ProcessingAttachments => Some(4),
            RequestStatus::Mapping => Some(5),
            RequestStatus::CallingDownstream => Some(6),
            RequestStatus::BuildingResponse => Some(7),
            RequestStatus::Completed => Some(8),
            _ => None,
        }
    }

    /// Whether a transition from `self` to `next` is legal.
    ///
    /// Forward movement along the pipeline is allowed (including skipping
    /// stages a deployment does not run). Terminal side states are reachable
    /// from any in-flight state. Nothing leaves a terminal state, except
    /// that re-applying the identical terminal status is tolerated so that
    /// repeated updates stay idempotent.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        match (self.pipeline_index(), next.pipeline_index()) {
            (Some(from), Some(to)) => to > from,
            _ => false,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline stage position recorded alongside the status.
///
/// The status says what the request is doing right now; the stage pair
/// (`last_stage`, `next_stage`) says where it sits in the pipeline, which is
/// what the outbox message for the next hop is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    Intake,
    Parse,
    Validate,
    Enrich,
    Attachments,
    Map,
    Downstream,
    Respond,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Intake => "intake",
            PipelineStage::Parse => "parse",
            PipelineStage::Validate => "validate",
            PipelineStage::Enrich => "enrich",
            PipelineStage::Attachments => "attachments",
            PipelineStage::Map => "map",
            PipelineStage::Downstream => "downstream",
            PipelineStage::Respond => "respond",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "intake" => Some(PipelineStage::Intake),
            "parse" => Some(PipelineStage::Parse),
            "validate" => Some(PipelineStage::Validate),
            "enrich" => Some(PipelineStage::Enrich),
            "attachments" => Some(PipelineStage::Attachments),
            "map" => Some(PipelineStage::Map),
            "downstream" => Some(PipelineStage::Downstream),
            "respond" => Some(PipelineStage::Respond),
            _ => None,
        }
    }

    /// The stage that follows this one, or `None` at the end of the line.
    pub fn next(&self) -> Option<PipelineStage> {
        match self {
            PipelineStage::Intake => Some(PipelineStage::Parse),
            PipelineStage::Parse => Some(PipelineStage::Validate),
            PipelineStage::Validate => Some(PipelineStage::Enrich),
            PipelineStage::Enrich => Some(PipelineStage::Attachments),
            PipelineStage::Attachments => Some(PipelineStage::Map),
            PipelineStage::Map => Some(PipelineStage::Downstream),
            PipelineStage::Downstream => Some(PipelineStage::Respond),
            PipelineStage::Respond => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        let all = [
            RequestStatus::Received,
            RequestStatus::Parsing,
            RequestStatus::Validating,
            RequestStatus::Enriching,
            RequestStatus::ProcessingAttachments,
            RequestStatus::Mapping,
            RequestStatus::CallingDownstream,
            RequestStatus::BuildingResponse,
            RequestStatus::Completed,
            RequestStatus::Error,
            RequestStatus::Failed,
            RequestStatus::Cancelled,
            RequestStatus::ValidationFailed,
        ];
        for status in all {
            assert_eq!(RequestStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RequestStatus::parse("Bogus"), None);
    }

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(RequestStatus::Received.can_transition_to(RequestStatus::Parsing));
        assert!(RequestStatus::Parsing.can_transition_to(RequestStatus::Validating));
        // Skipping stages is forward movement
        assert!(RequestStatus::Received.can_transition_to(RequestStatus::Mapping));
        assert!(RequestStatus::BuildingResponse.can_transition_to(RequestStatus::Completed));
    }

    #[test]
    fn test_backward_transitions_rejected() {
        assert!(!RequestStatus::Validating.can_transition_to(RequestStatus::Parsing));
        assert!(!RequestStatus::Completed.can_transition_to(RequestStatus::Received));
    }

    #[test]
    fn test_terminal_side_states_reachable_from_in_flight() {
        for status in [
            RequestStatus::Received,
            RequestStatus::Enriching,
            RequestStatus::CallingDownstream,
        ] {
            assert!(status.can_transition_to(RequestStatus::Error));
            assert!(status.can_transition_to(RequestStatus::Failed));
            assert!(status.can_transition_to(RequestStatus::Cancelled));
            assert!(status.can_transition_to(RequestStatus::ValidationFailed));
        }
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        assert!(!RequestStatus::Cancelled.can_transition_to(RequestStatus::Parsing));
        assert!(!RequestStatus::Failed.can_transition_to(RequestStatus::Completed));
        // Identical re-application stays legal for idempotent retries
        assert!(RequestStatus::Cancelled.can_transition_to(RequestStatus::Cancelled));
    }

    #[test]
    fn test_stage_ordering() {
        let mut stage = PipelineStage::Intake;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen.len(), 8);
        assert_eq!(stage, PipelineStage::Respond);
    }

    #[test]
    fn test_stage_round_trip() {
        for stage in [
            PipelineStage::Intake,
            PipelineStage::Parse,
            PipelineStage::Validate,
            PipelineStage::Enrich,
            PipelineStage::Attachments,
            PipelineStage::Map,
            PipelineStage::Downstream,
            PipelineStage::Respond,
        ] {
            assert_eq!(PipelineStage::parse(stage.as_str()), Some(stage));
        }
    }
}
