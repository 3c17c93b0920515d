use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Candidate id must not be empty")]
    EmptyCandidateId,

    #[error("Invalid candidate id {id:?}: {reason}")]
    InvalidCandidateId { id: String, reason: String },

    #[error("Duplicate candidate id: {0}")]
    DuplicateCandidate(String),

    #[error("Candidate {workflow_id} depends on unknown candidate {dependency}")]
    UnknownDependency {
        workflow_id: String,
        dependency: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CoreError::UnknownDependency {
            workflow_id: "enforcement-snapshot".to_string(),
            dependency: "missing".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("enforcement-snapshot"));
        assert!(message.contains("missing"));
    }

    #[test]
    fn test_duplicate_display() {
        let error = CoreError::DuplicateCandidate("policy-overview".to_string());
        assert_eq!(error.to_string(), "Duplicate candidate id: policy-overview");
    }
}
