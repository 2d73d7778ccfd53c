//! Resolving the calling operator.

use axum::http::HeaderMap;
use taskq_core::{OperatorId, QueueError};

/// Header carrying the operator id, set by the authenticating proxy in
/// front of the broker.
pub const OPERATOR_HEADER: &str = "x-operator-id";

pub trait CurrentOperatorProvider: Send + Sync {
    fn current_operator_id(&self, headers: &HeaderMap) -> Result<OperatorId, QueueError>;
}

/// Takes the operator id verbatim from [`OPERATOR_HEADER`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderOperatorProvider;

impl CurrentOperatorProvider for HeaderOperatorProvider {
    fn current_operator_id(&self, headers: &HeaderMap) -> Result<OperatorId, QueueError> {
        let value = headers
            .get(OPERATOR_HEADER)
            .ok_or_else(|| QueueError::Identity(format!("missing {OPERATOR_HEADER} header")))?;
        let operator_id = value
            .to_str()
            .map_err(|e| QueueError::Identity(format!("invalid {OPERATOR_HEADER} header: {e}")))?
            .trim();
        if operator_id.is_empty() {
            return Err(QueueError::Identity(format!("empty {OPERATOR_HEADER} header")));
        }
        Ok(operator_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_operator_read_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(OPERATOR_HEADER, HeaderValue::from_static(" op-7 "));
        let id = HeaderOperatorProvider.current_operator_id(&headers).unwrap();
        assert_eq!(id, "op-7");
    }

    #[test]
    fn test_missing_or_blank_header_is_identity_error() {
        let headers = HeaderMap::new();
        assert!(matches!(
            HeaderOperatorProvider.current_operator_id(&headers),
            Err(QueueError::Identity(_))
        ));

        let mut headers = HeaderMap::new();
        headers.insert(OPERATOR_HEADER, HeaderValue::from_static("  "));
        assert!(matches!(
            HeaderOperatorProvider.current_operator_id(&headers),
            Err(QueueError::Identity(_))
        ));
    }
}
