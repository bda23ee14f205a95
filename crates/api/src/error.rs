use garden_kubehub::is_status;

/// Failures of member operations, shaped for the API layer.
#[derive(Debug, thiserror::Error)]
pub enum MemberError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unprocessable_entity: {0}")]
    UnprocessableEntity(String),
    /// Anything the cluster reports that we did not anticipate.
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error("internal: {0}")]
    Internal(String),
}

pub type MemberResult<T> = Result<T, MemberError>;

impl MemberError {
    /// HTTP status the API layer surfaces for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            MemberError::NotFound(_) => 404,
            MemberError::Conflict(_) => 409,
            MemberError::UnprocessableEntity(_) => 422,
            MemberError::Kube(kube::Error::Api(ae)) => ae.code,
            MemberError::Kube(_) | MemberError::Internal(_) => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            MemberError::NotFound(_) => true,
            MemberError::Kube(e) => is_status(e, 404),
            _ => false,
        }
    }

    pub(crate) fn kind_label(&self) -> &'static str {
        match self {
            MemberError::NotFound(_) => "not_found",
            MemberError::Conflict(_) => "conflict",
            MemberError::UnprocessableEntity(_) => "unprocessable_entity",
            MemberError::Kube(_) => "kube",
            MemberError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garden_kubehub::api_error;

    #[test]
    fn maps_to_http_status() {
        assert_eq!(MemberError::NotFound("x".into()).status_code(), 404);
        assert_eq!(MemberError::Conflict("x".into()).status_code(), 409);
        assert_eq!(MemberError::UnprocessableEntity("x".into()).status_code(), 422);
        assert_eq!(MemberError::Internal("x".into()).status_code(), 500);
        assert_eq!(MemberError::from(api_error(403, "Forbidden", "no")).status_code(), 403);
    }

    #[test]
    fn passthrough_404_counts_as_not_found() {
        assert!(MemberError::from(api_error(404, "NotFound", "gone")).is_not_found());
        assert!(!MemberError::Conflict("x".into()).is_not_found());
    }
}
