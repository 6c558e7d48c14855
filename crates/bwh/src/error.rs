#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Api(#[from] kiwivm_api::Error),

    #[error(transparent)]
    Invalid(#[from] kiwivm_api::ValidationError),

    #[error(transparent)]
    Config(#[from] bwh_config::Error),

    #[error("{0}")]
    Usage(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;

impl CliError {
    /// Follow-up advice for errors a user can act on.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Api(e) if e.is_locked() => {
                Some("another operation is running on this VPS; retry shortly")
            }
            Self::Api(e) if e.is_auth_failure() => {
                Some("check the API key and VEID with `bwh node show`")
            }
            Self::Api(kiwivm_api::Error::MigrationTimeout(_)) => Some(
                "the migration may still be running; check later with `bwh migrate locations`",
            ),
            Self::Config(bwh_config::Error::NoInstances) => Some("add one with `bwh node add <name>`"),
            Self::Config(bwh_config::Error::NoDefault { .. }) => {
                Some("pass --instance or run `bwh node set-default <name>`")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use kiwivm_api::{ApiError, AUTH_FAILURE_CODE, LOCKED_CODE};

    use super::*;

    #[test]
    fn hints_follow_error_kind() {
        let locked = CliError::from(kiwivm_api::Error::from(ApiError::new(LOCKED_CODE, "locked")));
        assert!(locked.hint().unwrap().contains("retry"));

        let auth = CliError::from(kiwivm_api::Error::from(ApiError::new(AUTH_FAILURE_CODE, "")));
        assert!(auth.hint().unwrap().contains("API key"));

        let other = CliError::from(kiwivm_api::Error::from(ApiError::new(1, "nope")));
        assert!(other.hint().is_none());
        assert!(CliError::Cancelled.hint().is_none());
    }
}
