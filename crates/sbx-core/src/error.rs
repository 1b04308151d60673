#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("policy misconfigured: {0}")]
    PolicyMisconfig(String),

    #[error("invalid session id '{0}'")]
    InvalidSessionId(String),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("workspace capacity exceeded: {current}/{max} concurrent workspaces")]
    CapacityExceeded { current: u32, max: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_policy_misconfig() {
        let err = CoreError::PolicyMisconfig("blocked/allowed overlap on 'rm'".into());
        assert_eq!(
            err.to_string(),
            "policy misconfigured: blocked/allowed overlap on 'rm'"
        );
    }

    #[test]
    fn test_display_capacity_exceeded() {
        let err = CoreError::CapacityExceeded { current: 5, max: 5 };
        assert_eq!(
            err.to_string(),
            "workspace capacity exceeded: 5/5 concurrent workspaces"
        );
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CoreError>();
    }
}
