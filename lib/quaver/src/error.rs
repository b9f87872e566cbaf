//! Public error taxonomy. These are the only errors that cross from the network thread to the
//! application, as the result of a request.
use crate::login::message::Rejection;
use crate::login::LoginError;
use thiserror::Error;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum ErrorCode {
    #[error("unable to contact server")]
    UnableToContactServer,
    #[error("client upgrade required")]
    UpgradeRequired,
    #[error("user not found")]
    UserNotFound,
    #[error("bad username or password")]
    BadCredentials,
    #[error("user is banned")]
    Banned,
    #[error("account details must be completed")]
    NeedsDetails,
    #[error("account country does not match")]
    CountryMismatch,
    #[error("login rejected by server")]
    LoginRejected,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("already logged in")]
    AlreadyLoggedIn,
    #[error("connection to the server was lost")]
    Disconnected,
    #[error("login aborted")]
    LoginAborted,
    #[error("request cannot be encoded")]
    InvalidRequest,
    #[error("protocol error")]
    Protocol,
}

impl From<Rejection> for ErrorCode {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::UpgradeRequired => ErrorCode::UpgradeRequired,
            Rejection::UserNotFound => ErrorCode::UserNotFound,
            Rejection::Banned => ErrorCode::Banned,
            Rejection::NeedsDetails => ErrorCode::NeedsDetails,
            Rejection::CountryMismatch => ErrorCode::CountryMismatch,
            Rejection::Other(_) => ErrorCode::LoginRejected,
        }
    }
}

impl From<&LoginError> for ErrorCode {
    fn from(error: &LoginError) -> Self {
        match error {
            LoginError::Dns(_) | LoginError::NoServersLeft | LoginError::Network(_) => {
                ErrorCode::UnableToContactServer
            }
            LoginError::Rejected(rejection) => (*rejection).into(),
            LoginError::BadPassword => ErrorCode::BadCredentials,
            LoginError::Aborted => ErrorCode::LoginAborted,
            LoginError::InvalidUsername => ErrorCode::InvalidRequest,
            LoginError::Malformed
            | LoginError::UnsupportedPuzzle(_)
            | LoginError::PuzzleTooHard(_)
            | LoginError::KeyGeneration => ErrorCode::Protocol,
        }
    }
}

/// Failure to load or validate the client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read or write configuration: {0}")]
    File(#[from] serdeconv::Error),
    #[error("invalid access point `{0}`, expected host:port")]
    InvalidServer(String),
    #[error("invalid setting `{0}`")]
    InvalidSetting(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::shared::ErrorType;

    #[test]
    fn test_login_error_mapping() {
        assert_eq!(
            ErrorCode::from(&LoginError::Rejected(Rejection::UserNotFound)),
            ErrorCode::UserNotFound
        );
        assert_eq!(
            ErrorCode::from(&LoginError::Rejected(Rejection::Other(0x0e))),
            ErrorCode::LoginRejected
        );
        assert_eq!(
            ErrorCode::from(&LoginError::Network(ErrorType::Timeout)),
            ErrorCode::UnableToContactServer
        );
        assert_eq!(ErrorCode::from(&LoginError::BadPassword), ErrorCode::BadCredentials);
        assert_eq!(ErrorCode::from(&LoginError::Aborted), ErrorCode::LoginAborted);
        assert_eq!(ErrorCode::from(&LoginError::PuzzleTooHard(32)), ErrorCode::Protocol);
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorCode::UserNotFound.to_string(), "user not found");
        assert_eq!(
            ConfigError::InvalidServer("ap".to_string()).to_string(),
            "invalid access point `ap`, expected host:port"
        );
    }
}
