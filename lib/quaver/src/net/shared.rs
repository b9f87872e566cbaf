use std::io;

pub type NetworkResult<T> = Result<T, NetworkError>;

#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Fatal(ErrorType),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorType {
    Eof,
    Timeout,
    Crypto,
    PayloadTooLarge,
    Malformed,
    Encoding,
    ChannelLimit,
    NotConnected,
    SequenceExhausted,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => NetworkError::Wait,
            io::ErrorKind::UnexpectedEof => NetworkError::Fatal(ErrorType::Eof),
            io::ErrorKind::TimedOut => NetworkError::Fatal(ErrorType::Timeout),
            kind => NetworkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetworkResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(NetworkError::Wait) => false,
            _ => true,
        }
    }
}

impl ErrorType {
    /// True for errors that mean the link itself is gone, as opposed to a rejected local operation.
    #[inline]
    pub fn is_link_failure(&self) -> bool {
        !matches!(
            self,
            ErrorType::ChannelLimit | ErrorType::PayloadTooLarge | ErrorType::Encoding
        )
    }
}
