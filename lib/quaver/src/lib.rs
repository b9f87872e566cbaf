#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_arguments)]

pub mod channel;
pub mod command;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod login;
pub mod net;
pub mod request;
pub mod session;
pub mod worker;

pub use crate::config::{ClientConfig, SessionConfig};
pub use crate::error::{ConfigError, ErrorCode};
pub use crate::request::{Completion, RequestId, RequestInput, RequestKind, RequestOutput, RequestResult};
pub use crate::session::{ConnectionState, Session, SessionInfo};
