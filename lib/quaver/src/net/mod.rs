//! Transport plumbing: byte buffers, the encrypted packet codec, the socket facade and access point
//! resolution.

pub mod buffer;
pub mod packet;
pub mod resolve;
pub mod shared;
pub mod stream;
