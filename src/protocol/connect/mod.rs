//! Packets exchanged during the connection phase.
//!
//! <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_connection_phase.html>

mod auth_more;
mod auth_switch;
mod handshake;
mod handshake_response;
mod ssl_request;

pub use auth_more::AuthMoreData;
pub use auth_switch::{AuthSwitchRequest, AuthSwitchResponse};
pub use handshake::Handshake;
pub use handshake_response::HandshakeResponse;
pub use ssl_request::SslRequest;
