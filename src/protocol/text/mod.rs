//! Simple command packets and the text ("human readable") result protocol.
//!
//! <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_command_phase.html>

mod change_user;
mod command;
mod row;

pub use change_user::ChangeUser;
pub use command::{InitDb, Ping, Query, Quit, ResetConnection, SetOption, Statistics};
pub use row::TextRow;
