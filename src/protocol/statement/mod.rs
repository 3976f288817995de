//! The prepared-statement ("binary") protocol.
//!
//! <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_com_stmt_prepare.html>

mod execute;
mod fetch;
mod prepare;
mod prepare_ok;
mod row;

pub use execute::{CursorFlags, Execute};
pub use fetch::Fetch;
pub use prepare::{Prepare, StmtClose};
pub use prepare_ok::PrepareOk;
pub use row::BinaryRow;
