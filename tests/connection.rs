use mariner::{Error, MySqlArguments, MySqlConnectOptions, MySqlSslMode};

mod common;

use common::{spawn_mock_server, AuthBehavior};

fn options_for(addr: std::net::SocketAddr) -> MySqlConnectOptions {
    MySqlConnectOptions::new()
        .host("127.0.0.1")
        .port(addr.port())
        .username("root")
        .password("password")
        .ssl_mode(MySqlSslMode::Disabled)
}

#[tokio::test]
async fn it_connects_and_selects() -> anyhow::Result<()> {
    let addr = spawn_mock_server(AuthBehavior::Accept).await;

    let mut conn = mariner::MySqlConnection::connect_with(&options_for(addr)).await?;

    assert_eq!(conn.server_version(), "5.5.5-10.5.8-MariaDB-1:10.5.8+maria~focal");

    let rows = conn.fetch_all("SELECT 1").await?;

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].len(), 1);
    assert_eq!(rows[0].get_i64(0)?, 1);
    assert_eq!(rows[0].get_i64("1")?, 1);

    conn.close().await?;

    Ok(())
}

#[tokio::test]
async fn it_survives_an_auth_switch() -> anyhow::Result<()> {
    let addr = spawn_mock_server(AuthBehavior::SwitchPlugin).await;

    // the mock asserts the re-hashed response is 20 bytes
    let mut conn = mariner::MySqlConnection::connect_with(&options_for(addr)).await?;

    assert!(conn.ping().await?);

    conn.close().await?;

    Ok(())
}

#[tokio::test]
async fn it_surfaces_access_denied_verbatim() {
    let addr = spawn_mock_server(AuthBehavior::Deny).await;

    let err = mariner::MySqlConnection::connect_with(&options_for(addr))
        .await
        .unwrap_err();

    match err {
        Error::Database(err) => {
            assert_eq!(err.code(), 1045);
            assert_eq!(err.sql_state(), Some("28000"));
            assert!(err.message().starts_with("Access denied"));
        }

        other => panic!("expected a database error, found {:?}", other),
    }
}

#[tokio::test]
async fn it_pings_and_reports_statistics() -> anyhow::Result<()> {
    let addr = spawn_mock_server(AuthBehavior::Accept).await;

    let mut conn = mariner::MySqlConnection::connect_with(&options_for(addr)).await?;

    assert!(conn.ping().await?);

    // the reply is opaque text, not OK/ERR framed
    let stats = conn.statistics().await?;
    assert!(stats.starts_with("Uptime: "));

    conn.close().await?;

    Ok(())
}

#[tokio::test]
async fn it_executes_a_prepared_statement_with_a_binary_row() -> anyhow::Result<()> {
    let addr = spawn_mock_server(AuthBehavior::Accept).await;

    let mut conn = mariner::MySqlConnection::connect_with(&options_for(addr)).await?;

    let statement = conn.prepare_statement("SELECT id, name FROM t WHERE id = ?").await?;
    assert_eq!(statement.parameters().len(), 1);
    assert_eq!(statement.columns().len(), 2);

    let mut arguments = MySqlArguments::new();
    arguments.add_i32(42);

    let rows = conn
        .fetch_all_with("SELECT id, name FROM t WHERE id = ?", arguments)
        .await?;

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_i64("id")?, 42);
    assert_eq!(rows[0].get_str("name")?, "x");

    conn.close().await?;

    Ok(())
}

#[tokio::test]
async fn it_fetches_rows_through_a_server_side_cursor() -> anyhow::Result<()> {
    let addr = spawn_mock_server(AuthBehavior::Accept).await;

    let options = options_for(addr).use_cursor_fetch(true).cursor_fetch_size(8);
    let mut conn = mariner::MySqlConnection::connect_with(&options).await?;

    let mut arguments = MySqlArguments::new();
    arguments.add_i32(42);

    let rows = conn
        .fetch_all_with("SELECT id, name FROM t WHERE id = ?", arguments)
        .await?;

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_i64("id")?, 42);

    conn.close().await?;

    Ok(())
}
