use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mariner::{Error, MySqlConnectOptions, MySqlSslMode, PoolOptions};

mod common;

use common::{spawn_mock_server, AuthBehavior};

fn options_for(addr: SocketAddr) -> MySqlConnectOptions {
    MySqlConnectOptions::new()
        .host("127.0.0.1")
        .port(addr.port())
        .username("root")
        .password("password")
        .ssl_mode(MySqlSslMode::Disabled)
}

/// Release happens on a spawned task; give it a moment.
async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);

    while Instant::now() < deadline {
        if condition() {
            return;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn a_released_connection_is_reused() -> anyhow::Result<()> {
    let addr = spawn_mock_server(AuthBehavior::Accept).await;

    let pool = PoolOptions::new()
        .max_connections(2)
        .connect_with(options_for(addr))
        .await?;

    {
        let mut conn = pool.acquire().await?;
        assert!(conn.ping().await?);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.num_idle(), 0);
    }

    wait_for("the connection to return", || pool.num_idle() == 1).await;

    // same physical connection comes back out
    let conn = pool.acquire().await?;
    assert_eq!(pool.size(), 1);
    drop(conn);

    pool.close().await;

    Ok(())
}

#[tokio::test]
async fn waiters_are_woken_in_fifo_order() -> anyhow::Result<()> {
    let addr = spawn_mock_server(AuthBehavior::Accept).await;

    let pool = PoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options_for(addr))
        .await?;

    let a = pool.acquire().await?;
    let b = pool.acquire().await?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<&'static str>();

    // C enqueues first
    let pool_c = pool.clone();
    let tx_c = tx.clone();
    tokio::spawn(async move {
        let conn = pool_c.acquire().await.unwrap();
        tx_c.send("c").unwrap();

        // hold briefly so D must wait for B, not C's connection
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(conn);
    });

    wait_for("C to start waiting", || pool.status().waiters == 1).await;

    // D enqueues second
    let pool_d = pool.clone();
    let tx_d = tx.clone();
    tokio::spawn(async move {
        let _conn = pool_d.acquire().await.unwrap();
        tx_d.send("d").unwrap();
    });

    wait_for("D to start waiting", || pool.status().waiters == 2).await;

    // releasing A must complete C (the older waiter) before D
    drop(a);
    assert_eq!(rx.recv().await, Some("c"));
    assert_eq!(pool.status().waiters, 1);

    // releasing B completes D
    drop(b);
    assert_eq!(rx.recv().await, Some("d"));

    pool.close().await;

    Ok(())
}

#[tokio::test]
async fn acquire_times_out_with_pool_status() -> anyhow::Result<()> {
    let addr = spawn_mock_server(AuthBehavior::Accept).await;

    let pool = PoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_millis(100))
        .connect_with(options_for(addr))
        .await?;

    let _held = pool.acquire().await?;

    let err = pool.acquire().await.unwrap_err();

    match err {
        Error::PoolTimedOut { after, status } => {
            assert_eq!(after, Duration::from_millis(100));
            assert_eq!(status.size, 1);
            assert_eq!(status.idle, 0);
        }

        other => panic!("expected PoolTimedOut, found {:?}", other),
    }

    assert_eq!(pool.metrics().acquire_timeouts, 1);

    pool.close().await;

    Ok(())
}

#[tokio::test]
async fn the_circuit_breaker_trips_after_consecutive_failures() -> anyhow::Result<()> {
    // bind a port and immediately free it so connections are refused
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?
    };

    let pool = PoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(1))
        .breaker_max_failures(3)
        .breaker_reset_timeout(Duration::from_millis(200))
        .connect_with(options_for(addr))
        .await?;

    for _ in 0..3 {
        let err = pool.acquire().await.unwrap_err();
        assert!(
            !matches!(err, Error::CircuitOpen { .. }),
            "circuit must stay closed while counting failures"
        );
    }

    // fourth attempt fails fast without touching the network
    let started = Instant::now();
    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }));
    assert!(started.elapsed() < Duration::from_millis(50));

    // after the reset timeout one trial is allowed; it fails and the
    // circuit re-opens with a longer timeout
    tokio::time::sleep(Duration::from_millis(250)).await;

    let err = pool.acquire().await.unwrap_err();
    assert!(!matches!(err, Error::CircuitOpen { .. }));

    let err = pool.acquire().await.unwrap_err();
    match err {
        Error::CircuitOpen { retry_after } => {
            assert!(retry_after > Duration::from_millis(200));
        }

        other => panic!("expected CircuitOpen, found {:?}", other),
    }

    pool.close().await;

    Ok(())
}

#[tokio::test]
async fn a_closed_pool_fails_new_and_queued_acquires() -> anyhow::Result<()> {
    let addr = spawn_mock_server(AuthBehavior::Accept).await;

    let pool = PoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options_for(addr))
        .await?;

    let held = pool.acquire().await?;

    let pool_waiter = pool.clone();
    let waiter = tokio::spawn(async move { pool_waiter.acquire().await });

    wait_for("the waiter to enqueue", || pool.status().waiters == 1).await;

    let pool_closer = pool.clone();
    let closer = tokio::spawn(async move { pool_closer.close().await });

    // the queued waiter is failed with PoolClosed
    let result = waiter.await?;
    assert!(matches!(result, Err(Error::PoolClosed)));

    // the held connection is closed on return
    drop(held);
    closer.await?;

    assert!(pool.is_closed());
    assert_eq!(pool.size(), 0);

    assert!(matches!(pool.acquire().await, Err(Error::PoolClosed)));

    Ok(())
}

#[tokio::test]
async fn the_minimum_is_opened_eagerly_and_maintained() -> anyhow::Result<()> {
    let addr = spawn_mock_server(AuthBehavior::Accept).await;

    let pool = PoolOptions::new()
        .min_connections(2)
        .max_connections(5)
        .maintenance_interval(Duration::from_millis(50))
        .connect_with(options_for(addr))
        .await?;

    assert_eq!(pool.size(), 2);
    assert_eq!(pool.num_idle(), 2);

    // detaching removes a connection from the pool entirely; the
    // housekeeper replaces it
    let conn = pool.acquire().await?.detach();
    drop(conn);

    wait_for("the housekeeper to replenish", || pool.size() == 2).await;

    pool.close().await;

    Ok(())
}

#[tokio::test]
async fn idle_connections_are_trimmed_after_the_idle_timeout() -> anyhow::Result<()> {
    let addr = spawn_mock_server(AuthBehavior::Accept).await;

    let pool = PoolOptions::new()
        .min_connections(0)
        .max_connections(4)
        .idle_timeout(Duration::from_millis(50))
        .maintenance_interval(Duration::from_millis(50))
        .connect_with(options_for(addr))
        .await?;

    drop(pool.acquire().await?);
    wait_for("the connection to return", || pool.num_idle() == 1).await;

    wait_for("the idle connection to be trimmed", || pool.size() == 0).await;

    pool.close().await;

    Ok(())
}

#[tokio::test]
async fn stale_connections_are_validated_on_acquire() -> anyhow::Result<()> {
    let addr = spawn_mock_server(AuthBehavior::Accept).await;

    let pool = PoolOptions::new()
        .max_connections(1)
        // everything is immediately stale
        .keepalive_time(Duration::ZERO)
        .connect_with(options_for(addr))
        .await?;

    drop(pool.acquire().await?);
    wait_for("the connection to return", || pool.num_idle() == 1).await;

    drop(pool.acquire().await?);

    assert!(pool.metrics().validations >= 1);

    pool.close().await;

    Ok(())
}

#[tokio::test]
async fn leaks_are_detected_but_not_interrupted() -> anyhow::Result<()> {
    let addr = spawn_mock_server(AuthBehavior::Accept).await;

    let pool = PoolOptions::new()
        .max_connections(1)
        .leak_detection_threshold(Duration::from_millis(50))
        .connect_with(options_for(addr))
        .await?;

    let mut conn = pool.acquire().await?;

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(pool.metrics().leaks_detected, 1);

    // the "leaked" connection is still alive and usable
    assert!(conn.ping().await?);

    drop(conn);
    pool.close().await;

    Ok(())
}

#[tokio::test]
async fn max_lifetime_condemns_connections_in_use() -> anyhow::Result<()> {
    let addr = spawn_mock_server(AuthBehavior::Accept).await;

    let pool = PoolOptions::new()
        .max_connections(1)
        .max_lifetime(Duration::from_millis(50))
        .maintenance_interval(Duration::from_millis(50))
        .connect_with(options_for(addr))
        .await?;

    let conn = pool.acquire().await?;

    // long enough for the housekeeper to see the expired, in-use connection
    tokio::time::sleep(Duration::from_millis(200)).await;

    // on release it is closed, not parked
    drop(conn);
    wait_for("the expired connection to be closed", || pool.size() == 0).await;

    assert!(pool.metrics().connections_closed >= 1);

    pool.close().await;

    Ok(())
}
