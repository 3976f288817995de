//! The connection phase: capability exchange, optional TLS upgrade, and the
//! authentication state machine.
//!
//! The server opens with a `Handshake`; the client answers with an
//! `SSLRequest` (if upgrading) and a `HandshakeResponse`, then loops on
//! authentication packets until OK or ERR. `COM_CHANGE_USER` re-enters the
//! same loop mid-connection.
//!
//! <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_connection_phase.html>

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use hashlink::lru_cache::LruCache;

use crate::auth::{self, encrypt_with_public_key, AuthPlugin, Sha256Password};
use crate::connection::{MySqlConnection, MySqlStream, SessionState};
use crate::connection::{COLLATE_UTF8MB4_UNICODE_CI, MAX_PACKET_SIZE};
use crate::error::{Error, Result};
use crate::io::ProtocolDecode;
use crate::options::{MySqlConnectOptions, MySqlSslMode};
use crate::protocol::connect::{
    AuthMoreData, AuthSwitchRequest, AuthSwitchResponse, Handshake, HandshakeResponse, SslRequest,
};
use crate::protocol::response::OkPacket;
use crate::protocol::text::ChangeUser;
use crate::protocol::{Capabilities, Status};

impl MySqlConnection {
    pub(crate) async fn establish(options: &MySqlConnectOptions) -> Result<Self> {
        let mut stream = MySqlStream::connect(options).await?;

        // the server begins the conversation
        let handshake_payload = stream.recv_packet().await?;
        stream.maybe_err(&handshake_payload)?;
        let handshake = Handshake::decode(handshake_payload)?;

        let server_capabilities = handshake.server_capabilities;

        // declare what we can do, then narrow to what we both can do;
        // after the handshake response is on the wire this set is frozen
        let mut capabilities = Capabilities::PROTOCOL_41
            | Capabilities::IGNORE_SPACE
            | Capabilities::FOUND_ROWS
            | Capabilities::LONG_FLAG
            | Capabilities::TRANSACTIONS
            | Capabilities::SECURE_CONNECTION
            | Capabilities::DEPRECATE_EOF
            | Capabilities::PLUGIN_AUTH
            | Capabilities::PLUGIN_AUTH_LENENC_DATA
            | Capabilities::CONNECT_ATTRS
            | Capabilities::SESSION_TRACK
            | Capabilities::MULTI_RESULTS
            | Capabilities::PS_MULTI_RESULTS;

        if options.database.is_some() {
            capabilities |= Capabilities::CONNECT_WITH_DB;
        }

        if !matches!(options.ssl_mode, MySqlSslMode::Disabled) {
            capabilities |= Capabilities::SSL;
        }

        if !server_capabilities.contains(Capabilities::PROTOCOL_41) {
            return Err(Error::Unsupported(
                "server does not support the 4.1 protocol".into(),
            ));
        }

        capabilities &= server_capabilities;
        capabilities |= Capabilities::PROTOCOL_41;

        // MariaDB (no MYSQL bit) reads the extended capability word; keep
        // ours aligned with what the server expects
        capabilities |= server_capabilities & Capabilities::MYSQL;

        stream.capabilities = capabilities;
        stream.server_status = handshake.status;

        maybe_upgrade_tls(&mut stream, options).await?;

        // authentication begins against the plugin the server suggested,
        // unless the configuration pins one
        let plugin_name = options
            .auth_plugin_override
            .as_deref()
            .or(handshake.auth_plugin.as_deref())
            .unwrap_or("mysql_native_password");

        let plugin = auth::resolve(options, plugin_name)?;
        let scramble = handshake.auth_plugin_data.clone();
        let password = options.password.as_deref().unwrap_or_default();

        let auth_response = initial_auth_response(&*plugin, password, &scramble, &stream, options)?;

        let awaiting_public_key = plugin.name() == "sha256_password"
            && auth_response == [Sha256Password::REQUEST_PUBLIC_KEY];

        stream.write_packet(HandshakeResponse {
            max_packet_size: MAX_PACKET_SIZE,
            collation: COLLATE_UTF8MB4_UNICODE_CI,
            username: &options.username,
            database: options.database.as_deref(),
            auth_plugin: Some(plugin.name()),
            auth_response: Some(&auth_response),
        });
        stream.flush().await?;

        authenticate(&mut stream, options, plugin, scramble, awaiting_public_key).await?;

        Ok(MySqlConnection {
            stream,
            connection_id: handshake.connection_id,
            server_version: handshake.server_version,
            server_capabilities,
            cache_statement: LruCache::new(options.statement_cache_capacity.max(1)),
            scratch_row_columns: Arc::new(Vec::new()),
            scratch_row_column_names: Arc::new(HashMap::new()),
            session: SessionState {
                auto_commit: handshake.status.contains(Status::SERVER_STATUS_AUTOCOMMIT),
                read_only: false,
                isolation_level: None,
                schema: options.database.clone(),
            },
            connect_database: options.database.clone(),
            use_cursor_fetch: options.use_cursor_fetch,
            cursor_fetch_size: options.cursor_fetch_size,
            collation: COLLATE_UTF8MB4_UNICODE_CI,
        })
    }

    /// Re-authenticate as a different user (`COM_CHANGE_USER`), resetting
    /// all session state on the server.
    ///
    /// Credentials, database, and any external auth plugins are taken from
    /// `options`; the transport (including any TLS upgrade) is kept.
    pub async fn change_user(&mut self, options: &MySqlConnectOptions) -> Result<()> {
        self.stream.wait_until_ready().await?;

        // there is no scramble yet; the server answers with an
        // AuthSwitchRequest carrying a fresh one
        self.stream
            .send_packet(ChangeUser {
                username: &options.username,
                database: options.database.as_deref(),
                collation: u16::from(self.collation),
                auth_plugin: Some("mysql_native_password"),
                auth_response: None,
            })
            .await?;

        let plugin = auth::resolve(options, "mysql_native_password")?;

        authenticate(&mut self.stream, options, plugin, Bytes::new(), false).await?;

        self.cache_statement.clear();
        self.connect_database = options.database.clone();
        self.session = SessionState {
            auto_commit: true,
            read_only: false,
            isolation_level: None,
            schema: options.database.clone(),
        };

        Ok(())
    }
}

/// Drive the authentication exchange to OK or failure. Shared between the
/// initial connect and `COM_CHANGE_USER`.
async fn authenticate(
    stream: &mut MySqlStream,
    options: &MySqlConnectOptions,
    mut plugin: Arc<dyn AuthPlugin>,
    mut scramble: Bytes,
    mut awaiting_public_key: bool,
) -> Result<()> {
    let password = options.password.as_deref().unwrap_or_default();

    loop {
        let payload = stream.recv_packet().await?;

        // an ERR here is terminal and carries the server message, SQLSTATE,
        // and vendor code through verbatim
        stream.maybe_err(&payload)?;

        match payload[0] {
            0x00 => {
                // authenticated
                let ok = OkPacket::decode(payload)?;
                stream.server_status = ok.status;
                return Ok(());
            }

            0xfe => {
                let switch = AuthSwitchRequest::decode(payload)?;

                plugin = auth::resolve(options, &switch.plugin)?;
                scramble = switch.data.clone();

                let response =
                    initial_auth_response(&*plugin, password, &scramble, stream, options)?;

                // subsequent public-key steps hash against the new scramble
                awaiting_public_key = plugin.name() == "sha256_password"
                    && response == [Sha256Password::REQUEST_PUBLIC_KEY];

                stream.write_packet(AuthSwitchResponse(response));
                stream.flush().await?;
            }

            0x01 => {
                let more = AuthMoreData::decode(payload)?;

                if awaiting_public_key {
                    // the payload is the server's public key in PEM
                    let encrypted = encrypt_with_public_key(password, &scramble, &more.data)?;
                    stream.write_packet(&encrypted[..]);
                    stream.flush().await?;

                    awaiting_public_key = false;
                    continue;
                }

                match (plugin.name(), more.data.first().copied()) {
                    ("caching_sha2_password", Some(AuthMoreData::FAST_AUTH_SUCCESS)) => {
                        // the scramble hash matched the server's cache; an
                        // OK packet follows
                    }

                    ("caching_sha2_password", Some(AuthMoreData::PERFORM_FULL_AUTH)) => {
                        full_auth(stream, password, options, &mut awaiting_public_key).await?;
                    }

                    ("caching_sha2_password", other) => {
                        return Err(err_auth!(
                            "unexpected caching_sha2_password status {:02x?}",
                            other
                        ));
                    }

                    // other plugins treat extra data as progress
                    _ => {}
                }
            }

            id => {
                return Err(err_auth!(
                    "unexpected packet 0x{:02x} during authentication",
                    id
                ));
            }
        }
    }
}

/// The first authentication payload, before any server follow-ups.
///
/// Most plugins hash the password against the scramble. `sha256_password`
/// is channel-dependent: over TLS the cleartext password (NUL terminated)
/// is safe and sufficient, over plaintext the client must ask for the
/// server's RSA public key first.
fn initial_auth_response(
    plugin: &dyn AuthPlugin,
    password: &str,
    scramble: &[u8],
    stream: &MySqlStream,
    options: &MySqlConnectOptions,
) -> Result<Vec<u8>> {
    if plugin.requires_confidentiality() && !stream.is_tls() {
        return Err(err_auth!(
            "authentication plugin {} requires a TLS connection",
            plugin.name()
        ));
    }

    if plugin.name() == "sha256_password" {
        if stream.is_tls() {
            let mut response = Vec::with_capacity(password.len() + 1);
            response.extend_from_slice(password.as_bytes());
            response.push(0);
            return Ok(response);
        }

        if !options.allow_public_key_retrieval {
            return Err(err_auth!(
                "sha256_password over an insecure connection requires \
                 allow_public_key_retrieval or TLS"
            ));
        }
    }

    plugin.hash_password(password, scramble)
}

/// `caching_sha2_password` full authentication: the server's cache missed,
/// so the actual password must travel. Over TLS it goes in the clear
/// (NUL terminated); over plaintext we request the server's RSA key (0x02)
/// and the reply is handled by the caller via `awaiting_public_key`.
async fn full_auth(
    stream: &mut MySqlStream,
    password: &str,
    options: &MySqlConnectOptions,
    awaiting_public_key: &mut bool,
) -> Result<()> {
    if stream.is_tls() {
        let mut response = Vec::with_capacity(password.len() + 1);
        response.extend_from_slice(password.as_bytes());
        response.push(0);

        stream.write_packet(&response[..]);
        stream.flush().await?;

        return Ok(());
    }

    if !options.allow_public_key_retrieval {
        return Err(err_auth!(
            "caching_sha2_password full authentication requires TLS or \
             allow_public_key_retrieval"
        ));
    }

    // request the server's RSA public key
    stream.write_packet(&[0x02_u8][..]);
    stream.flush().await?;

    *awaiting_public_key = true;

    Ok(())
}

async fn maybe_upgrade_tls(
    stream: &mut MySqlStream,
    options: &MySqlConnectOptions,
) -> Result<()> {
    match options.ssl_mode {
        MySqlSslMode::Disabled => {}

        MySqlSslMode::Preferred => {
            // best effort; stay in plaintext if the server cannot
            if stream.capabilities.contains(Capabilities::SSL) {
                upgrade(stream, options).await?;
            }
        }

        MySqlSslMode::Required | MySqlSslMode::VerifyCa | MySqlSslMode::VerifyIdentity => {
            if !stream.capabilities.contains(Capabilities::SSL) {
                return Err(Error::Tls("server does not support TLS".into()));
            }

            upgrade(stream, options).await?;
        }
    }

    Ok(())
}

async fn upgrade(stream: &mut MySqlStream, options: &MySqlConnectOptions) -> Result<()> {
    // the SSL request continues the handshake sequence; the server sends no
    // reply and waits for the TLS client hello
    stream.write_packet(SslRequest {
        max_packet_size: MAX_PACKET_SIZE,
        collation: COLLATE_UTF8MB4_UNICODE_CI,
    });
    stream.flush().await?;

    stream.upgrade_tls(options).await
}
