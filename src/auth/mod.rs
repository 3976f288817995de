//! Pluggable authentication.
//!
//! The server names a plugin in its initial handshake (and may switch to a
//! different one mid-exchange); the driver resolves that name against any
//! externally registered [`AuthPlugin`]s first, then its built-ins:
//!
//! -   `mysql_native_password`
//! -   `caching_sha2_password`
//! -   `sha256_password`
//! -   `mysql_clear_password`
//!
//! External registration is the seam used by token-based credential
//! providers (for example IAM database authentication, where a signed
//! token is sent as a cleartext "password").

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::options::MySqlConnectOptions;

mod clear_password;
mod native_password;
mod rsa;
mod sha256_password;

pub(crate) use self::rsa::encrypt_with_public_key;
pub use clear_password::ClearPassword;
pub use native_password::NativePassword;
pub use sha256_password::{CachingSha2Password, Sha256Password};

/// A MySQL authentication method.
///
/// Implementations transform the password and the server's scramble into
/// the `auth_response` payload of the handshake; the connection phase
/// drives any further round trips the method requires.
pub trait AuthPlugin: Send + Sync + 'static {
    /// The server-visible plugin identifier, e.g. `caching_sha2_password`.
    fn name(&self) -> &str;

    /// Whether this plugin transmits secrets that must not cross an
    /// unencrypted channel. When `true` and TLS is not active,
    /// authentication fails before anything is sent.
    fn requires_confidentiality(&self) -> bool {
        false
    }

    /// Produce the authentication response for the given password and
    /// server scramble.
    fn hash_password(&self, password: &str, scramble: &[u8]) -> Result<Vec<u8>>;
}

/// Resolve a plugin name against the registry in `options`, falling back to
/// the built-in implementations.
pub(crate) fn resolve(
    options: &MySqlConnectOptions,
    name: &str,
) -> Result<Arc<dyn AuthPlugin>> {
    if let Some(plugin) = options.find_auth_plugin(name) {
        return Ok(plugin);
    }

    Ok(match name {
        "mysql_native_password" => Arc::new(NativePassword),
        "caching_sha2_password" => Arc::new(CachingSha2Password),
        "sha256_password" => Arc::new(Sha256Password),
        "mysql_clear_password" => Arc::new(ClearPassword),

        _ => {
            return Err(Error::UnknownAuthPlugin(name.to_owned()));
        }
    })
}

pub(crate) fn xor_eq(lhs: &mut [u8], rhs: &[u8]) {
    debug_assert_eq!(lhs.len(), rhs.len());

    for (l, r) in lhs.iter_mut().zip(rhs) {
        *l ^= r;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{resolve, AuthPlugin};
    use crate::options::MySqlConnectOptions;

    struct TokenPlugin;

    impl AuthPlugin for TokenPlugin {
        fn name(&self) -> &str {
            "mysql_clear_password"
        }

        fn requires_confidentiality(&self) -> bool {
            true
        }

        fn hash_password(&self, _: &str, _: &[u8]) -> crate::Result<Vec<u8>> {
            Ok(b"signed-token\0".to_vec())
        }
    }

    #[test]
    fn registered_plugins_shadow_builtins() {
        let options = MySqlConnectOptions::new().register_auth_plugin(Arc::new(TokenPlugin));

        let plugin = resolve(&options, "mysql_clear_password").unwrap();
        assert_eq!(plugin.hash_password("ignored", b"").unwrap(), b"signed-token\0");
    }

    #[test]
    fn unknown_plugins_are_an_error() {
        let options = MySqlConnectOptions::new();
        assert!(resolve(&options, "dialog").is_err());
    }
}
