use digest::Digest;
use memchr::memchr;
use sha1::Sha1;

use crate::auth::{xor_eq, AuthPlugin};
use crate::error::Result;

/// `mysql_native_password`, the pre-8.0 default.
///
/// <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_connection_phase_authentication_methods_native_password_authentication.html>
/// <https://mariadb.com/kb/en/connection/#mysql_native_password-plugin>
pub struct NativePassword;

impl AuthPlugin for NativePassword {
    fn name(&self) -> &str {
        "mysql_native_password"
    }

    fn hash_password(&self, password: &str, scramble: &[u8]) -> Result<Vec<u8>> {
        if password.is_empty() {
            return Ok(Vec::new());
        }

        // the scramble is (optionally) NUL-terminated
        let end = memchr(b'\0', scramble).unwrap_or(scramble.len());
        let scramble = &scramble[..end];

        // SHA1( password ) ^ SHA1( scramble + SHA1( SHA1( password ) ) )

        let mut ctx = Sha1::new();

        ctx.update(password);
        let mut pw_hash = ctx.finalize_reset();

        ctx.update(pw_hash);
        let pw_hash_hash = ctx.finalize_reset();

        ctx.update(scramble);
        ctx.update(pw_hash_hash);
        let scramble_hash = ctx.finalize();

        xor_eq(&mut pw_hash, &scramble_hash);

        Ok(pw_hash.to_vec())
    }
}
