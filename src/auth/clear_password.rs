use crate::auth::AuthPlugin;
use crate::error::Result;

/// `mysql_clear_password`: the password bytes, verbatim, with a trailing
/// NUL.
///
/// Used by server-side plugins that need the original secret (PAM, LDAP)
/// and by token-based credential providers where the "password" is a signed
/// token. Because the secret crosses the wire untransformed, this plugin
/// refuses to run without TLS.
///
/// <https://dev.mysql.com/doc/refman/8.0/en/cleartext-pluggable-authentication.html>
pub struct ClearPassword;

impl AuthPlugin for ClearPassword {
    fn name(&self) -> &str {
        "mysql_clear_password"
    }

    fn requires_confidentiality(&self) -> bool {
        true
    }

    fn hash_password(&self, password: &str, _scramble: &[u8]) -> Result<Vec<u8>> {
        let mut response = Vec::with_capacity(password.len() + 1);
        response.extend_from_slice(password.as_bytes());
        response.push(0);

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::ClearPassword;
    use crate::auth::AuthPlugin;

    #[test]
    fn it_appends_a_nul_terminator() {
        assert_eq!(
            ClearPassword.hash_password("token", b"ignored").unwrap(),
            b"token\0"
        );
        assert!(ClearPassword.requires_confidentiality());
    }
}
