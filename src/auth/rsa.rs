use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{PaddingScheme, PublicKey, RsaPublicKey};
use sha1::Sha1;

use crate::auth::xor_eq;
use crate::error::{Error, Result};

/// Encrypt the password for transmission over an unencrypted channel during
/// `caching_sha2_password` or `sha256_password` full authentication.
///
/// The password (with a trailing NUL) is XOR'd with the scramble, repeated
/// as necessary, then RSA-OAEP(SHA-1) encrypted with the public key the
/// server supplied in PEM form.
///
/// <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_caching_sha2_authentication_exchanges.html>
pub(crate) fn encrypt_with_public_key(
    password: &str,
    scramble: &[u8],
    public_key_pem: &[u8],
) -> Result<Vec<u8>> {
    if scramble.is_empty() {
        return Err(Error::Auth("server scramble is empty".into()));
    }

    let mut pw = Vec::with_capacity(password.len() + 1);
    pw.extend_from_slice(password.as_bytes());
    pw.push(0);

    let mask: Vec<u8> = scramble.iter().copied().cycle().take(pw.len()).collect();
    xor_eq(&mut pw, &mask);

    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|err| Error::Auth(format!("server public key is not UTF-8: {}", err)))?;

    // MySQL emits SubjectPublicKeyInfo ("BEGIN PUBLIC KEY") but older
    // versions used PKCS#1 ("BEGIN RSA PUBLIC KEY"); accept both
    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|err| Error::Auth(format!("invalid server public key: {}", err)))?;

    key.encrypt(&mut OsRng, PaddingScheme::new_oaep::<Sha1>(), &pw)
        .map_err(|err| Error::Auth(format!("RSA encryption failed: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::encrypt_with_public_key;

    const PUBLIC_KEY_PEM: &[u8] = b"-----BEGIN PUBLIC KEY-----
MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAwnXi3nr9TmN+NF49A3Y7
UBnAVhApNJy2cmuf/y6vFM9eHFu5T80Ij1qYc6c79oAGA8nNNCFQL+0j5De88cln
Krlzq/Ab3U+j5SqgNwk//F6Y3iyjV4L7feSDqjpcheFzkjEslbm/yoRwQ78AAU6s
qA0hcFuh66mcvnotDrvZAGQ8U2EbbZa6oiR3wrgbzifSKq767g65zIrCpoyxzKMH
AETSDIaMKpFio4dRATKT5ASQtPoIyxSBmjRtc22sqlhEeiejEMsJzd6Bliuait+A
kTXL6G1Tbam26Dok/L88CnTAWAkLwTA3bjPcS8Zl9gTsJvoiMuwW1UPEVV/aJ11Z
/wIDAQAB
-----END PUBLIC KEY-----
";

    #[test]
    fn it_produces_ciphertext_of_the_key_size() {
        let ciphertext =
            encrypt_with_public_key("password", b"12345678901234567890", PUBLIC_KEY_PEM).unwrap();

        // 2048-bit key
        assert_eq!(ciphertext.len(), 256);
    }

    #[test]
    fn it_rejects_an_empty_scramble() {
        assert!(encrypt_with_public_key("password", b"", PUBLIC_KEY_PEM).is_err());
    }

    #[test]
    fn it_rejects_garbage_keys() {
        assert!(encrypt_with_public_key("password", b"scramble", b"not a key").is_err());
    }
}
