use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

use crate::error::Result;

/// The size of the CSRF token in bytes.
const CSRF_TOKEN_SIZE: usize = 32;

/// Generates a new random CSRF token.
///
/// # Returns
///
/// A URL-safe base64-encoded CSRF token.
pub fn generate_csrf_token() -> Result<String> {
    let mut token = [0u8; CSRF_TOKEN_SIZE];
    OsRng.fill_bytes(&mut token);

    Ok(general_purpose::URL_SAFE_NO_PAD.encode(token))
}

/// Compares the cookie and header copies of a double-submit token in
/// constant time.
pub fn tokens_match(cookie_value: &str, header_value: &str) -> bool {
    cookie_value.as_bytes().ct_eq(header_value.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_url_safe_base64() {
        let token = generate_csrf_token().unwrap();
        assert_eq!(token.len(), 43);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn tokens_do_not_repeat() {
        assert_ne!(generate_csrf_token().unwrap(), generate_csrf_token().unwrap());
    }

    #[test]
    fn matching_is_exact() {
        let token = generate_csrf_token().unwrap();
        assert!(tokens_match(&token, &token));
        assert!(!tokens_match(&token, &token[..42]));
        assert!(!tokens_match(&token, &generate_csrf_token().unwrap()));
        assert!(!tokens_match(&token, ""));
    }
}
