use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;

/// Generate an opaque random token: `<prefix>_<base64url(bytes)>`.
pub fn generate_opaque_token(prefix: &str, bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    format!("{}_{}", prefix, URL_SAFE_NO_PAD.encode(&buf))
}

/// Generate a session token (`ses_` prefix, 32 random bytes).
pub fn generate_session_token() -> String {
    generate_opaque_token(crate::id::prefix::SESSION, 32)
}
