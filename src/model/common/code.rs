use rand::{distributions::Alphanumeric, Rng};

/// Characters a join code is drawn from. `I`, `O`, `0` and `1` are left out
/// so codes survive being read aloud or copied off a projector.
pub const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const JOIN_CODE_LENGTH: usize = 6;
pub const TOKEN_LENGTH: usize = 32;

/// Generate a random join code.
pub fn generate_join_code() -> String {
    let mut rng = rand::thread_rng();
    (0..JOIN_CODE_LENGTH)
        .map(|_| JOIN_CODE_ALPHABET[rng.gen_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Generate a random, opaque bearer token.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Bring a user-typed code into canonical form.
/// Returns `None` if it cannot be a join code at all.
pub fn normalize_join_code(code: &str) -> Option<String> {
    let code = code.trim().to_ascii_uppercase();
    let valid = code.len() == JOIN_CODE_LENGTH
        && code.bytes().all(|b| JOIN_CODE_ALPHABET.contains(&b));
    valid.then_some(code)
}
