use rand::Rng;

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generates a short lowercase alphanumeric token of `length` characters.
///
/// Callers that need global uniqueness must retry on collision against their
/// own store; the token itself carries no uniqueness guarantee.
pub fn generate_short_token(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length.max(1))
        .map(|_| {
            let index = rng.gen_range(0..TOKEN_ALPHABET.len());
            TOKEN_ALPHABET[index] as char
        })
        .collect()
}
