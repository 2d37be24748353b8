//! Entry id generation.
//!
//! Ids are short lowercase alphanumeric tokens. They appear in vault
//! filenames (`<id>-original.webm`), so they stay short and
//! filesystem-safe rather than using full UUIDs.

use rand::Rng;

/// Length of a generated entry id.
pub const ID_LEN: usize = 12;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a new random entry id.
///
/// 36^12 possible tokens makes collisions negligible for a single-user
/// store; the primary-key constraint catches the astronomically unlikely
/// repeat.
pub fn new_entry_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Validate the shape of an externally supplied id.
pub fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LEN && id.bytes().all(|b| ALPHABET.contains(&b))
}
