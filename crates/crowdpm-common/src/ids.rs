//! ID generation.
//!
//! Server-minted row IDs use UUID v7 — globally unique, time-sortable,
//! generated without coordination. `batch_id` uses UUID v4 per the ingest
//! wire contract, which pins that specific version.

use rand::RngCore;
use uuid::Uuid;

/// Generate a new time-sortable ID using UUID v7.
///
/// UUID v7 provides:
/// - Monotonically increasing (time-sortable)
/// - 48 bits of Unix timestamp (millisecond precision)
/// - 74 bits of randomness (unique across nodes without coordination)
/// - Compatible with all UUID infrastructure (Postgres, etc.)
pub fn generate_id() -> Uuid {
    Uuid::now_v7()
}

/// Generate a batch ID. The ingest wire contract calls for a random UUID v4
/// rather than a time-sortable v7 — batch IDs are opaque handles, not rows
/// that benefit from index locality.
pub fn generate_batch_id() -> Uuid {
    Uuid::new_v4()
}

/// Extract the approximate creation timestamp from a UUID v7.
pub fn extract_timestamp(id: Uuid) -> Option<chrono::DateTime<chrono::Utc>> {
    let bytes = id.as_bytes();
    let ms = ((bytes[0] as u64) << 40)
        | ((bytes[1] as u64) << 32)
        | ((bytes[2] as u64) << 24)
        | ((bytes[3] as u64) << 16)
        | ((bytes[4] as u64) << 8)
        | (bytes[5] as u64);

    chrono::DateTime::from_timestamp_millis(ms as i64)
}

/// Generate an opaque 128-bit `device_code`, hex-encoded.
pub fn generate_device_code() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Alphabet used for `user_code` — uppercase letters and digits with
/// confusable glyphs (`I`, `O`, `0`, `1`) removed.
pub const USER_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

fn alphabet_index(c: char) -> Option<usize> {
    USER_CODE_ALPHABET.iter().position(|&b| b as char == c)
}

/// Compute the single checksum character for a 10-character code body: the
/// sum of alphabet indices modulo the alphabet size, mapped back to a
/// character. Rejects malformed bodies with a caught index lookup.
fn checksum_char(body: &str) -> Option<char> {
    let mut sum = 0usize;
    for c in body.chars() {
        sum += alphabet_index(c)?;
    }
    Some(USER_CODE_ALPHABET[sum % USER_CODE_ALPHABET.len()] as char)
}

/// Generate a fresh `user_code`: 10 random characters from
/// [`USER_CODE_ALPHABET`] plus one checksum character, displayed grouped as
/// `XXXXX-XXXXX-C`.
pub fn generate_user_code() -> String {
    let mut rng = rand::rng();
    let body: String = (0..10)
        .map(|_| USER_CODE_ALPHABET[(rng.next_u32() as usize) % USER_CODE_ALPHABET.len()] as char)
        .collect();
    let check = checksum_char(&body).expect("body built from alphabet is always valid");
    format!("{}-{}-{}", &body[0..5], &body[5..10], check)
}

/// Validate a user-supplied `user_code` (accepts the dash-grouped display
/// form or the bare 11-character form) against its checksum.
///
/// Returns the bare 11-character uppercase code on success.
pub fn validate_user_code_checksum(input: &str) -> Option<String> {
    let bare: String = input.chars().filter(|c| *c != '-').collect();
    let bare = bare.to_uppercase();
    if bare.len() != 11 {
        return None;
    }
    let (body, check) = bare.split_at(10);
    let expected = checksum_char(body)?;
    if check.chars().next() == Some(expected) {
        Some(bare)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        let id1 = generate_id();
        let id2 = generate_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_ids_are_time_sortable() {
        let id1 = generate_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = generate_id();
        assert!(id1 < id2);
    }

    #[test]
    fn test_extract_timestamp() {
        let before = chrono::Utc::now();
        let id = generate_id();
        let after = chrono::Utc::now();

        let extracted = extract_timestamp(id).expect("should extract timestamp");
        assert!(extracted >= before - chrono::Duration::milliseconds(1));
        assert!(extracted <= after + chrono::Duration::milliseconds(1));
    }

    #[test]
    fn test_batch_id_is_v4() {
        let id = generate_batch_id();
        assert_eq!(id.get_version_num(), 4);
    }

    #[test]
    fn test_device_code_is_32_hex_chars() {
        let code = generate_device_code();
        assert_eq!(code.len(), 32);
        assert!(code.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_user_code_shape() {
        let code = generate_user_code();
        assert_eq!(code.len(), 13);
        assert_eq!(code.chars().nth(5), Some('-'));
        assert_eq!(code.chars().nth(11), Some('-'));
    }

    #[test]
    fn test_user_code_checksum_round_trips() {
        let code = generate_user_code();
        assert!(validate_user_code_checksum(&code).is_some());
    }

    #[test]
    fn test_user_code_checksum_rejects_corruption() {
        let mut code = generate_user_code();
        // Flip the first body character to something else in the alphabet.
        let first = code.chars().next().unwrap();
        let replacement = USER_CODE_ALPHABET
            .iter()
            .map(|&b| b as char)
            .find(|&c| c != first)
            .unwrap();
        code.replace_range(0..1, &replacement.to_string());
        assert!(validate_user_code_checksum(&code).is_none());
    }

    #[test]
    fn test_user_code_checksum_rejects_wrong_length() {
        assert!(validate_user_code_checksum("ABCDE-FGHJK").is_none());
    }
}
