//! NIP-13: Proof of Work.
//!
//! Difficulty is the number of leading zero bits of the event id.

/// Leading zero bits of a hex event id. Non-hex characters stop the count.
pub fn get_difficulty(id_hex: &str) -> u32 {
    let mut bits = 0;
    for c in id_hex.chars() {
        let Some(nibble) = c.to_digit(16) else {
            break;
        };
        if nibble == 0 {
            bits += 4;
        } else {
            bits += nibble.leading_zeros() - 28;
            break;
        }
    }
    bits
}

/// Whether the id meets `min_difficulty`.
pub fn check_pow(id_hex: &str, min_difficulty: u32) -> bool {
    get_difficulty(id_hex) >= min_difficulty
}
