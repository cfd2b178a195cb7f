//! Pickup verification codes.
//!
//! A code is a six-digit decimal string drawn uniformly from
//! `[100000, 999999]`. The core enforces no expiry.

use rand::Rng;

pub const CODE_LENGTH: usize = 6;

const LOWEST: u32 = 100_000;
const HIGHEST: u32 = 999_999;

pub fn generate_verification_code() -> String {
    generate_with(&mut rand::thread_rng())
}

pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    rng.gen_range(LOWEST..=HIGHEST).to_string()
}

/// Exactly six ASCII digits, nothing else
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}
