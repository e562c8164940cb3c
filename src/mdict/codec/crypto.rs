//! Cryptographic primitives for unlocking MDict key-section metadata.
//!
//! Three pieces are involved, and none of them ever touches record payloads:
//! - RIPEMD-128 as the keyed digest used for key derivation
//! - the rotate/XOR "fast" cipher protecting the key index block
//! - Salsa20/8 with a 128-bit key and a zero nonce, protecting the numeric
//!   block at the start of the key section

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};
use ripemd::{Digest, Ripemd128};

use crate::mdict::types::error::{MdictError, Result};
use crate::mdict::types::models::{Passcode, RegisterBy};

/// Salt appended to the checksum bytes when deriving the key index key.
const KEY_INDEX_SALT: u32 = 0x3695;

/// Initial "previous byte" of the fast cipher.
const FAST_CIPHER_SEED: u8 = 0x36;

/// "expand 16-byte k"
const TAU: [u32; 4] = [0x61707865, 0x3120646e, 0x79622d36, 0x6b206574];

pub fn ripemd128(data: &[u8]) -> [u8; 16] {
    let mut hasher = Ripemd128::new();
    hasher.update(data);
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Decrypts `data` in place with the rotate/XOR cipher.
///
/// For byte `i`: swap its nibbles, then XOR with the previous *ciphertext*
/// byte, `i mod 256` and `key[i % key.len()]`.
pub fn fast_decrypt(data: &mut [u8], key: &[u8]) {
    trace!("Fast-decrypting {} bytes", data.len());
    if key.is_empty() {
        return;
    }
    let mut previous = FAST_CIPHER_SEED;
    for (i, byte) in data.iter_mut().enumerate() {
        let cipher_byte = *byte;
        *byte = cipher_byte.rotate_left(4) ^ previous ^ (i as u8) ^ key[i % key.len()];
        previous = cipher_byte;
    }
}

/// Derives the fast-cipher key of a key index block:
/// `RIPEMD-128(block[4..8] || 0x3695 as little-endian u32)`.
pub fn key_index_key(block: &[u8]) -> Result<[u8; 16]> {
    let checksum = block
        .get(4..8)
        .ok_or_else(|| MdictError::InvalidFormat("Key index block shorter than 8 bytes".to_string()))?;
    let mut material = [0u8; 8];
    material[..4].copy_from_slice(checksum);
    LittleEndian::write_u32(&mut material[4..], KEY_INDEX_SALT);
    Ok(ripemd128(&material))
}

/// Decrypts a key index block in place; the 8-byte tag/checksum prefix stays untouched.
pub fn decrypt_key_index(block: &mut [u8]) -> Result<()> {
    let key = key_index_key(block)?;
    debug!("Decrypting key index ({} bytes) with checksum-derived key", block.len());
    fast_decrypt(&mut block[8..], &key);
    Ok(())
}

/// Applies the Salsa20/8 keystream to `data` in place (encrypts and decrypts).
///
/// The 16-byte key fills both key slots of the state and the nonce is zero,
/// so only the 64-bit block counter varies between keystream blocks.
pub fn salsa20_8(data: &mut [u8], key: &[u8; 16]) {
    trace!("Applying Salsa20/8 keystream to {} bytes", data.len());
    let state = initial_state(key);
    for (counter, chunk) in data.chunks_mut(64).enumerate() {
        let keystream = keystream_block(&state, counter as u64);
        for (byte, k) in chunk.iter_mut().zip(keystream.iter()) {
            *byte ^= k;
        }
    }
}

/// Turns a passcode into the key protecting the key section's numeric block.
///
/// The identifier is hashed (an email as UTF-16LE, a device id as raw bytes);
/// the digest keys a Salsa20/8 pass over the registration code, whose output
/// is the final key.
pub fn derive_passcode_key(passcode: &Passcode, register_by: RegisterBy) -> Result<[u8; 16]> {
    debug!("Deriving key-section key from passcode ({register_by:?})");
    let identifier: Vec<u8> = match register_by {
        RegisterBy::Email => passcode
            .user_id
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect(),
        RegisterBy::DeviceId => passcode.user_id.as_bytes().to_vec(),
    };
    let digest = ripemd128(&identifier);

    let mut key = passcode.reg_code.clone();
    salsa20_8(&mut key, &digest);
    key.try_into().map_err(|bytes: Vec<u8>| {
        MdictError::DecryptionError(format!(
            "Registration code must be exactly 16 bytes, got {}",
            bytes.len()
        ))
    })
}

fn initial_state(key: &[u8; 16]) -> [u32; 16] {
    let mut state = [0u32; 16];
    state[0] = TAU[0];
    state[5] = TAU[1];
    state[10] = TAU[2];
    state[15] = TAU[3];
    for i in 0..4 {
        let word = LittleEndian::read_u32(&key[i * 4..]);
        state[1 + i] = word;
        state[11 + i] = word;
    }
    // state[6], state[7]: zero nonce
    state
}

fn keystream_block(state: &[u32; 16], counter: u64) -> [u8; 64] {
    let mut input = *state;
    input[8] = counter as u32;
    input[9] = (counter >> 32) as u32;

    let mut x = input;
    for _ in 0..4 {
        // columns
        quarter_round(&mut x, 0, 4, 8, 12);
        quarter_round(&mut x, 5, 9, 13, 1);
        quarter_round(&mut x, 10, 14, 2, 6);
        quarter_round(&mut x, 15, 3, 7, 11);
        // rows
        quarter_round(&mut x, 0, 1, 2, 3);
        quarter_round(&mut x, 5, 6, 7, 4);
        quarter_round(&mut x, 10, 11, 8, 9);
        quarter_round(&mut x, 15, 12, 13, 14);
    }

    let mut out = [0u8; 64];
    for (i, (word, original)) in x.iter().zip(input.iter()).enumerate() {
        LittleEndian::write_u32(&mut out[i * 4..], word.wrapping_add(*original));
    }
    out
}

#[inline(always)]
fn quarter_round(x: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    x[b] ^= x[a].wrapping_add(x[d]).rotate_left(7);
    x[c] ^= x[b].wrapping_add(x[a]).rotate_left(9);
    x[d] ^= x[c].wrapping_add(x[b]).rotate_left(13);
    x[a] ^= x[d].wrapping_add(x[c]).rotate_left(18);
}
