// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Blowfish payload cipher.
//!
//! 64-bit block cipher with a 32..448-bit key, used to protect DATA payloads
//! on the wire. The bus treats a payload as concatenated independent 8-byte
//! blocks (ECB) over PKCS#5-padded plaintext; the padding is always added
//! (1..=8 bytes) and stripped on decrypt.
//!
//! The key schedule and round structure follow the cipher definition: the
//! P-array and S-boxes start as the hex digits of pi (`tables.rs`), are
//! XOR-folded with the cycled key bytes, and are then replaced pairwise by
//! chained encryptions of the all-zero block.
//!
//! This is a pure implementation with no external dependencies.

mod tables;

use crate::error::{Error, Result};

use tables::{P_INIT, S_INIT};

/// Cipher block length in bytes.
pub const BLOCK_LEN: usize = 8;

/// Minimum key length in bytes (32 bits).
pub const MIN_KEY_LEN: usize = 1;

/// Maximum key length in bytes (448 bits).
pub const MAX_KEY_LEN: usize = 56;

/// Number of Feistel rounds.
const ROUNDS: usize = 16;

/// A scheduled Blowfish key.
///
/// Construction runs the full key schedule (521 block encryptions); the
/// resulting state is immutable and reused for every block, so one instance
/// per session key is the intended lifecycle.
///
/// # Example
///
/// ```rust
/// use mbus::cipher::Blowfish;
///
/// let bf = Blowfish::new(b"3657").unwrap();
/// let sealed = bf.encrypt_payload(b"This is a test");
/// assert_eq!(bf.decrypt_payload(&sealed).unwrap(), b"This is a test");
/// ```
pub struct Blowfish {
    p: [u32; 18],
    s: [[u32; 256]; 4],
}

impl Blowfish {
    /// Run the key schedule for `key` (1..=56 bytes).
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(Error::InvalidKey);
        }

        let mut cipher = Self {
            p: P_INIT,
            s: S_INIT,
        };

        // Fold the key into P: each subkey is XORed with the next four key
        // bytes, cycling over the key. Key byte 0 lands in the MSB of the
        // first word.
        let mut j = 0;
        for subkey in cipher.p.iter_mut() {
            let mut word = 0u32;
            for _ in 0..4 {
                word = (word << 8) | u32::from(key[j]);
                j = (j + 1) % key.len();
            }
            *subkey ^= word;
        }

        // Replace P then S pairwise with chained encryptions of the all-zero
        // block: each output feeds the next encryption.
        let (mut l, mut r) = (0u32, 0u32);
        for i in (0..cipher.p.len()).step_by(2) {
            let (nl, nr) = cipher.encrypt_words(l, r);
            cipher.p[i] = nl;
            cipher.p[i + 1] = nr;
            l = nl;
            r = nr;
        }
        for box_idx in 0..cipher.s.len() {
            for i in (0..256).step_by(2) {
                let (nl, nr) = cipher.encrypt_words(l, r);
                cipher.s[box_idx][i] = nl;
                cipher.s[box_idx][i + 1] = nr;
                l = nl;
                r = nr;
            }
        }

        Ok(cipher)
    }

    /// The round function F over one 32-bit half.
    ///
    /// F(x) = ((S0[a] + S1[b]) ^ S2[c]) + S3[d], additions mod 2^32,
    /// where a..d are the bytes of x from most to least significant.
    #[inline]
    fn f(&self, x: u32) -> u32 {
        let a = (x >> 24) as usize;
        let b = ((x >> 16) & 0xFF) as usize;
        let c = ((x >> 8) & 0xFF) as usize;
        let d = (x & 0xFF) as usize;

        (self.s[0][a].wrapping_add(self.s[1][b]) ^ self.s[2][c]).wrapping_add(self.s[3][d])
    }

    /// Encrypt one block given as two 32-bit halves.
    fn encrypt_words(&self, mut l: u32, mut r: u32) -> (u32, u32) {
        for i in 0..ROUNDS {
            l ^= self.p[i];
            r ^= self.f(l);
            std::mem::swap(&mut l, &mut r);
        }
        // Undo the last swap, then fold in the final two subkeys. The halves
        // come back swapped relative to the last round's roles.
        std::mem::swap(&mut l, &mut r);
        r ^= self.p[ROUNDS];
        l ^= self.p[ROUNDS + 1];
        (l, r)
    }

    /// Decrypt one block given as two 32-bit halves (P in reverse order).
    fn decrypt_words(&self, mut l: u32, mut r: u32) -> (u32, u32) {
        for i in (2..ROUNDS + 2).rev() {
            l ^= self.p[i];
            r ^= self.f(l);
            std::mem::swap(&mut l, &mut r);
        }
        std::mem::swap(&mut l, &mut r);
        r ^= self.p[1];
        l ^= self.p[0];
        (l, r)
    }

    /// Encrypt one 8-byte block in place (big-endian halves).
    pub fn encrypt_block(&self, block: &mut [u8; BLOCK_LEN]) {
        let l = u32::from_be_bytes([block[0], block[1], block[2], block[3]]);
        let r = u32::from_be_bytes([block[4], block[5], block[6], block[7]]);
        let (l, r) = self.encrypt_words(l, r);
        block[..4].copy_from_slice(&l.to_be_bytes());
        block[4..].copy_from_slice(&r.to_be_bytes());
    }

    /// Decrypt one 8-byte block in place (big-endian halves).
    pub fn decrypt_block(&self, block: &mut [u8; BLOCK_LEN]) {
        let l = u32::from_be_bytes([block[0], block[1], block[2], block[3]]);
        let r = u32::from_be_bytes([block[4], block[5], block[6], block[7]]);
        let (l, r) = self.decrypt_words(l, r);
        block[..4].copy_from_slice(&l.to_be_bytes());
        block[4..].copy_from_slice(&r.to_be_bytes());
    }

    /// Encrypt an arbitrary payload: PKCS#5 pad, then ECB over the blocks.
    ///
    /// Padding is always added; the output length is the next multiple of 8
    /// strictly greater than the input length.
    pub fn encrypt_payload(&self, plaintext: &[u8]) -> Vec<u8> {
        let pad = BLOCK_LEN - (plaintext.len() % BLOCK_LEN);
        let mut out = Vec::with_capacity(plaintext.len() + pad);
        out.extend_from_slice(plaintext);
        out.resize(plaintext.len() + pad, pad as u8);

        for chunk in out.chunks_exact_mut(BLOCK_LEN) {
            let block: &mut [u8; BLOCK_LEN] = chunk.try_into().expect("chunks_exact yields 8");
            self.encrypt_block(block);
        }
        out
    }

    /// Decrypt an ECB payload and strip the PKCS#5 padding.
    ///
    /// Fails with `InvalidCiphertext` when the input is empty, not a whole
    /// number of blocks, or the final pad byte is outside 1..=8.
    pub fn decrypt_payload(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() {
            return Err(Error::InvalidCiphertext("empty input".into()));
        }
        if ciphertext.len() % BLOCK_LEN != 0 {
            return Err(Error::InvalidCiphertext(format!(
                "{} bytes is not a whole number of blocks",
                ciphertext.len()
            )));
        }

        let mut out = ciphertext.to_vec();
        for chunk in out.chunks_exact_mut(BLOCK_LEN) {
            let block: &mut [u8; BLOCK_LEN] = chunk.try_into().expect("chunks_exact yields 8");
            self.decrypt_block(block);
        }

        let pad = usize::from(*out.last().expect("non-empty checked above"));
        if pad == 0 || pad > BLOCK_LEN {
            return Err(Error::InvalidCiphertext(format!(
                "pad byte {} outside 1..=8",
                pad
            )));
        }
        out.truncate(out.len() - pad);
        Ok(out)
    }
}

impl std::fmt::Debug for Blowfish {
    // Key material stays out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blowfish").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).expect("hex"))
            .collect()
    }

    fn encrypt_hex(key: &str, plain: &str) -> String {
        let bf = Blowfish::new(&hex(key)).expect("valid key");
        let mut block: [u8; 8] = hex(plain).try_into().expect("8 bytes");
        bf.encrypt_block(&mut block);
        block.iter().map(|b| format!("{:02X}", b)).collect()
    }

    #[test]
    fn test_published_vectors() {
        // Standard single-block ECB vectors.
        let vectors = [
            ("0000000000000000", "0000000000000000", "4EF997456198DD78"),
            ("FFFFFFFFFFFFFFFF", "FFFFFFFFFFFFFFFF", "51866FD5B85ECB8A"),
            ("3000000000000000", "1000000000000001", "7D856F9A613063F2"),
            ("1111111111111111", "1111111111111111", "2466DD878B963C9D"),
            ("0123456789ABCDEF", "1111111111111111", "61F9C3802281B096"),
            ("FEDCBA9876543210", "0123456789ABCDEF", "0ACEAB0FC6A0A28D"),
        ];
        for (key, plain, cipher) in vectors {
            assert_eq!(encrypt_hex(key, plain), cipher, "key={}", key);
        }
    }

    #[test]
    fn test_block_roundtrip() {
        let bf = Blowfish::new(b"roundtrip key").expect("valid key");
        let original = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77];
        let mut block = original;
        bf.encrypt_block(&mut block);
        assert_ne!(block, original);
        bf.decrypt_block(&mut block);
        assert_eq!(block, original);
    }

    #[test]
    fn test_schedule_deterministic() {
        let a = Blowfish::new(b"same key").expect("valid key");
        let b = Blowfish::new(b"same key").expect("valid key");
        assert_eq!(a.p, b.p);
        assert_eq!(a.s, b.s);
    }

    #[test]
    fn test_key_length_bounds() {
        assert!(matches!(Blowfish::new(b""), Err(Error::InvalidKey)));
        assert!(matches!(
            Blowfish::new(&[0u8; MAX_KEY_LEN + 1]),
            Err(Error::InvalidKey)
        ));
        assert!(Blowfish::new(&[0u8; MIN_KEY_LEN]).is_ok());
        assert!(Blowfish::new(&[0u8; MAX_KEY_LEN]).is_ok());
    }

    #[test]
    fn test_payload_padding_always_added() {
        let bf = Blowfish::new(b"3657").expect("valid key");
        // Exact multiple of the block size still gains a full pad block.
        let sealed = bf.encrypt_payload(&[0u8; 16]);
        assert_eq!(sealed.len(), 24);
        assert_eq!(bf.decrypt_payload(&sealed).expect("roundtrip"), [0u8; 16]);
    }

    #[test]
    fn test_payload_rejects_partial_block() {
        let bf = Blowfish::new(b"3657").expect("valid key");
        assert!(matches!(
            bf.decrypt_payload(&[0u8; 7]),
            Err(Error::InvalidCiphertext(_))
        ));
        assert!(matches!(
            bf.decrypt_payload(&[]),
            Err(Error::InvalidCiphertext(_))
        ));
    }

    #[test]
    fn test_payload_rejects_bad_padding() {
        let bf = Blowfish::new(b"3657").expect("valid key");
        // Encrypt a block whose last byte decrypts to something outside 1..=8
        // by encrypting garbage directly without padding.
        let mut block = [0xA5u8; 8];
        bf.encrypt_block(&mut block);
        // Decrypting this single block yields 0xA5 as the pad byte.
        assert!(matches!(
            bf.decrypt_payload(&block),
            Err(Error::InvalidCiphertext(_))
        ));
    }
}
