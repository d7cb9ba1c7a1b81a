// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Known-answer and property tests for the payload cipher.

use mbus::cipher::{Blowfish, BLOCK_LEN, MAX_KEY_LEN};
use mbus::Error;

fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).expect("hex digit"))
        .collect()
}

#[test]
fn test_zero_key_zero_block_kat() {
    let bf = Blowfish::new(&hex("0000000000000000")).expect("valid key");
    let mut block = [0u8; BLOCK_LEN];
    bf.encrypt_block(&mut block);
    assert_eq!(block.to_vec(), hex("4EF997456198DD78"));
}

#[test]
fn test_ones_key_ones_block_kat() {
    let bf = Blowfish::new(&hex("FFFFFFFFFFFFFFFF")).expect("valid key");
    let mut block = [0xFFu8; BLOCK_LEN];
    bf.encrypt_block(&mut block);
    assert_eq!(block.to_vec(), hex("51866FD5B85ECB8A"));
}

#[test]
fn test_roundtrip_all_key_lengths() {
    let block_in = [0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x23, 0x45, 0x67];
    for key_len in 1..=MAX_KEY_LEN {
        let key: Vec<u8> = (0..key_len).map(|i| (i * 37 + key_len) as u8).collect();
        let bf = Blowfish::new(&key).expect("valid key");

        let mut block = block_in;
        bf.encrypt_block(&mut block);
        bf.decrypt_block(&mut block);
        assert_eq!(block, block_in, "roundtrip failed for key_len={}", key_len);
    }
}

#[test]
fn test_roundtrip_varied_blocks() {
    let bf = Blowfish::new(b"varied blocks").expect("valid key");
    for i in 0u32..256 {
        let mut block = [0u8; BLOCK_LEN];
        block[..4].copy_from_slice(&i.wrapping_mul(0x9E37_79B9).to_be_bytes());
        block[4..].copy_from_slice(&i.wrapping_mul(0x85EB_CA6B).to_be_bytes());
        let original = block;
        bf.encrypt_block(&mut block);
        bf.decrypt_block(&mut block);
        assert_eq!(block, original);
    }
}

#[test]
fn test_pkcs5_payload_roundtrip() {
    // The "This is a test" scenario with the short ASCII key "3657".
    let bf = Blowfish::new(b"3657").expect("valid key");
    let plaintext = b"This is a test";

    let sealed = bf.encrypt_payload(plaintext);
    // 14 bytes pad to 16 (two pad bytes of value 2).
    assert_eq!(sealed.len(), 16);
    assert_ne!(&sealed[..], &plaintext[..]);

    let opened = bf.decrypt_payload(&sealed).expect("decrypts");
    assert_eq!(opened, plaintext);
}

#[test]
fn test_pkcs5_every_remainder() {
    let bf = Blowfish::new(b"remainders").expect("valid key");
    for len in 0..=32 {
        let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
        let sealed = bf.encrypt_payload(&payload);
        assert_eq!(sealed.len() % BLOCK_LEN, 0);
        assert!(sealed.len() > payload.len(), "padding always added");
        assert_eq!(bf.decrypt_payload(&sealed).expect("decrypts"), payload);
    }
}

#[test]
fn test_wrong_key_does_not_decrypt() {
    let right = Blowfish::new(b"3657").expect("valid key");
    let wrong = Blowfish::new(b"3658").expect("valid key");

    let sealed = right.encrypt_payload(b"This is a test");
    // Either the padding check trips or the bytes differ.
    match wrong.decrypt_payload(&sealed) {
        Ok(opened) => assert_ne!(opened, b"This is a test"),
        Err(Error::InvalidCiphertext(_)) => {}
        Err(other) => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_empty_key_rejected() {
    assert!(matches!(Blowfish::new(b""), Err(Error::InvalidKey)));
}

#[test]
fn test_partial_block_ciphertext_rejected() {
    let bf = Blowfish::new(b"3657").expect("valid key");
    for len in [1usize, 7, 9, 15] {
        assert!(
            matches!(
                bf.decrypt_payload(&vec![0u8; len]),
                Err(Error::InvalidCiphertext(_))
            ),
            "length {} must be rejected",
            len
        );
    }
}
