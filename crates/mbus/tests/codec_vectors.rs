// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Golden wire vectors and decoder hardening tests.

use mbus::protocol::{
    DataPacket, Header, NakPacket, Packet, FLAG_ENCRYPTED, HEADER_LEN, KIND_DATA, KIND_HEARTBEAT,
    KIND_NAK, MAGIC, WIRE_VERSION,
};
use mbus::{Error, SeqRange};

#[test]
fn test_data_golden_bytes() {
    let packet = Packet::Data(DataPacket {
        header: Header::new(0x01020304, 0x0506, 0x0708090A, FLAG_ENCRYPTED),
        topic: "a.b".into(),
        payload: vec![0xCA, 0xFE],
    });

    let expected: Vec<u8> = vec![
        MAGIC[0], MAGIC[1], // magic
        WIRE_VERSION, // version
        KIND_DATA,    // kind
        0x01, 0x02, 0x03, 0x04, // peer
        0x05, 0x06, // session
        0x07, 0x08, 0x09, 0x0A, // sequence
        0x00, 0x01, // flags (encrypted)
        0x00, 0x03, // topic length
        b'a', b'.', b'b', // topic
        0x00, 0x00, 0x00, 0x02, // payload length
        0xCA, 0xFE, // payload
    ];
    assert_eq!(packet.encode(), expected);
}

#[test]
fn test_heartbeat_golden_bytes() {
    let packet = Packet::Heartbeat(Header::new(0xFFFFFFFF, 0xFFFF, 0x00000010, 0));
    let expected: Vec<u8> = vec![
        MAGIC[0],
        MAGIC[1],
        WIRE_VERSION,
        KIND_HEARTBEAT,
        0xFF,
        0xFF,
        0xFF,
        0xFF, // peer
        0xFF,
        0xFF, // session
        0x00,
        0x00,
        0x00,
        0x10, // sequence = highest assigned
        0x00,
        0x00, // flags
    ];
    assert_eq!(packet.encode(), expected);
}

#[test]
fn test_nak_golden_bytes() {
    let packet = Packet::Nak(NakPacket {
        header: Header::new(1, 2, 3, 0),
        target_peer: 0x0A0B0C0D,
        target_session: 0x0E0F,
        // [5..8) goes on the wire as start=5, end=7 inclusive.
        ranges: vec![SeqRange::new(5, 8)],
    });

    let bytes = packet.encode();
    assert_eq!(bytes.len(), HEADER_LEN + 4 + 2 + 2 + 8);
    assert_eq!(bytes[3], KIND_NAK);
    assert_eq!(&bytes[HEADER_LEN..HEADER_LEN + 4], &[0x0A, 0x0B, 0x0C, 0x0D]);
    assert_eq!(&bytes[HEADER_LEN + 4..HEADER_LEN + 6], &[0x0E, 0x0F]);
    assert_eq!(&bytes[HEADER_LEN + 6..HEADER_LEN + 8], &[0x00, 0x01]);
    assert_eq!(
        &bytes[HEADER_LEN + 8..],
        &[0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x07]
    );
}

#[test]
fn test_roundtrip_equivalence() {
    let packets = vec![
        Packet::Data(DataPacket {
            header: Header::new(7, 9, 1000, 0),
            topic: "orders.eu.created".into(),
            payload: (0..200).collect(),
        }),
        Packet::Nak(NakPacket {
            header: Header::new(7, 9, 2, 0),
            target_peer: 42,
            target_session: 1,
            ranges: vec![SeqRange::new(1, 2), SeqRange::new(100, 228)],
        }),
        Packet::Heartbeat(Header::new(7, 9, 0xDEADBEEF, 0)),
    ];

    for packet in packets {
        let bytes = packet.encode();
        let decoded = Packet::decode(&bytes).expect("decodes");
        assert_eq!(decoded, packet);
        // Byte-exact re-encode.
        assert_eq!(decoded.encode(), bytes);
    }
}

#[test]
fn test_nak_range_wraps_sequence_space() {
    let packet = Packet::Nak(NakPacket {
        header: Header::new(1, 1, 1, 0),
        target_peer: 2,
        target_session: 2,
        // Wraps: u32::MAX-1 ..= 1
        ranges: vec![SeqRange::new(u32::MAX - 1, 2)],
    });
    let decoded = Packet::decode(&packet.encode()).expect("decodes");
    assert_eq!(decoded, packet);
}

#[test]
fn test_decoder_rejects_malformed() {
    let good = Packet::Data(DataPacket {
        header: Header::new(1, 2, 3, 0),
        topic: "a.b".into(),
        payload: vec![1, 2, 3],
    })
    .encode();

    // Magic.
    let mut bad = good.clone();
    bad[0] = 0x00;
    assert!(matches!(
        Packet::decode(&bad),
        Err(Error::MalformedPacket(_))
    ));

    // Version.
    let mut bad = good.clone();
    bad[2] = WIRE_VERSION + 1;
    assert!(Packet::decode(&bad).is_err());

    // Kind.
    let mut bad = good.clone();
    bad[3] = 0;
    assert!(Packet::decode(&bad).is_err());

    // Every truncation.
    for len in 0..good.len() {
        assert!(Packet::decode(&good[..len]).is_err());
    }

    // Payload length pointing past the buffer.
    let mut bad = good.clone();
    let plen_off = HEADER_LEN + 2 + 3;
    bad[plen_off] = 0xFF;
    assert!(Packet::decode(&bad).is_err());

    // NAK whose range count exceeds the body.
    let nak = Packet::Nak(NakPacket {
        header: Header::new(1, 2, 3, 0),
        target_peer: 4,
        target_session: 5,
        ranges: vec![SeqRange::new(1, 2)],
    })
    .encode();
    let mut bad = nak.clone();
    bad[HEADER_LEN + 6] = 0x00;
    bad[HEADER_LEN + 7] = 0x09;
    assert!(Packet::decode(&bad).is_err());

    // Empty buffer.
    assert!(Packet::decode(&[]).is_err());
}

#[test]
fn test_decoder_rejects_invalid_topic_bytes() {
    let good = Packet::Data(DataPacket {
        header: Header::new(1, 2, 3, 0),
        topic: "abc".into(),
        payload: Vec::new(),
    })
    .encode();

    // Non-UTF-8 topic bytes.
    let mut bad = good.clone();
    bad[HEADER_LEN + 2] = 0xFF;
    bad[HEADER_LEN + 3] = 0xFE;
    assert!(matches!(
        Packet::decode(&bad),
        Err(Error::MalformedPacket(_))
    ));

    // Wildcard embedded in a literal segment.
    let mut bad = good;
    bad[HEADER_LEN + 3] = b'*';
    assert!(Packet::decode(&bad).is_err());
}
