mod common;

use std::io::Read;

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use common::{SavBuilder, write_temp};
use sav_reader::sav::codec::cmac::{Cmac, cmac_aes256};
use sav_reader::sav::codec::crypto::{
    ENCRYPTED_MARKER, EncryptedReader, decode_pair, decode_password, derive_key,
};
use sav_reader::{Record, SavError, SavReader, SlotValue};

const NIST_KEY: &str = "603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4";

fn key32(hex_key: &str) -> [u8; 32] {
    let bytes = hex::decode(hex_key).expect("hex key");
    bytes.try_into().expect("32-byte key")
}

/// One numeric variable and a single compressed case holding 5.
/// The image is 224 bytes, a whole number of cipher blocks.
fn plain_file() -> Vec<u8> {
    let bytes = SavBuilder::little()
        .variable(0, "X", None, &[])
        .data(&[105, 252, 0, 0, 0, 0, 0, 0])
        .build();
    assert_eq!(bytes.len() % 16, 0);
    bytes
}

/// Wraps `plain` in the encryption envelope keyed by `password`.
fn encrypt(plain: &[u8], password: &[u8]) -> Vec<u8> {
    let key = derive_key(password);
    let cipher = Aes256::new(GenericArray::from_slice(&key));
    let mut out = vec![0u8; 36];
    out[8..20].copy_from_slice(ENCRYPTED_MARKER);
    for chunk in plain.chunks(16) {
        let mut block = GenericArray::clone_from_slice(chunk);
        cipher.encrypt_block(&mut block);
        out.extend_from_slice(&block);
    }
    out
}

/// The legacy obfuscated form of `password`, found by search.
fn encode_legacy(password: &[u8]) -> Vec<u8> {
    password
        .iter()
        .flat_map(|&byte| {
            (33u8..=126)
                .flat_map(|a| (33u8..=126).map(move |b| (a, b)))
                .find(|&(a, b)| decode_pair(a, b) == Some(byte))
                .map(|(a, b)| [a, b])
                .expect("every byte has an encoding")
        })
        .collect()
}

fn first_value(reader: &mut SavReader) -> SlotValue {
    reader
        .case_values()
        .next()
        .expect("one value")
        .expect("decodes")
        .value
}

#[test]
fn cmac_nist_vectors() {
    let key = key32(NIST_KEY);
    let cases: &[(&str, &str)] = &[
        ("", "028962f61b7bf89efc6b551f4667d983"),
        (
            "6bc1bee22e409f96e93d7e117393172a",
            "28a7023f452e8f82bd4bf28d8c37c35c",
        ),
        (
            "6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e5130c81c46a35ce411",
            "aaf3d8f1de5640c232f5b169b9c911e6",
        ),
    ];
    for &(message, expected) in cases {
        let message = hex::decode(message).expect("hex message");
        assert_eq!(
            hex::encode(cmac_aes256(&key, &message)),
            expected,
            "CMAC of {}-byte message",
            message.len()
        );
    }
}

#[test]
fn cmac_subkeys() {
    let cmac = Cmac::new(&key32(NIST_KEY));
    let (k1, k2) = cmac.subkeys();
    assert_eq!(hex::encode(k1), "cad1ed03299eedac2e9a99808621502f");
    assert_eq!(hex::encode(k2), "95a3da06533ddb585d3533010c42a0d9");
}

#[test]
fn key_derivation_known_answers() {
    let cases: &[(&[u8], &str)] = &[
        (b"password", "1eb3c975f4aabde49cbee720c72e6d5c"),
        (b"pspp", "3eda098e6604d4fdf9630c2ca86fb045"),
    ];
    for &(password, half) in cases {
        let key = derive_key(password);
        assert_eq!(hex::encode(&key[..16]), half, "{:?}", password);
        assert_eq!(key[..16], key[16..], "key is the MAC repeated");
    }
}

#[test]
fn passwords_are_truncated_to_ten_bytes() {
    assert_eq!(derive_key(b"0123456789"), derive_key(b"0123456789abc"));
    assert_ne!(derive_key(b"012345678"), derive_key(b"0123456789"));
}

#[test]
fn every_byte_has_a_printable_encoding() {
    for byte in 0..=255u8 {
        let found = (33u8..=126)
            .any(|a| (33u8..=126).any(|b| decode_pair(a, b) == Some(byte)));
        assert!(found, "no printable pair decodes to {:#04x}", byte);
    }
}

#[test]
fn legacy_pair_examples() {
    assert_eq!(decode_pair(b'#', b'A'), Some(b'a'));
    assert_eq!(decode_pair(b'0', b'0'), Some(0));
    assert_eq!(decode_pair(b'U', b'U'), Some(255));
}

#[test]
fn decode_password_rules() {
    assert_eq!(decode_password(b"#A#A"), Some(b"aa".to_vec()));
    assert_eq!(decode_password(b""), Some(Vec::new()));
    assert_eq!(decode_password(b"#A#"), None, "odd length");
    assert_eq!(decode_password(b"#A00"), None, "decodes to NUL");
    assert_eq!(decode_password(&[b'#'; 22]), None, "longer than 20 bytes");
    assert_eq!(
        decode_password(&encode_legacy(b"pspp")),
        Some(b"pspp".to_vec())
    );
}

#[test]
fn plain_input_is_not_an_envelope() {
    let reader = EncryptedReader::from_reader(std::io::Cursor::new(plain_file())).expect("read prefix");
    assert!(reader.is_none());
    let short = EncryptedReader::from_reader(std::io::Cursor::new(vec![0u8; 20])).expect("short");
    assert!(short.is_none());
}

#[test]
fn locked_session_refuses_to_read() {
    let mut reader = SavReader::from_bytes(encrypt(&plain_file(), b"secret")).expect("open");
    assert!(reader.is_encrypted());
    assert!(reader.is_locked());
    assert!(matches!(reader.next_record(), Err(SavError::Locked)));
    assert!(matches!(reader.next_case_value(), Err(SavError::Locked)));
    assert!(reader.header().is_none());
}

#[test]
fn wrong_password_leaves_session_locked() {
    let mut reader = SavReader::from_bytes(encrypt(&plain_file(), b"secret")).expect("open");
    assert!(!reader.unlock("wrong"));
    assert!(!reader.unlock("wrong"));
    assert!(reader.is_locked());
    assert!(reader.unlock("secret"), "correct password after failures");
    assert!(reader.unlock("anything"), "already unlocked");
}

#[test]
fn unlocked_session_reads_like_a_plain_file() {
    let mut reader = SavReader::from_bytes(encrypt(&plain_file(), b"secret")).expect("open");
    assert!(reader.unlock("secret"));
    assert!(!reader.is_locked());

    let records = reader.read_dictionary().expect("dictionary");
    assert!(matches!(records[0], Record::Header(_)));
    match &records[1] {
        Record::Variable(v) => {
            assert_eq!(v.name, "X");
            assert_eq!(v.offset, 176, "offsets are relative to the plaintext");
        }
        other => panic!("expected a variable, got {:?}", other),
    }
    assert!(matches!(
        records.last(),
        Some(Record::EndOfDictionary {
            offset: 208,
            data_offset: 216
        })
    ));
    assert_eq!(first_value(&mut reader), SlotValue::Number(5.0));
}

#[test]
fn legacy_encoded_password_unlocks() {
    let mut reader = SavReader::from_bytes(encrypt(&plain_file(), b"pspp")).expect("open");
    assert!(reader.unlock(encode_legacy(b"pspp")));
    assert_eq!(first_value(&mut reader), SlotValue::Number(5.0));
}

#[test]
fn partial_cipher_block_is_fatal() {
    let mut bytes = encrypt(&plain_file(), b"secret");
    bytes.truncate(bytes.len() - 5);
    let mut reader = SavReader::from_bytes(bytes).expect("open");
    assert!(reader.unlock("secret"));
    let err = reader.read_dictionary().expect_err("truncated ciphertext");
    assert!(
        matches!(err, SavError::CorruptCiphertext { offset: 244, len: 11 }),
        "{:?}",
        err
    );
    assert!(reader.next_record().expect("session is finished").is_none());
}

#[test]
fn encrypted_file_on_disk() {
    let file = write_temp(&encrypt(&plain_file(), b"secret"));
    let mut reader = SavReader::open(file.path()).expect("open");
    assert!(reader.is_locked());
    assert!(reader.unlock("secret"));
    assert_eq!(first_value(&mut reader), SlotValue::Number(5.0));
}

#[test]
fn envelope_opened_from_a_path_decrypts_to_the_plaintext() {
    let plain = plain_file();
    let file = write_temp(&encrypt(&plain, b"secret"));
    let mut reader = EncryptedReader::open(file.path())
        .expect("open")
        .expect("encryption marker");
    assert!(reader.is_locked());
    let err = reader.read(&mut [0u8; 16]).expect_err("locked");
    assert!(matches!(SavError::from_io(err, 0), SavError::Locked));

    assert!(reader.unlock(b"secret"));
    let mut decrypted = Vec::new();
    reader.read_to_end(&mut decrypted).expect("decrypt");
    assert_eq!(decrypted, plain);

    let file = write_temp(&plain);
    let reader = EncryptedReader::open(file.path()).expect("open plain");
    assert!(reader.is_none(), "plain file has no envelope");
}

#[test]
fn plain_session_needs_no_password() {
    let mut reader = SavReader::from_bytes(plain_file()).expect("open");
    assert!(!reader.is_encrypted());
    assert!(reader.unlock("ignored"));
    assert_eq!(first_value(&mut reader), SlotValue::Number(5.0));
}
