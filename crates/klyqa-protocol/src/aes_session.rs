//! Per-connection AES-128-CBC session derived from a shared key and two
//! exchanged initial vectors.
//!
//! The sending and receiving directions use independent CBC chains seeded
//! from `local_iv || remote_iv` and `remote_iv || local_iv` respectively, so
//! a session object must be kept alive and reused for the life of the
//! connection: each call continues the running CBC chain rather than
//! resetting it, mirroring the device firmware's own persistent cipher
//! context.

use aes::Aes128;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cbc::{Decryptor, Encryptor};

use crate::error::ProtocolError;

type Aes128CbcEnc = Encryptor<Aes128>;
type Aes128CbcDec = Decryptor<Aes128>;

/// 16-byte shared key used by both directions of a session.
pub type AesKey = [u8; 16];
/// 8-byte initial vector exchanged during the handshake.
pub type Iv = [u8; 8];

/// Pads `plain.as_bytes()` with ASCII spaces up to the next multiple of 16.
fn space_pad(plain: &str) -> Vec<u8> {
    let mut bytes = plain.as_bytes().to_vec();
    while bytes.len() % 16 != 0 {
        bytes.push(b' ');
    }
    bytes
}

/// Two independently-chained AES-CBC contexts keyed from one shared secret
/// and both connection IVs.
pub struct AesSession {
    sending: Aes128CbcEnc,
    receiving: Aes128CbcDec,
}

impl AesSession {
    /// Build sending (`local||remote`) and receiving (`remote||local`)
    /// contexts from the shared key and the two handshake IVs.
    pub fn new(key: &AesKey, local_iv: &Iv, remote_iv: &Iv) -> Self {
        let mut send_iv = [0u8; 16];
        send_iv[..8].copy_from_slice(local_iv);
        send_iv[8..].copy_from_slice(remote_iv);

        let mut recv_iv = [0u8; 16];
        recv_iv[..8].copy_from_slice(remote_iv);
        recv_iv[8..].copy_from_slice(local_iv);

        Self {
            sending: Aes128CbcEnc::new(key.into(), &send_iv.into()),
            receiving: Aes128CbcDec::new(key.into(), &recv_iv.into()),
        }
    }

    /// Space-pad `json` to a 16-byte boundary and encrypt it, continuing the
    /// sending CBC chain.
    pub fn encrypt_sending(&mut self, json: &str) -> Vec<u8> {
        let mut padded = space_pad(json);
        for block in padded.chunks_mut(16) {
            let block = GenericArray::from_mut_slice(block);
            self.sending.encrypt_block_mut(block);
        }
        padded
    }

    /// Decrypt `ciphertext`, continuing the receiving CBC chain, and parse
    /// the (space-padded) plaintext back to a `String` with trailing
    /// whitespace trimmed.
    pub fn decrypt_receiving(&mut self, ciphertext: &[u8]) -> Result<String, ProtocolError> {
        let mut plain = ciphertext.to_vec();
        if plain.len() % 16 != 0 {
            return Err(ProtocolError::Decrypt);
        }
        for block in plain.chunks_mut(16) {
            let block = GenericArray::from_mut_slice(block);
            self.receiving.decrypt_block_mut(block);
        }
        let text = std::str::from_utf8(&plain)?;
        Ok(text.trim_end().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AesKey {
        *b"0123456789abcdef"
    }

    #[test]
    fn roundtrip_through_both_directions() {
        let local = *b"LOCALIV1";
        let remote = *b"REMOTEIV";
        let mut host = AesSession::new(&key(), &local, &remote);
        let mut device = AesSession::new(&key(), &remote, &local);

        let json = r#"{"type":"ping"}"#;
        let ct = host.encrypt_sending(json);
        let pt = device.decrypt_receiving(&ct).unwrap();
        assert_eq!(pt, json);
    }

    #[test]
    fn chained_messages_continue_the_cbc_stream() {
        let local = *b"LOCALIV1";
        let remote = *b"REMOTEIV";
        let mut host = AesSession::new(&key(), &local, &remote);
        let mut device = AesSession::new(&key(), &remote, &local);

        for i in 0..5 {
            let json = format!(r#"{{"type":"request","n":{i}}}"#);
            let ct = host.encrypt_sending(&json);
            let pt = device.decrypt_receiving(&ct).unwrap();
            assert_eq!(pt, json);
        }
    }

    #[test]
    fn trailing_whitespace_is_trimmed_after_decrypt() {
        let local = *b"LOCALIV1";
        let remote = *b"REMOTEIV";
        let mut host = AesSession::new(&key(), &local, &remote);
        let mut device = AesSession::new(&key(), &remote, &local);
        let ct = host.encrypt_sending(r#"{"a":1}"#);
        let pt = device.decrypt_receiving(&ct).unwrap();
        assert!(!pt.ends_with(' '));
    }
}
