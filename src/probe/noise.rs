//! WireGuard handshake messages (Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s), initiator side.
//!
//! Only the first round trip is implemented: build a handshake initiation and authenticate the
//! responder's handshake response. No transport keys are derived.

use crate::error::{ProbeError, ScanError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use blake2::digest::consts::U16;
use blake2::{Blake2s256, Blake2sMac, Digest};
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use hmac::{Mac, SimpleHmac};
use rand::rngs::OsRng;
use std::time::{SystemTime, UNIX_EPOCH};
use x25519_dalek::{PublicKey, StaticSecret};

const CONSTRUCTION: &[u8] = b"Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s";
const IDENTIFIER: &[u8] = b"WireGuard v1 zx2c4 Jason@zx2c4.com";
const LABEL_MAC1: &[u8] = b"mac1----";
const TAI64_BASE: u64 = 0x4000_0000_0000_000a;

pub const MSG_INITIATION: u8 = 1;
pub const MSG_RESPONSE: u8 = 2;
pub const INITIATION_LEN: usize = 148;
pub const RESPONSE_LEN: usize = 92;
/// Bytes of a response needed to authenticate it (header, indices, ephemeral, empty payload).
pub const RESPONSE_MIN_LEN: usize = 60;

type HmacBlake2s = SimpleHmac<Blake2s256>;

/// Decoded key material for one handshake identity.
#[derive(Clone)]
pub struct HandshakeKeys {
    private: StaticSecret,
    public: PublicKey,
    peer_public: PublicKey,
    preshared: [u8; 32],
}

impl HandshakeKeys {
    pub fn new(private: [u8; 32], peer_public: [u8; 32], preshared: Option<[u8; 32]>) -> Self {
        let private = StaticSecret::from(private);
        Self {
            public: PublicKey::from(&private),
            private,
            peer_public: PublicKey::from(peer_public),
            preshared: preshared.unwrap_or([0u8; 32]),
        }
    }

    /// Keys as base64 strings; an empty preshared key means none.
    pub fn from_base64(
        private: &str,
        peer_public: &str,
        preshared: Option<&str>,
    ) -> Result<Self, ScanError> {
        let psk = match preshared.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => Some(decode_key("preshared key", s)?),
            None => None,
        };
        Ok(Self::new(
            decode_key("private key", private)?,
            decode_key("peer public key", peer_public)?,
            psk,
        ))
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }
}

fn decode_key(name: &str, s: &str) -> Result<[u8; 32], ScanError> {
    let bytes = STANDARD
        .decode(s.trim())
        .map_err(|e| ScanError::Credentials(format!("{name}: {e}")))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| ScanError::Credentials(format!("{name}: expected 32 bytes, got {}", bytes.len())))
}

/// A sent handshake initiation and the state needed to check its response.
pub struct Initiation {
    pub packet: [u8; INITIATION_LEN],
    sender_index: u32,
    ephemeral: StaticSecret,
    chaining_key: [u8; 32],
    hash: [u8; 32],
}

impl Initiation {
    pub fn new(keys: &HandshakeKeys, sender_index: u32, timestamp: [u8; 12]) -> Result<Self, ProbeError> {
        let mut ck = hash(&[CONSTRUCTION]);
        let mut h = hash(&[&ck, IDENTIFIER]);
        h = hash(&[&h, keys.peer_public.as_bytes()]);

        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let e_pub = PublicKey::from(&ephemeral);
        [ck] = kdf::<1>(&ck, e_pub.as_bytes())?;
        h = hash(&[&h, e_pub.as_bytes()]);

        let [c, k] = kdf::<2>(&ck, ephemeral.diffie_hellman(&keys.peer_public).as_bytes())?;
        ck = c;
        let enc_static = seal(&k, keys.public.as_bytes(), &h)?;
        h = hash(&[&h, &enc_static]);

        let [c, k] = kdf::<2>(&ck, keys.private.diffie_hellman(&keys.peer_public).as_bytes())?;
        ck = c;
        let enc_timestamp = seal(&k, &timestamp, &h)?;
        h = hash(&[&h, &enc_timestamp]);

        let mut packet = [0u8; INITIATION_LEN];
        packet[0] = MSG_INITIATION;
        packet[4..8].copy_from_slice(&sender_index.to_le_bytes());
        packet[8..40].copy_from_slice(e_pub.as_bytes());
        packet[40..88].copy_from_slice(&enc_static);
        packet[88..116].copy_from_slice(&enc_timestamp);
        let m1 = mac1(keys.peer_public.as_bytes(), &packet[..116])?;
        packet[116..132].copy_from_slice(&m1);
        // mac2 stays zero: no cookie

        Ok(Self {
            packet,
            sender_index,
            ephemeral,
            chaining_key: ck,
            hash: h,
        })
    }

    /// Authenticate a handshake response; returns the responder's sender index.
    pub fn consume_response(&self, keys: &HandshakeKeys, resp: &[u8]) -> Result<u32, ProbeError> {
        if resp.len() < RESPONSE_MIN_LEN {
            return Err(ProbeError::MalformedReply(format!(
                "handshake response too short: {} bytes",
                resp.len()
            )));
        }
        if resp[0] != MSG_RESPONSE {
            return Err(ProbeError::MalformedReply(format!(
                "unexpected message type {}",
                resp[0]
            )));
        }
        let peer_index = u32::from_le_bytes(le4(&resp[4..8]));
        let receiver_index = u32::from_le_bytes(le4(&resp[8..12]));
        if receiver_index != self.sender_index {
            return Err(ProbeError::MalformedReply("receiver index mismatch".into()));
        }

        let mut e_r = [0u8; 32];
        e_r.copy_from_slice(&resp[12..44]);
        let e_r = PublicKey::from(e_r);

        let mut ck = self.chaining_key;
        [ck] = kdf::<1>(&ck, e_r.as_bytes())?;
        let mut h = hash(&[&self.hash, e_r.as_bytes()]);
        [ck] = kdf::<1>(&ck, self.ephemeral.diffie_hellman(&e_r).as_bytes())?;
        [ck] = kdf::<1>(&ck, keys.private.diffie_hellman(&e_r).as_bytes())?;
        let [_, tau, kappa] = kdf::<3>(&ck, &keys.preshared)?;
        h = hash(&[&h, &tau]);
        open(&kappa, &resp[44..60], &h)?;
        Ok(peer_index)
    }
}

/// Current time as a TAI64N label.
pub fn tai64n_now() -> [u8; 12] {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let mut out = [0u8; 12];
    out[..8].copy_from_slice(&(TAI64_BASE + now.as_secs()).to_be_bytes());
    out[8..].copy_from_slice(&now.subsec_nanos().to_be_bytes());
    out
}

fn le4(b: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&b[..4]);
    out
}

fn hash(parts: &[&[u8]]) -> [u8; 32] {
    let mut h = <Blake2s256 as Digest>::new();
    for p in parts {
        Digest::update(&mut h, p);
    }
    Digest::finalize(h).into()
}

fn hmac(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], ProbeError> {
    let mut m = <HmacBlake2s as Mac>::new_from_slice(key)
        .map_err(|e| ProbeError::Handshake(format!("hmac key: {e}")))?;
    for p in parts {
        Mac::update(&mut m, p);
    }
    Ok(Mac::finalize(m).into_bytes().into())
}

/// HKDF with HMAC-BLAKE2s, producing `N` 32-byte outputs.
fn kdf<const N: usize>(key: &[u8; 32], input: &[u8]) -> Result<[[u8; 32]; N], ProbeError> {
    let t0 = hmac(key, &[input])?;
    let mut out = [[0u8; 32]; N];
    for i in 0..N {
        let counter = [i as u8 + 1];
        out[i] = if i == 0 {
            hmac(&t0, &[&counter])?
        } else {
            hmac(&t0, &[&out[i - 1], &counter])?
        };
    }
    Ok(out)
}

fn seal(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, ProbeError> {
    <ChaCha20Poly1305 as KeyInit>::new(Key::from_slice(key))
        .encrypt(&Nonce::default(), Payload { msg: plaintext, aad })
        .map_err(|_| ProbeError::Handshake("encryption failed".into()))
}

fn open(key: &[u8; 32], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, ProbeError> {
    <ChaCha20Poly1305 as KeyInit>::new(Key::from_slice(key))
        .decrypt(&Nonce::default(), Payload { msg: ciphertext, aad })
        .map_err(|_| ProbeError::Handshake("response failed authentication".into()))
}

fn mac1(receiver_public: &[u8; 32], msg: &[u8]) -> Result<[u8; 16], ProbeError> {
    let key = hash(&[LABEL_MAC1, receiver_public]);
    let mut m = <Blake2sMac<U16> as Mac>::new_from_slice(&key)
        .map_err(|e| ProbeError::Handshake(format!("mac1 key: {e}")))?;
    Mac::update(&mut m, msg);
    Ok(Mac::finalize(m).into_bytes().into())
}


#[cfg(test)]
mod tests {
    use super::responder::Responder;
    use super::*;

    fn pair(psk_i: Option<[u8; 32]>, psk_r: Option<[u8; 32]>) -> (HandshakeKeys, Responder) {
        let responder = Responder::new([7u8; 32], psk_r);
        let keys = HandshakeKeys::new([9u8; 32], responder.public_key(), psk_i);
        (keys, responder)
    }

    #[test]
    fn initiation_layout() {
        let (keys, _) = pair(None, None);
        let init = Initiation::new(&keys, 0xdead_beef, tai64n_now()).unwrap();
        assert_eq!(init.packet[0], MSG_INITIATION);
        assert_eq!(&init.packet[1..4], &[0, 0, 0]);
        assert_eq!(&init.packet[4..8], &0xdead_beef_u32.to_le_bytes());
        assert_eq!(&init.packet[132..148], &[0u8; 16]);
    }

    #[test]
    fn full_round_trip_authenticates() {
        let (keys, responder) = pair(None, None);
        let init = Initiation::new(&keys, 42, tai64n_now()).unwrap();
        let resp = responder.respond(&init.packet, 77).unwrap();
        assert_eq!(init.consume_response(&keys, &resp).unwrap(), 77);
    }

    #[test]
    fn preshared_key_must_match() {
        let (keys, responder) = pair(Some([1u8; 32]), Some([1u8; 32]));
        let init = Initiation::new(&keys, 1, tai64n_now()).unwrap();
        let resp = responder.respond(&init.packet, 2).unwrap();
        assert!(init.consume_response(&keys, &resp).is_ok());

        let (keys, responder) = pair(Some([1u8; 32]), Some([2u8; 32]));
        let init = Initiation::new(&keys, 1, tai64n_now()).unwrap();
        let resp = responder.respond(&init.packet, 2).unwrap();
        assert!(matches!(
            init.consume_response(&keys, &resp),
            Err(ProbeError::Handshake(_))
        ));
    }

    #[test]
    fn rejects_tampered_and_foreign_responses() {
        let (keys, responder) = pair(None, None);
        let init = Initiation::new(&keys, 5, tai64n_now()).unwrap();
        let mut resp = responder.respond(&init.packet, 6).unwrap();

        let short = &resp[..40];
        assert!(matches!(
            init.consume_response(&keys, short),
            Err(ProbeError::MalformedReply(_))
        ));

        resp[50] ^= 0xff;
        assert!(init.consume_response(&keys, &resp).is_err());

        resp[50] ^= 0xff;
        resp[8] ^= 0x01;
        assert!(matches!(
            init.consume_response(&keys, &resp),
            Err(ProbeError::MalformedReply(_))
        ));
    }

    #[test]
    fn wrong_peer_key_is_rejected_by_responder() {
        let responder = Responder::new([7u8; 32], None);
        let keys = HandshakeKeys::new([9u8; 32], [3u8; 32], None);
        let init = Initiation::new(&keys, 1, tai64n_now()).unwrap();
        assert!(responder.respond(&init.packet, 2).is_err());
    }

    #[test]
    fn base64_keys() {
        let k = STANDARD.encode([5u8; 32]);
        assert!(HandshakeKeys::from_base64(&k, &k, None).is_ok());
        assert!(HandshakeKeys::from_base64(&k, &k, Some("")).is_ok());
        assert!(matches!(
            HandshakeKeys::from_base64("not base64!", &k, None),
            Err(ScanError::Credentials(_))
        ));
        let short = STANDARD.encode([5u8; 16]);
        assert!(HandshakeKeys::from_base64(&k, &short, None).is_err());
    }

    #[test]
    fn tai64n_label_is_offset_from_epoch() {
        let a = tai64n_now();
        let secs = u64::from_be_bytes(a[..8].try_into().unwrap());
        assert!(secs > TAI64_BASE);
    }
}
