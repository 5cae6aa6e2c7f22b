use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sodiumoxide::crypto::box_::{self, Nonce, PublicKey, SecretKey, Seed};
use uuid::Uuid;

use crate::error::SuperError;

/// How long an open key-exchange session stays usable.
pub const DEFAULT_KEX_EXPIRY_SECONDS: i64 = 60;

/// What the server returns from a kex initiation: its public key and
/// the request id the client must present on the encrypted endpoints.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KexReply {
    pub request_id: Uuid,
    pub public_key: String,
}

/// One ephemeral key-exchange session.
///
/// The client supplies its public key and a 192-bit initialization
/// vector; the server generates its own keypair. Nonces for the
/// encrypted messages are the IV interpreted as a 192-bit integer plus a
/// monotonic per-session counter. The raw IV is never used as a nonce.
#[derive(Debug, Clone)]
pub struct KexSession {
    pub request_id: Uuid,
    public: PublicKey,
    secret: SecretKey,
    peer: PublicKey,
    iv: [u8; box_::NONCEBYTES],
    count: u64,
    pub source_ip: IpAddr,
    pub created_at: DateTime<Utc>,
    expiry_seconds: i64,
}

impl KexSession {
    /// Open a session from the client's initiation message.
    pub fn initiate(
        peer_public_hex: &str,
        iv_hex: &str,
        source_ip: IpAddr,
        expiry_seconds: i64,
    ) -> Result<Self, SuperError> {
        let peer = decode_key(peer_public_hex)?;
        let iv_bytes =
            hex::decode(iv_hex).map_err(|_| SuperError::BadRequest("bad iv".into()))?;
        let iv: [u8; box_::NONCEBYTES] = iv_bytes
            .try_into()
            .map_err(|_| SuperError::BadRequest("iv must be 192 bit".into()))?;

        let (public, secret) = generate_keypair()?;
        Ok(KexSession {
            request_id: Uuid::new_v4(),
            public,
            secret,
            peer,
            iv,
            count: 0,
            source_ip,
            created_at: Utc::now(),
            expiry_seconds,
        })
    }

    pub fn reply(&self) -> KexReply {
        KexReply {
            request_id: self.request_id,
            public_key: hex::encode(self.public.0),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.created_at + Duration::seconds(self.expiry_seconds)
    }

    pub fn is_same_source(&self, ip: IpAddr) -> bool {
        self.source_ip == ip
    }

    /// The next nonce: IV as a 192-bit big-endian integer plus the
    /// incremented message counter.
    pub fn next_nonce(&mut self) -> Nonce {
        self.count += 1;
        let mut bytes = self.iv;
        let mut carry = self.count;
        for b in bytes.iter_mut().rev() {
            if carry == 0 {
                break;
            }
            let sum = *b as u64 + (carry & 0xff);
            *b = (sum & 0xff) as u8;
            carry = (carry >> 8) + (sum >> 8);
        }
        Nonce(bytes)
    }

    /// Decrypt one client message under the session keys.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, SuperError> {
        let nonce = self.next_nonce();
        box_::open(ciphertext, &nonce, &self.peer, &self.secret).map_err(|_| SuperError::Crypto)
    }

    /// Encrypt one server reply under the session keys.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Vec<u8> {
        let nonce = self.next_nonce();
        box_::seal(plaintext, &nonce, &self.peer, &self.secret)
    }
}

/// Generate a box keypair from 1024 bits of entropy hashed down to a
/// 256-bit seed.
fn generate_keypair() -> Result<(PublicKey, SecretKey), SuperError> {
    let mut entropy = [0u8; 128];
    OsRng.fill_bytes(&mut entropy);
    let digest = Sha256::digest(entropy);
    let seed = Seed::from_slice(&digest).ok_or(SuperError::Crypto)?;
    Ok(box_::keypair_from_seed(&seed))
}

fn decode_key(hex_key: &str) -> Result<PublicKey, SuperError> {
    let bytes = hex::decode(hex_key).map_err(|_| SuperError::BadRequest("bad key".into()))?;
    PublicKey::from_slice(&bytes).ok_or_else(|| SuperError::BadRequest("key must be 256 bit".into()))
}

/// A client-side counterpart used by the tests: same nonce schedule,
/// opposite key orientation.
#[cfg(test)]
pub(crate) struct TestPeer {
    pub public: PublicKey,
    secret: SecretKey,
    iv: [u8; box_::NONCEBYTES],
    count: u64,
}

#[cfg(test)]
impl TestPeer {
    pub fn new() -> Self {
        sodiumoxide::init().ok();
        let (public, secret) = box_::gen_keypair();
        let mut iv = [0u8; box_::NONCEBYTES];
        OsRng.fill_bytes(&mut iv);
        TestPeer { public, secret, iv, count: 0 }
    }

    pub fn iv_hex(&self) -> String {
        hex::encode(self.iv)
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.public.0)
    }

    fn next_nonce(&mut self) -> Nonce {
        self.count += 1;
        let mut bytes = self.iv;
        let mut carry = self.count;
        for b in bytes.iter_mut().rev() {
            if carry == 0 {
                break;
            }
            let sum = *b as u64 + (carry & 0xff);
            *b = (sum & 0xff) as u8;
            carry = (carry >> 8) + (sum >> 8);
        }
        Nonce(bytes)
    }

    pub fn encrypt(&mut self, server_public_hex: &str, plaintext: &[u8]) -> Vec<u8> {
        let server = decode_key(server_public_hex).unwrap();
        let nonce = self.next_nonce();
        box_::seal(plaintext, &nonce, &server, &self.secret)
    }

    pub fn decrypt(&mut self, server_public_hex: &str, ciphertext: &[u8]) -> Vec<u8> {
        let server = decode_key(server_public_hex).unwrap();
        let nonce = self.next_nonce();
        box_::open(ciphertext, &nonce, &server, &self.secret).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (KexSession, TestPeer) {
        sodiumoxide::init().ok();
        let peer = TestPeer::new();
        let session = KexSession::initiate(
            &peer.public_hex(),
            &peer.iv_hex(),
            "198.51.100.7".parse().unwrap(),
            DEFAULT_KEX_EXPIRY_SECONDS,
        )
        .unwrap();
        (session, peer)
    }

    #[test]
    fn round_trip_under_session_nonces() {
        let (mut session, mut peer) = session();
        let server_key = session.reply().public_key;

        let ciphertext = peer.encrypt(&server_key, b"activate jdoe");
        let plaintext = session.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, b"activate jdoe");

        let reply = session.encrypt(b"token:abc");
        assert_eq!(peer.decrypt(&server_key, &reply), b"token:abc");
    }

    #[test]
    fn nonces_never_repeat_and_never_equal_the_iv() {
        let (mut session, _) = session();
        let iv = session.iv;
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            let nonce = session.next_nonce();
            assert_ne!(nonce.0, iv, "raw IV must never be used as a nonce");
            assert!(seen.insert(nonce.0), "nonce repeated");
        }
    }

    #[test]
    fn nonce_counter_carries_across_byte_boundaries() {
        let (mut session, _) = session();
        session.iv = [0xff; box_::NONCEBYTES];
        let nonce = session.next_nonce();
        // 0xff..ff + 1 wraps to zero
        assert_eq!(nonce.0, [0u8; box_::NONCEBYTES]);
    }

    #[test]
    fn expiry_follows_ttl() {
        let (session, _) = session();
        let now = Utc::now();
        assert!(!session.is_expired(now));
        assert!(session.is_expired(now + Duration::seconds(DEFAULT_KEX_EXPIRY_SECONDS + 1)));
    }

    #[test]
    fn rejects_malformed_key_material() {
        assert!(KexSession::initiate("zz", &hex::encode([0u8; 24]), "127.0.0.1".parse().unwrap(), 60).is_err());
        assert!(KexSession::initiate(&hex::encode([0u8; 16]), &hex::encode([0u8; 24]), "127.0.0.1".parse().unwrap(), 60).is_err());
        assert!(KexSession::initiate(&hex::encode([0u8; 32]), &hex::encode([0u8; 8]), "127.0.0.1".parse().unwrap(), 60).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let (mut session, mut peer) = session();
        let server_key = session.reply().public_key;
        let mut ciphertext = peer.encrypt(&server_key, b"secret");
        ciphertext[0] ^= 0x01;
        assert!(matches!(session.decrypt(&ciphertext), Err(SuperError::Crypto)));
    }
}
