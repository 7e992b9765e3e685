//! Security-context and crypto-provider contracts.
//!
//! The concrete cipher/integrity primitives (AES, SNOW-3G, ZUC) are assumed to
//! live elsewhere; this module defines the boundary a real implementation plugs
//! into ([`SecurityProvider`]) rather than implementing the algorithms themselves.

use crate::error::L2Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityAlgo {
    Null,
    AesCmac,
    Snow3g,
    Zuc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgo {
    Null,
    AesCtr,
    Snow3g,
    Zuc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Uplink,
    Downlink,
}

/// The per-direction keys, algorithm selection, and running COUNT state a PDCP
/// entity needs to apply integrity protection and ciphering.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    pub k_int: [u8; 32],
    pub k_enc: [u8; 32],
    pub integrity_algo: IntegrityAlgo,
    pub cipher_algo: CipherAlgo,
    pub tx_count: u32,
    pub rx_count: u32,
    pub direction: Direction,
}

impl SecurityContext {
    pub fn null() -> Self {
        Self {
            k_int: [0; 32],
            k_enc: [0; 32],
            integrity_algo: IntegrityAlgo::Null,
            cipher_algo: CipherAlgo::Null,
            tx_count: 0,
            rx_count: 0,
            direction: Direction::Uplink,
        }
    }
}

/// The USIM/crypto collaborator contract: `{integrity_generate, integrity_verify,
/// cipher_encrypt, cipher_decrypt}(k, count, bearer, direction, msg) ->
/// bytes|bool`. A real deployment wires this to a USIM-backed AES/SNOW-3G/ZUC
/// implementation; tests use [`TestSecurityProvider`] below.
pub trait SecurityProvider {
    fn integrity_generate(
        &self,
        algo: IntegrityAlgo,
        key: &[u8; 32],
        count: u32,
        bearer: u8,
        direction: Direction,
        msg: &[u8],
    ) -> [u8; 4];

    fn integrity_verify(
        &self,
        algo: IntegrityAlgo,
        key: &[u8; 32],
        count: u32,
        bearer: u8,
        direction: Direction,
        msg: &[u8],
        mac: &[u8; 4],
    ) -> bool {
        if algo == IntegrityAlgo::Null {
            return true;
        }
        self.integrity_generate(algo, key, count, bearer, direction, msg) == *mac
    }

    fn cipher_encrypt(
        &self,
        algo: CipherAlgo,
        key: &[u8; 32],
        count: u32,
        bearer: u8,
        direction: Direction,
        msg: &[u8],
    ) -> Vec<u8>;

    /// Stream ciphers (AES-CTR, SNOW-3G, ZUC) are keystream-XOR symmetric, so
    /// decryption is the same operation as encryption; default impl reflects that.
    fn cipher_decrypt(
        &self,
        algo: CipherAlgo,
        key: &[u8; 32],
        count: u32,
        bearer: u8,
        direction: Direction,
        ct: &[u8],
    ) -> Vec<u8> {
        self.cipher_encrypt(algo, key, count, bearer, direction, ct)
    }
}

/// A deterministic, non-cryptographic stand-in for real AES-CMAC/AES-CTR/SNOW-3G/
/// ZUC, used by tests to exercise the integrity/cipher call sites without pulling
/// in a real crypto crate. `Null` algos are a true no-op passthrough; non-null
/// algos derive a keystream/MAC from the key and COUNT well enough to catch replay
/// and tampering in tests, but must never be used outside this crate's own tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct TestSecurityProvider;

impl TestSecurityProvider {
    fn keystream_byte(key: &[u8; 32], count: u32, bearer: u8, direction: Direction, index: usize) -> u8 {
        let dir = match direction {
            Direction::Uplink => 0,
            Direction::Downlink => 1,
        };
        let mut acc = key[index % key.len()];
        for b in count.to_be_bytes() {
            acc ^= b;
        }
        acc ^ bearer ^ dir ^ (index as u8)
    }
}

impl SecurityProvider for TestSecurityProvider {
    fn integrity_generate(
        &self,
        algo: IntegrityAlgo,
        key: &[u8; 32],
        count: u32,
        bearer: u8,
        direction: Direction,
        msg: &[u8],
    ) -> [u8; 4] {
        if algo == IntegrityAlgo::Null {
            return [0; 4];
        }
        let mut mac = [0u8; 4];
        for (i, m) in mac.iter_mut().enumerate() {
            *m = Self::keystream_byte(key, count, bearer, direction, i);
        }
        for (i, &byte) in msg.iter().enumerate() {
            mac[i % 4] ^= byte;
        }
        mac
    }

    fn cipher_encrypt(
        &self,
        algo: CipherAlgo,
        key: &[u8; 32],
        count: u32,
        bearer: u8,
        direction: Direction,
        msg: &[u8],
    ) -> Vec<u8> {
        if algo == CipherAlgo::Null {
            return msg.to_vec();
        }
        msg.iter()
            .enumerate()
            .map(|(i, &b)| b ^ Self::keystream_byte(key, count, bearer, direction, i))
            .collect()
    }
}

/// Always-null provider, for SRB/DRB configurations with security disabled
/// (`integrity_algo`/`cipher_algo` both `Null`).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSecurityProvider;

impl SecurityProvider for NullSecurityProvider {
    fn integrity_generate(
        &self,
        _algo: IntegrityAlgo,
        _key: &[u8; 32],
        _count: u32,
        _bearer: u8,
        _direction: Direction,
        _msg: &[u8],
    ) -> [u8; 4] {
        [0; 4]
    }

    fn cipher_encrypt(
        &self,
        _algo: CipherAlgo,
        _key: &[u8; 32],
        _count: u32,
        _bearer: u8,
        _direction: Direction,
        msg: &[u8],
    ) -> Vec<u8> {
        msg.to_vec()
    }
}

pub fn parse_integrity_algo(b: u8) -> Result<IntegrityAlgo, L2Error> {
    match b {
        0 => Ok(IntegrityAlgo::Null),
        1 => Ok(IntegrityAlgo::AesCmac),
        2 => Ok(IntegrityAlgo::Snow3g),
        3 => Ok(IntegrityAlgo::Zuc),
        other => Err(L2Error::ConfigError(format!("unknown integrity algo {other}"))),
    }
}

pub fn parse_cipher_algo(b: u8) -> Result<CipherAlgo, L2Error> {
    match b {
        0 => Ok(CipherAlgo::Null),
        1 => Ok(CipherAlgo::AesCtr),
        2 => Ok(CipherAlgo::Snow3g),
        3 => Ok(CipherAlgo::Zuc),
        other => Err(L2Error::ConfigError(format!("unknown cipher algo {other}"))),
    }
}
