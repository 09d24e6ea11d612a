//! The identity service seam.
//!
//! The ledger never interprets addresses; it only needs fresh ones when it builds a genesis
//! block. [`KeyPairAddresses`] derives them from new secp256k1 keys, [`FixedAddresses`] replays a
//! given list.

use std::collections::VecDeque;

use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;

use crate::error::{ChainError, Result};
use crate::sha256::Hash;

/// Opaque account identifier.
pub type Address = String;

const ADDRESS_VERSION: u8 = 0x00;
const ADDRESS_CHECKSUM_LEN: usize = 4;

pub trait AddressSource {
    fn next_address(&mut self) -> Result<Address>;
}

/// Generates a new key pair per address. The private keys are not retained: handing them to a
/// wallet is the identity service's business, not the ledger's.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyPairAddresses;

impl AddressSource for KeyPairAddresses {
    fn next_address(&mut self) -> Result<Address> {
        let signing_key = SigningKey::random(&mut OsRng);
        let public_key = signing_key.verifying_key().to_encoded_point(false);
        Ok(encode_address(public_key.as_bytes()))
    }
}

/// Hands out a predetermined list of addresses, then fails.
#[derive(Debug, Clone)]
pub struct FixedAddresses(VecDeque<Address>);

impl FixedAddresses {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Address>,
    {
        FixedAddresses(addresses.into_iter().map(Into::into).collect())
    }
}

impl AddressSource for FixedAddresses {
    fn next_address(&mut self) -> Result<Address> {
        self.0
            .pop_front()
            .ok_or_else(|| ChainError::Identity("address list exhausted".to_string()))
    }
}

/// `hex(version || sha256(pubkey) || checksum)` where the checksum is the first four bytes of
/// the double SHA-256 of the versioned payload.
pub fn encode_address(public_key: &[u8]) -> Address {
    let mut payload = vec![ADDRESS_VERSION];
    payload.extend_from_slice(Hash::digest(public_key).as_bytes());
    let first = Hash::digest(&payload);
    let checksum = Hash::digest(first.as_bytes());
    payload.extend_from_slice(&checksum.as_bytes()[..ADDRESS_CHECKSUM_LEN]);
    hex::encode(payload)
}
