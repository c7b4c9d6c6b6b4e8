use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::key::CompressedPublicKey;
use bitcoin::opcodes::all::OP_CHECKMULTISIG;
use bitcoin::script::Builder;
use bitcoin::secp256k1::{Secp256k1, VerifyOnly};
use bitcoin::{Address, Network, PublicKey};
use std::str::FromStr;

use super::types::WalletAddressCoordinate;
use crate::error::SyncError;
use crate::storage::KeysFile;

/// Maps a derivation coordinate to the address string the node indexes.
///
/// Implementations must be pure: the same coordinate always yields the same
/// address.
pub trait AddressDeriver: Send + Sync {
    fn derive_address(&self, coordinate: &WalletAddressCoordinate) -> Result<String, SyncError>;

    /// Number of independent cosigner derivation paths.
    fn num_cosigners(&self) -> u32;
}

/// Derives wallet addresses from the persisted extended public keys.
///
/// - one key: P2WPKH at `xpub/keychain/index`
/// - several keys: P2WSH sorted multisig, every cosigner key derived at
///   `cosigner/keychain/index`
pub struct KeyChainAddresser {
    xpubs: Vec<Xpub>,
    minimum_signatures: u32,
    network: Network,
    secp: Secp256k1<VerifyOnly>,
}

impl KeyChainAddresser {
    pub fn new(keys: &KeysFile, network: Network) -> Result<Self, SyncError> {
        if keys.extended_public_keys.is_empty() {
            return Err(SyncError::Derivation(
                "no extended public keys configured".into(),
            ));
        }

        let xpubs = keys
            .extended_public_keys
            .iter()
            .map(|key| Self::extract_xpub(key))
            .collect::<Result<Vec<_>, _>>()?;

        let cosigners = xpubs.len() as u32;
        if keys.minimum_signatures == 0 || keys.minimum_signatures > cosigners {
            return Err(SyncError::Derivation(format!(
                "minimum signatures {} is outside 1..={}",
                keys.minimum_signatures, cosigners
            )));
        }

        Ok(Self {
            xpubs,
            minimum_signatures: keys.minimum_signatures,
            network,
            secp: Secp256k1::verification_only(),
        })
    }

    pub fn is_multisig(&self) -> bool {
        self.xpubs.len() > 1
    }

    /// Derive the address at the given coordinate
    pub fn derive(&self, coordinate: &WalletAddressCoordinate) -> Result<Address, SyncError> {
        let path = self.derivation_path(coordinate)?;

        let keys = self
            .xpubs
            .iter()
            .map(|xpub| {
                let derived = xpub.derive_pub(&self.secp, &path)?;
                Ok(PublicKey::new(derived.public_key))
            })
            .collect::<Result<Vec<_>, SyncError>>()?;

        if !self.is_multisig() {
            let compressed = CompressedPublicKey::try_from(keys[0])
                .map_err(|e| SyncError::Derivation(e.to_string()))?;
            return Ok(Address::p2wpkh(&compressed, self.network));
        }

        let mut sorted = keys;
        sorted.sort_by_key(|key| key.to_bytes());

        let mut builder = Builder::new().push_int(self.minimum_signatures as i64);
        for key in &sorted {
            builder = builder.push_key(key);
        }
        let witness_script = builder
            .push_int(sorted.len() as i64)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script();

        Ok(Address::p2wsh(&witness_script, self.network))
    }

    /// Path components below the account keys. Multisig wallets carry the
    /// cosigner index so each participant has a distinct address space.
    fn derivation_path(
        &self,
        coordinate: &WalletAddressCoordinate,
    ) -> Result<Vec<ChildNumber>, SyncError> {
        let normal = |index: u32| {
            ChildNumber::from_normal_idx(index).map_err(|e| SyncError::Derivation(e.to_string()))
        };

        let mut path = Vec::with_capacity(3);
        if self.is_multisig() {
            if coordinate.cosigner_index >= self.xpubs.len() as u32 {
                return Err(SyncError::Derivation(format!(
                    "cosigner index {} out of range",
                    coordinate.cosigner_index
                )));
            }
            path.push(normal(coordinate.cosigner_index)?);
        }
        path.push(normal(coordinate.key_chain.as_u32())?);
        path.push(normal(coordinate.index)?);
        Ok(path)
    }

    /// Extract the xpub/tpub from a bare key or a descriptor string
    fn extract_xpub(key: &str) -> Result<Xpub, SyncError> {
        let start = key
            .find("tpub")
            .or_else(|| key.find("xpub"))
            .ok_or_else(|| SyncError::Derivation(format!("no xpub/tpub found in '{}'", key)))?;

        let end = key[start..]
            .find('/')
            .map(|i| start + i)
            .unwrap_or(key.len());

        Xpub::from_str(key[start..end].trim()).map_err(|e| SyncError::Derivation(e.to_string()))
    }
}

impl AddressDeriver for KeyChainAddresser {
    fn derive_address(&self, coordinate: &WalletAddressCoordinate) -> Result<String, SyncError> {
        Ok(self.derive(coordinate)?.to_string())
    }

    fn num_cosigners(&self) -> u32 {
        self.xpubs.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::types::KeyChain;
    use bitcoin::bip32::Xpriv;
    use bitcoin::secp256k1::Secp256k1;

    fn test_xpub(seed_byte: u8) -> String {
        let secp = Secp256k1::new();
        let master = Xpriv::new_master(Network::Regtest, &[seed_byte; 32]).unwrap();
        Xpub::from_priv(&secp, &master).to_string()
    }

    fn coordinate(index: u32, cosigner_index: u32, key_chain: KeyChain) -> WalletAddressCoordinate {
        WalletAddressCoordinate::new(index, cosigner_index, key_chain)
    }

    #[test]
    fn test_single_signer_derives_p2wpkh() {
        let keys = KeysFile::single_signer(test_xpub(1));
        let addresser = KeyChainAddresser::new(&keys, Network::Regtest).unwrap();

        let address = addresser
            .derive_address(&coordinate(0, 0, KeyChain::External))
            .unwrap();

        assert!(address.starts_with("bcrt1q"));
        // P2WPKH program is 20 bytes, bech32 encoded to 44 chars on regtest
        assert_eq!(address.len(), 44);
        assert_eq!(addresser.num_cosigners(), 1);
    }

    #[test]
    fn test_derivation_is_deterministic_and_distinct() {
        let keys = KeysFile::single_signer(test_xpub(2));
        let addresser = KeyChainAddresser::new(&keys, Network::Regtest).unwrap();

        let a = addresser.derive_address(&coordinate(7, 0, KeyChain::External)).unwrap();
        let b = addresser.derive_address(&coordinate(7, 0, KeyChain::External)).unwrap();
        let change = addresser.derive_address(&coordinate(7, 0, KeyChain::Internal)).unwrap();
        let next = addresser.derive_address(&coordinate(8, 0, KeyChain::External)).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, change);
        assert_ne!(a, next);
    }

    #[test]
    fn test_multisig_cosigners_have_distinct_paths() {
        let keys = KeysFile {
            extended_public_keys: vec![test_xpub(3), test_xpub(4), test_xpub(5)],
            minimum_signatures: 2,
            cosigner_index: 1,
        };
        let addresser = KeyChainAddresser::new(&keys, Network::Regtest).unwrap();

        let first = addresser.derive_address(&coordinate(0, 0, KeyChain::External)).unwrap();
        let second = addresser.derive_address(&coordinate(0, 1, KeyChain::External)).unwrap();

        assert!(first.starts_with("bcrt1q"));
        // P2WSH program is 32 bytes
        assert_eq!(first.len(), 64);
        assert_ne!(first, second);
        assert!(addresser
            .derive_address(&coordinate(0, 3, KeyChain::External))
            .is_err());
    }

    #[test]
    fn test_descriptor_form_is_accepted() {
        let xpub = test_xpub(6);
        let descriptor = format!("[deadbeef/84h/1h/0h]{}/<0;1>/*", xpub);

        let from_descriptor =
            KeyChainAddresser::new(&KeysFile::single_signer(descriptor), Network::Regtest).unwrap();
        let from_key =
            KeyChainAddresser::new(&KeysFile::single_signer(xpub), Network::Regtest).unwrap();

        let coord = coordinate(3, 0, KeyChain::Internal);
        assert_eq!(
            from_descriptor.derive_address(&coord).unwrap(),
            from_key.derive_address(&coord).unwrap()
        );
    }

    #[test]
    fn test_invalid_configuration_is_a_derivation_error() {
        let bad_key = KeysFile::single_signer("not-a-key");
        assert!(matches!(
            KeyChainAddresser::new(&bad_key, Network::Regtest),
            Err(SyncError::Derivation(_))
        ));

        let too_many_sigs = KeysFile {
            extended_public_keys: vec![test_xpub(7), test_xpub(8)],
            minimum_signatures: 3,
            cosigner_index: 0,
        };
        assert!(matches!(
            KeyChainAddresser::new(&too_many_sigs, Network::Regtest),
            Err(SyncError::Derivation(_))
        ));

        let keys = KeysFile::single_signer(test_xpub(9));
        let addresser = KeyChainAddresser::new(&keys, Network::Regtest).unwrap();
        assert!(addresser
            .derive_address(&coordinate(1 << 31, 0, KeyChain::External))
            .is_err());
    }
}
