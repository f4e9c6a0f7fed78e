use std::fmt::{Debug, Display};
use std::str::FromStr;

use bitcoin::hashes::{ripemd160, sha256, Hash};
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::util::bip32::{DerivationPath, ExtendedPrivKey};
use once_cell::sync::OnceCell;
use rand::RngCore;
use sha3::{Digest, Keccak256};

use crate::address::{Address, RawAddress};
use crate::error::{AddressError, KeyError};

/// SLIP-44 coin type of chains using plain Cosmos secp256k1 keys.
pub const COSMOS_COIN_TYPE: u32 = 118;
/// SLIP-44 coin type of Ethermint-style chains.
pub const ETHEREUM_COIN_TYPE: u32 = 60;

/// Signature scheme family selected by a chain's coin type.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    /// Cosmos `secp256k1`: sha256 digests, ripemd160(sha256) addresses.
    Secp256k1,
    /// Ethermint `eth_secp256k1`: keccak256 digests and Ethereum addresses.
    EthSecp256k1,
}

impl KeyAlgorithm {
    pub fn from_coin_type(coin_type: u32) -> Result<Self, KeyError> {
        match coin_type {
            COSMOS_COIN_TYPE => Ok(KeyAlgorithm::Secp256k1),
            ETHEREUM_COIN_TYPE => Ok(KeyAlgorithm::EthSecp256k1),
            _ => Err(KeyError::UnsupportedCoinType { coin_type }),
        }
    }

    pub fn coin_type(self) -> u32 {
        match self {
            KeyAlgorithm::Secp256k1 => COSMOS_COIN_TYPE,
            KeyAlgorithm::EthSecp256k1 => ETHEREUM_COIN_TYPE,
        }
    }

    /// Type URL of the public key when packed into an `Any`.
    pub fn pub_key_type_url(self) -> &'static str {
        match self {
            KeyAlgorithm::Secp256k1 => "/cosmos.crypto.secp256k1.PubKey",
            KeyAlgorithm::EthSecp256k1 => "/ethermint.crypto.v1.ethsecp256k1.PubKey",
        }
    }

    fn signature_len(self) -> usize {
        match self {
            KeyAlgorithm::Secp256k1 => 64,
            KeyAlgorithm::EthSecp256k1 => 65,
        }
    }
}

/// BIP44 path `m/44'/{coin_type}'/{account}'/0/{index}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HdPath {
    pub coin_type: u32,
    pub account: u32,
    pub index: u32,
}

impl HdPath {
    pub fn as_derivation_path(&self) -> Result<DerivationPath, KeyError> {
        let path = self.to_string();
        path.parse()
            .map_err(|source| KeyError::InvalidDerivationPath { path, source })
    }
}

impl Display for HdPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "m/44'/{}'/{}'/0/{}",
            self.coin_type, self.account, self.index
        )
    }
}

/// A seed phrase for a wallet
#[derive(Clone)]
pub struct SeedPhrase {
    mnemonic: bip39::Mnemonic,
}

impl SeedPhrase {
    /// Generate a random phrase of 12 or 24 words.
    pub fn random(words: usize) -> Result<SeedPhrase, KeyError> {
        let entropy_bits = match words {
            12 => 128,
            24 => 256,
            _ => return Err(KeyError::InvalidMnemonicSize { size: words }),
        };
        let mut entropy = vec![0u8; entropy_bits / 8];
        rand::thread_rng().fill_bytes(&mut entropy);
        let mnemonic = bip39::Mnemonic::from_entropy(&entropy)
            .map_err(|e| KeyError::InvalidMnemonic(e.to_string()))?;
        Ok(SeedPhrase { mnemonic })
    }

    pub fn word_count(&self) -> usize {
        self.mnemonic.word_count()
    }

    fn to_seed(&self, passphrase: &str) -> [u8; 64] {
        self.mnemonic.to_seed(passphrase)
    }
}

impl FromStr for SeedPhrase {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mnemonic = bip39::Mnemonic::parse_normalized(s.trim())
            .map_err(|e| KeyError::InvalidMnemonic(e.to_string()))?;
        Ok(SeedPhrase { mnemonic })
    }
}

impl Display for SeedPhrase {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic)
    }
}

/// Generate a fresh mnemonic of `size` words (12 or 24).
pub fn create_mnemonic(size: usize) -> Result<String, KeyError> {
    SeedPhrase::random(size).map(|phrase| phrase.to_string())
}

/// Derive the account for `coin_type` at `m/44'/{coin_type}'/{account}'/0/{index}`.
pub fn create_account_from_mnemonic(
    mnemonic: &str,
    passphrase: &str,
    coin_type: u32,
    account: u32,
    index: u32,
) -> Result<PrivateKey, KeyError> {
    let algorithm = KeyAlgorithm::from_coin_type(coin_type)?;
    let phrase = mnemonic.parse::<SeedPhrase>()?;
    PrivateKey::derive(
        &phrase,
        passphrase,
        algorithm,
        HdPath {
            coin_type,
            account,
            index,
        },
    )
}

/// Restore a Cosmos secp256k1 key from its hex encoding.
pub fn create_account_from_hex_key(hex_key: &str) -> Result<PrivateKey, KeyError> {
    PrivateKey::from_hex(hex_key, KeyAlgorithm::Secp256k1)
}

/// A private key capable of signing for one key family.
///
/// Lives only in process memory. [Debug] shows the public half only.
#[derive(Clone)]
pub struct PrivateKey {
    algorithm: KeyAlgorithm,
    secret: SecretKey,
    public_key: PublicKey,
}

fn global_secp() -> &'static Secp256k1<All> {
    static CELL: OnceCell<Secp256k1<All>> = OnceCell::new();
    CELL.get_or_init(Secp256k1::new)
}

impl PrivateKey {
    pub fn derive(
        phrase: &SeedPhrase,
        passphrase: &str,
        algorithm: KeyAlgorithm,
        path: HdPath,
    ) -> Result<Self, KeyError> {
        let secp = global_secp();
        let root = ExtendedPrivKey::new_master(bitcoin::Network::Bitcoin, &phrase.to_seed(passphrase))
            .map_err(KeyError::Derivation)?;
        let derived = root
            .derive_priv(secp, &path.as_derivation_path()?)
            .map_err(KeyError::Derivation)?;
        Ok(Self::from_secret(derived.private_key, algorithm))
    }

    pub fn from_hex(hex_key: &str, algorithm: KeyAlgorithm) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key.trim().trim_start_matches("0x"))?;
        let secret = SecretKey::from_slice(&bytes).map_err(KeyError::InvalidSecretKey)?;
        Ok(Self::from_secret(secret, algorithm))
    }

    fn from_secret(secret: SecretKey, algorithm: KeyAlgorithm) -> Self {
        PrivateKey {
            algorithm,
            public_key: PublicKey::from_secret_key(global_secp(), &secret),
            secret,
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.secret.secret_bytes())
    }

    /// Compressed SEC1 public key, as carried in signer infos.
    pub fn public_key_bytes(&self) -> [u8; 33] {
        self.public_key.serialize()
    }

    pub fn raw_address(&self) -> RawAddress {
        match self.algorithm {
            KeyAlgorithm::Secp256k1 => {
                let sha = sha256::Hash::hash(&self.public_key.serialize());
                ripemd160::Hash::hash(sha.as_ref()).into_inner().into()
            }
            KeyAlgorithm::EthSecp256k1 => {
                let uncompressed = self.public_key.serialize_uncompressed();
                let hash = Keccak256::digest(&uncompressed[1..]);
                let mut raw_address = [0u8; 20];
                raw_address.copy_from_slice(&hash[12..]);
                raw_address.into()
            }
        }
    }

    pub fn address(&self, prefix: &str) -> Result<Address, AddressError> {
        self.raw_address().with_hrp(prefix)
    }

    /// Addresses of this key on every given chain prefix.
    pub fn addresses<'a>(
        &self,
        prefixes: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<String>, AddressError> {
        let raw_address = self.raw_address();
        prefixes
            .into_iter()
            .map(|prefix| raw_address.with_hrp(prefix).map(|x| x.to_string()))
            .collect()
    }

    pub fn sign_bytes(&self, msg: &[u8]) -> Result<Vec<u8>, KeyError> {
        match self.algorithm {
            KeyAlgorithm::Secp256k1 => {
                let digest = sha256::Hash::hash(msg);
                let msg = Message::from_slice(digest.as_ref()).map_err(KeyError::Signing)?;
                Ok(global_secp()
                    .sign_ecdsa(&msg, &self.secret)
                    .serialize_compact()
                    .to_vec())
            }
            KeyAlgorithm::EthSecp256k1 => {
                let digest = Keccak256::digest(msg);
                let msg = Message::from_slice(digest.as_slice()).map_err(KeyError::Signing)?;
                let (recovery_id, signature) = global_secp()
                    .sign_ecdsa_recoverable(&msg, &self.secret)
                    .serialize_compact();
                let mut signature = signature.to_vec();
                signature.push(recovery_id.to_i32() as u8);
                Ok(signature)
            }
        }
    }

    /// All-zero signature with the length a real one would have.
    pub fn placeholder_signature(&self) -> Vec<u8> {
        vec![0; self.algorithm.signature_len()]
    }
}

impl Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("algorithm", &self.algorithm)
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn mnemonic_sizes() {
        assert_eq!(
            create_mnemonic(12).unwrap().split_whitespace().count(),
            12
        );
        assert_eq!(
            create_mnemonic(24).unwrap().split_whitespace().count(),
            24
        );
        for size in [0, 11, 15, 18, 25] {
            assert_eq!(
                create_mnemonic(size).unwrap_err().to_string(),
                "invalid mnemonic size, available values: 12, 24; provided size ".to_owned()
                    + &size.to_string()
            );
        }
    }

    #[test]
    fn generated_mnemonic_parses() {
        let phrase = create_mnemonic(24).unwrap();
        let key = create_account_from_mnemonic(&phrase, "", 118, 0, 0).unwrap();
        assert_eq!(key.algorithm(), KeyAlgorithm::Secp256k1);
    }

    #[test]
    fn cosmos_fixed_vector() {
        let key = create_account_from_mnemonic(PHRASE, "", 118, 0, 0).unwrap();
        assert_eq!(
            key.to_hex(),
            "c4a48e2fce1481cd3294b4490f6678090ea98d3d0e5cd984558ab0968741b104"
        );
        assert_eq!(
            hex::encode(key.public_key_bytes()),
            "024f4e2ad99c34d60b9ba6283c9431a8418af8673212961f97a77b6377fcd05b62"
        );
        assert_eq!(
            key.addresses(["cosmos", "osmo"]).unwrap(),
            vec![
                "cosmos19rl4cm2hmr8afy4kldpxz3fka4jguq0auqdal4".to_owned(),
                "osmo19rl4cm2hmr8afy4kldpxz3fka4jguq0a5m7df8".to_owned(),
            ]
        );
    }

    #[test]
    fn account_and_index_change_the_key() {
        let key = create_account_from_mnemonic(PHRASE, "", 118, 1, 3).unwrap();
        assert_eq!(
            key.address("cosmos").unwrap().to_string(),
            "cosmos16rw7jsx8ntm5zsfgm64nytk94537qr4um5v2kr"
        );
        let key = create_account_from_mnemonic(PHRASE, "secret", 118, 0, 0).unwrap();
        assert_eq!(
            key.address("cosmos").unwrap().to_string(),
            "cosmos10k4ecp3w5jt6mgte3u4mmew56pj3ukd2j977j3"
        );
    }

    #[test]
    fn ethermint_fixed_vector() {
        let key = create_account_from_mnemonic(PHRASE, "", 60, 0, 0).unwrap();
        assert_eq!(key.algorithm(), KeyAlgorithm::EthSecp256k1);
        assert_eq!(
            key.to_hex(),
            "1ab42cc412b618bdea3a599e3c9bae199ebf030895b039e9db1e30dafb12b727"
        );
        assert_eq!(
            hex::encode(key.raw_address()),
            "9858effd232b4033e47d90003d41ec34ecaeda94"
        );
        assert_eq!(
            key.address("evmos").unwrap().to_string(),
            "evmos1npvwllfr9dqr8erajqqr6s0vxnk2ak55t3r99j"
        );
    }

    #[test]
    fn derivation_is_pure() {
        let first = create_account_from_mnemonic(PHRASE, "", 60, 2, 7).unwrap();
        let second = create_account_from_mnemonic(PHRASE, "", 60, 2, 7).unwrap();
        assert_eq!(first.to_hex(), second.to_hex());
    }

    #[test]
    fn unsupported_coin_type() {
        assert!(matches!(
            create_account_from_mnemonic(PHRASE, "", 529, 0, 0),
            Err(KeyError::UnsupportedCoinType { coin_type: 529 })
        ));
    }

    #[test]
    fn hex_keys() {
        let key = create_account_from_hex_key(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        assert_eq!(
            key.address("cosmos").unwrap().to_string(),
            "cosmos1w508d6qejxtdg4y5r3zarvary0c5xw7k6ah60c"
        );
        assert!(matches!(
            create_account_from_hex_key("not hex"),
            Err(KeyError::Hex(_))
        ));
        create_account_from_hex_key("00").unwrap_err();

        let restored = create_account_from_hex_key(
            "c4a48e2fce1481cd3294b4490f6678090ea98d3d0e5cd984558ab0968741b104",
        )
        .unwrap();
        assert_eq!(
            restored.address("cosmos").unwrap().to_string(),
            "cosmos19rl4cm2hmr8afy4kldpxz3fka4jguq0auqdal4"
        );
    }

    #[test]
    fn signature_shapes() {
        let cosmos = create_account_from_mnemonic(PHRASE, "", 118, 0, 0).unwrap();
        let eth = create_account_from_mnemonic(PHRASE, "", 60, 0, 0).unwrap();
        assert_eq!(cosmos.sign_bytes(b"hello").unwrap().len(), 64);
        assert_eq!(eth.sign_bytes(b"hello").unwrap().len(), 65);
        assert_eq!(cosmos.placeholder_signature(), vec![0; 64]);
        assert_eq!(eth.placeholder_signature(), vec![0; 65]);
        // RFC6979 signing is deterministic
        assert_eq!(
            cosmos.sign_bytes(b"hello").unwrap(),
            cosmos.sign_bytes(b"hello").unwrap()
        );
    }

    #[test]
    fn debug_hides_secret() {
        let key = create_account_from_mnemonic(PHRASE, "", 118, 0, 0).unwrap();
        let debug = format!("{key:?}");
        assert!(!debug.contains(&key.to_hex()));
    }
}
