//! Decoding of `Any` fields in query replies into concrete types.

use std::collections::HashMap;

use cosmos_sdk_proto::cosmos::{
    auth::v1beta1::{BaseAccount, QueryAccountResponse},
    bank::v1beta1::QueryAllBalancesResponse,
    crypto::secp256k1::PubKey,
    staking::v1beta1::{QueryDelegatorDelegationsResponse, QueryValidatorsResponse},
    tx::v1beta1::SimulateResponse,
    vesting::v1beta1::{
        ContinuousVestingAccount, DelayedVestingAccount, PeriodicVestingAccount,
        PermanentLockedAccount,
    },
};
use prost::Message;
use prost_types::Any;

/// Account type of Ethermint based chains, which cosmos-sdk-proto does not ship.
#[derive(Clone, PartialEq, prost::Message)]
pub struct EthAccount {
    #[prost(message, optional, tag = "1")]
    pub base_account: Option<BaseAccount>,
    #[prost(string, tag = "2")]
    pub code_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPubKey {
    pub type_url: String,
    pub key: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedAccount {
    pub type_url: String,
    pub base: BaseAccount,
    /// The account's public key, if set and of a registered type.
    pub pub_key: Option<ResolvedPubKey>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Resolved {
    Account(Box<ResolvedAccount>),
    PubKey(ResolvedPubKey),
}

pub type Decoder = fn(&TypeRegistry, &Any) -> Result<Resolved, prost::DecodeError>;

/// Maps type URLs to decoders for the polymorphic values a reply may carry.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    decoders: HashMap<String, Decoder>,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut type_urls = self.decoders.keys().collect::<Vec<_>>();
        type_urls.sort();
        f.debug_struct("TypeRegistry")
            .field("type_urls", &type_urls)
            .finish()
    }
}

fn account_with(
    registry: &TypeRegistry,
    any: &Any,
    base: Option<BaseAccount>,
) -> Result<Resolved, prost::DecodeError> {
    let base = base.unwrap_or_default();
    let pub_key = match &base.pub_key {
        None => None,
        Some(pub_key) => match registry.resolve(pub_key)? {
            Some(Resolved::PubKey(pub_key)) => Some(pub_key),
            _ => None,
        },
    };
    Ok(Resolved::Account(Box::new(ResolvedAccount {
        type_url: any.type_url.clone(),
        base,
        pub_key,
    })))
}

fn base_account(registry: &TypeRegistry, any: &Any) -> Result<Resolved, prost::DecodeError> {
    account_with(registry, any, Some(BaseAccount::decode(any.value.as_slice())?))
}

fn continuous_vesting(registry: &TypeRegistry, any: &Any) -> Result<Resolved, prost::DecodeError> {
    let account = ContinuousVestingAccount::decode(any.value.as_slice())?;
    account_with(
        registry,
        any,
        account.base_vesting_account.and_then(|x| x.base_account),
    )
}

fn delayed_vesting(registry: &TypeRegistry, any: &Any) -> Result<Resolved, prost::DecodeError> {
    let account = DelayedVestingAccount::decode(any.value.as_slice())?;
    account_with(
        registry,
        any,
        account.base_vesting_account.and_then(|x| x.base_account),
    )
}

fn periodic_vesting(registry: &TypeRegistry, any: &Any) -> Result<Resolved, prost::DecodeError> {
    let account = PeriodicVestingAccount::decode(any.value.as_slice())?;
    account_with(
        registry,
        any,
        account.base_vesting_account.and_then(|x| x.base_account),
    )
}

fn permanent_locked(registry: &TypeRegistry, any: &Any) -> Result<Resolved, prost::DecodeError> {
    let account = PermanentLockedAccount::decode(any.value.as_slice())?;
    account_with(
        registry,
        any,
        account.base_vesting_account.and_then(|x| x.base_account),
    )
}

fn eth_account(registry: &TypeRegistry, any: &Any) -> Result<Resolved, prost::DecodeError> {
    let account = EthAccount::decode(any.value.as_slice())?;
    account_with(registry, any, account.base_account)
}

fn secp256k1_pub_key(_: &TypeRegistry, any: &Any) -> Result<Resolved, prost::DecodeError> {
    // ethsecp256k1 keys share the wire format of the Cosmos type.
    let PubKey { key } = PubKey::decode(any.value.as_slice())?;
    Ok(Resolved::PubKey(ResolvedPubKey {
        type_url: any.type_url.clone(),
        key,
    }))
}

impl TypeRegistry {
    /// Accounts and public keys of Cosmos SDK, Ethermint and Injective chains.
    pub fn cosmos() -> Self {
        let mut registry = TypeRegistry::default();
        let entries: [(&str, Decoder); 10] = [
            ("/cosmos.auth.v1beta1.BaseAccount", base_account),
            (
                "/cosmos.vesting.v1beta1.ContinuousVestingAccount",
                continuous_vesting,
            ),
            ("/cosmos.vesting.v1beta1.DelayedVestingAccount", delayed_vesting),
            ("/cosmos.vesting.v1beta1.PeriodicVestingAccount", periodic_vesting),
            ("/cosmos.vesting.v1beta1.PermanentLockedAccount", permanent_locked),
            ("/ethermint.types.v1.EthAccount", eth_account),
            ("/injective.types.v1beta1.EthAccount", eth_account),
            ("/cosmos.crypto.secp256k1.PubKey", secp256k1_pub_key),
            ("/ethermint.crypto.v1.ethsecp256k1.PubKey", secp256k1_pub_key),
            (
                "/injective.crypto.v1beta1.ethsecp256k1.PubKey",
                secp256k1_pub_key,
            ),
        ];
        for (type_url, decoder) in entries {
            registry.register(type_url, decoder);
        }
        registry
    }

    pub fn register(&mut self, type_url: impl Into<String>, decoder: Decoder) {
        self.decoders.insert(type_url.into(), decoder);
    }

    /// Decode a single value. Unregistered type URLs resolve to `None`.
    pub fn resolve(&self, any: &Any) -> Result<Option<Resolved>, prost::DecodeError> {
        match self.decoders.get(&any.type_url) {
            None => Ok(None),
            Some(decoder) => decoder(self, any).map(Some),
        }
    }

    pub fn resolve_all<'a>(
        &self,
        values: impl IntoIterator<Item = &'a Any>,
    ) -> Result<Vec<Resolved>, prost::DecodeError> {
        let mut resolved = vec![];
        for any in values {
            if let Some(x) = self.resolve(any)? {
                resolved.push(x);
            }
        }
        Ok(resolved)
    }
}

/// Reply types exposing the `Any` values they contain.
pub trait PolymorphicFields {
    fn polymorphic_fields(&self) -> Vec<&Any> {
        vec![]
    }
}

impl PolymorphicFields for QueryAccountResponse {
    fn polymorphic_fields(&self) -> Vec<&Any> {
        self.account.iter().collect()
    }
}

impl PolymorphicFields for QueryValidatorsResponse {
    fn polymorphic_fields(&self) -> Vec<&Any> {
        self.validators
            .iter()
            .filter_map(|validator| validator.consensus_pubkey.as_ref())
            .collect()
    }
}

impl PolymorphicFields for QueryAllBalancesResponse {}
impl PolymorphicFields for QueryDelegatorDelegationsResponse {}
impl PolymorphicFields for SimulateResponse {}
