//! The operations a wallet backend exposes, over every loaded chain.

use std::sync::Arc;
use std::time::Duration;

use cosmos_sdk_proto::cosmos::{
    auth::v1beta1::{BaseAccount, QueryAccountRequest},
    bank::v1beta1::{MsgSend, QueryAllBalancesRequest},
    base::{query::v1beta1::PageRequest, v1beta1::Coin},
    staking::v1beta1::{QueryDelegatorDelegationsRequest, QueryValidatorsRequest},
    tx::v1beta1::SimulateRequest,
};
use prost::Message;
use serde::{Deserialize, Serialize};

pub use crate::error::Error;

use crate::chain::{Chain, ChainSummary};
use crate::client::{Bridge, BridgeRequest, ConnectionManager, Resolved};
use crate::denom::{self, ParsedCoin};
use crate::error::{BridgeError, KeyError, TxError};
use crate::events::EventSubscriber;
use crate::refresh::RefreshWorker;
use crate::registry::RegistryDocuments;
use crate::store::ChainStore;
use crate::txbuilder::{SignMode, TxBuilder, TxContext};
use crate::wallet::{self, KeyAlgorithm, PrivateKey, COSMOS_COIN_TYPE};

/// Precision of `sdk.Dec` values such as commission rates.
const DEC_PRECISION: u32 = 18;
const VALIDATOR_PAGE_SIZE: u64 = 200;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountInput {
    pub mnemonic: String,
    #[serde(default)]
    pub passphrase: String,
    pub coin_type: u32,
    #[serde(default)]
    pub account_path: u32,
    #[serde(default)]
    pub index_path: u32,
    pub chain_prefixes: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreAccountInput {
    /// Hex encoded private key.
    pub key: String,
    /// Defaults to the Cosmos coin type.
    #[serde(default)]
    pub coin_type: Option<u32>,
    pub chain_prefixes: Vec<String>,
}

/// A private key and its address on each requested chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub key: String,
    pub addresses: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckBalanceInput {
    /// Found from the address prefix when absent.
    #[serde(default)]
    pub chain_id: Option<String>,
    pub address: String,
}

/// Amounts in display units of the chain's asset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub total_amount: String,
    pub available_amount: String,
    pub staked_amount: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendInput {
    #[serde(default)]
    pub chain_id: Option<String>,
    pub from: String,
    pub to: String,
    /// Display units.
    pub amount: String,
    /// Hex private key or mnemonic.
    pub key: String,
    #[serde(default)]
    pub memo: String,
    /// Gas limit, usually the `gasAdjusted` of a simulation.
    pub gas_adjusted: String,
    /// Total fee in display units.
    pub gas_price: String,
    #[serde(default)]
    pub sign_mode: Option<String>,
    #[serde(default)]
    pub account_number: Option<u64>,
    #[serde(default)]
    pub sequence: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub height: i64,
    pub tx_hash: String,
    pub data: String,
    pub gas_wanted: i64,
    pub gas_used: i64,
    pub raw_log: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendWithEventsInput {
    #[serde(flatten)]
    pub send: SendInput,
    /// Passed to the notifier as the `token` parameter.
    #[serde(rename = "firebaseToken")]
    pub notification_token: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendWithEventsResponse {
    pub tx_hash: String,
    pub with_events: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateInput {
    #[serde(default)]
    pub chain_id: Option<String>,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub key: String,
    #[serde(default)]
    pub memo: String,
    #[serde(default)]
    pub sign_mode: Option<String>,
}

/// Gas limit and fee quotes, fees in display units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateResponse {
    pub gas_adjusted: String,
    pub low_gas_price: String,
    pub average_gas_price: String,
    pub high_gas_price: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorInfo {
    pub operator_address: String,
    pub moniker: String,
    pub website: String,
    /// Bonded tokens in display units.
    pub tokens: String,
    /// Commission as a decimal fraction, e.g. `0.05`.
    pub commission_rate: String,
    pub jailed: bool,
}

/// A transaction signed and ready to broadcast.
struct PreparedTx {
    chain: Arc<Chain>,
    tx_bytes: Vec<u8>,
}

/// Entry point of the library: every wallet operation over the loaded chains.
///
/// Built with [crate::GatewayBuilder].
pub struct Gateway {
    pub(crate) store: ChainStore,
    pub(crate) bridge: Bridge,
    pub(crate) events: EventSubscriber,
    pub(crate) documents: Arc<dyn RegistryDocuments>,
    pub(crate) refresh_interval: Duration,
    pub(crate) gas_adjustment: f64,
    pub(crate) sign_mode: SignMode,
}

fn coin(chain: &Chain, display_amount: &str) -> Result<Coin, TxError> {
    let parsed: ParsedCoin = chain.from_display_to_base(display_amount)?.parse()?;
    Ok(parsed.into())
}

/// Accepts a 64 character hex private key or a mnemonic for account 0, index 0.
fn signing_key(key: &str, chain: &Chain) -> Result<PrivateKey, KeyError> {
    let key = key.trim();
    let hex_key = key.strip_prefix("0x").unwrap_or(key);
    if hex_key.len() == 64 && hex_key.bytes().all(|b| b.is_ascii_hexdigit()) {
        PrivateKey::from_hex(hex_key, KeyAlgorithm::from_coin_type(chain.slip44)?)
    } else {
        wallet::create_account_from_mnemonic(key, "", chain.slip44, 0, 0)
    }
}

impl Gateway {
    pub fn store(&self) -> &ChainStore {
        &self.store
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        self.bridge.connections()
    }

    pub fn events(&self) -> &EventSubscriber {
        &self.events
    }

    /// A worker reloading the chain registry into this gateway's store.
    pub fn refresh_worker(&self) -> RefreshWorker {
        RefreshWorker::new(
            self.documents.clone(),
            self.store.clone(),
            self.refresh_interval,
        )
    }

    pub fn list_chains(&self) -> Vec<ChainSummary> {
        self.store.summaries()
    }

    pub fn create_mnemonic(&self, size: usize) -> Result<String, Error> {
        Ok(wallet::create_mnemonic(size)?)
    }

    pub fn create_account(&self, input: &CreateAccountInput) -> Result<AccountResponse, Error> {
        let key = wallet::create_account_from_mnemonic(
            &input.mnemonic,
            &input.passphrase,
            input.coin_type,
            input.account_path,
            input.index_path,
        )?;
        Ok(AccountResponse {
            key: key.to_hex(),
            addresses: key.addresses(input.chain_prefixes.iter().map(String::as_str))?,
        })
    }

    pub fn restore_account(&self, input: &RestoreAccountInput) -> Result<AccountResponse, Error> {
        if input.chain_prefixes.is_empty() {
            return Err(KeyError::NoChainPrefixes.into());
        }
        let algorithm = KeyAlgorithm::from_coin_type(input.coin_type.unwrap_or(COSMOS_COIN_TYPE))?;
        let key = PrivateKey::from_hex(&input.key, algorithm)?;
        Ok(AccountResponse {
            key: key.to_hex(),
            addresses: key.addresses(input.chain_prefixes.iter().map(String::as_str))?,
        })
    }

    pub fn convert_address_prefix(&self, address: &str, prefix: &str) -> Result<String, Error> {
        Ok(crate::address::convert_address_prefix(address, prefix)?)
    }

    /// Find the chain of a transfer, by ID or else by the address prefixes.
    ///
    /// Never touches the network.
    fn resolve_chain(
        &self,
        chain_id: Option<&str>,
        from: &str,
        to: &str,
    ) -> Result<Arc<Chain>, TxError> {
        if let Some(chain_id) = chain_id.filter(|x| !x.is_empty()) {
            return Ok(self.store.get_by_id(chain_id)?);
        }
        if from.is_empty() || to.is_empty() {
            return Err(TxError::MissingChain);
        }
        let snapshot = self.store.snapshot();
        let from_chain = snapshot.get_by_address(from)?;
        let to_chain = snapshot.get_by_address(to)?;
        if from_chain.chain_id != to_chain.chain_id {
            return Err(TxError::InvalidChainPair {
                from: from.to_owned(),
                to: to.to_owned(),
            });
        }
        Ok(from_chain)
    }

    /// Account number and sequence of `address`, from the node.
    async fn account_numbers(&self, chain_id: &str, address: &str) -> Result<(u64, u64), TxError> {
        let reply = self
            .bridge
            .query(
                chain_id,
                QueryAccountRequest {
                    address: address.to_owned(),
                },
            )
            .await?;
        let count = reply.block_heights().len();
        if count != 1 {
            return Err(BridgeError::ResponseHeight {
                path: QueryAccountRequest::PATH.to_owned(),
                count,
            }
            .into());
        }

        let resolved = reply.resolved.iter().find_map(|x| match x {
            Resolved::Account(account) => Some((account.base.account_number, account.base.sequence)),
            Resolved::PubKey(_) => None,
        });
        match (resolved, reply.value.account) {
            (Some(numbers), _) => Ok(numbers),
            (None, Some(any)) if any.type_url == "/cosmos.auth.v1beta1.BaseAccount" => {
                let base = BaseAccount::decode(any.value.as_slice()).map_err(|source| {
                    BridgeError::Codec {
                        path: QueryAccountRequest::PATH.to_owned(),
                        type_name: "BaseAccount",
                        source,
                    }
                })?;
                Ok((base.account_number, base.sequence))
            }
            (None, _) => Err(TxError::MissingAccount {
                address: address.to_owned(),
            }),
        }
    }

    fn sign_mode(&self, requested: Option<&str>) -> Result<SignMode, TxError> {
        match requested.filter(|x| !x.is_empty()) {
            None => Ok(self.sign_mode),
            Some(mode) => mode.parse(),
        }
    }

    async fn prepare_send(&self, input: &SendInput) -> Result<PreparedTx, TxError> {
        let chain = self.resolve_chain(input.chain_id.as_deref(), &input.from, &input.to)?;
        let amount = coin(&chain, &input.amount)?;
        let fee = coin(&chain, &input.gas_price)?;
        let gas_limit = input
            .gas_adjusted
            .trim()
            .parse::<u64>()
            .map_err(|_| TxError::InvalidGasLimit {
                gas: input.gas_adjusted.clone(),
            })?;
        let sign_mode = self.sign_mode(input.sign_mode.as_deref())?;
        let key = signing_key(&input.key, &chain)?;

        let (account_number, sequence) = match (input.account_number, input.sequence) {
            (Some(account_number), Some(sequence)) => (account_number, sequence),
            (account_number, sequence) => {
                let signer = key.address(&chain.bech32_prefix)?.to_string();
                let queried = self.account_numbers(&chain.chain_id, &signer).await?;
                (
                    account_number.unwrap_or(queried.0),
                    sequence.unwrap_or(queried.1),
                )
            }
        };

        let mut builder = TxBuilder::default();
        builder
            .add_message(MsgSend {
                from_address: input.from.clone(),
                to_address: input.to.clone(),
                amount: vec![amount],
            })
            .set_memo(input.memo.clone());
        let tx_bytes = builder.sign(&TxContext {
            chain_id: chain.chain_id.clone(),
            prefix: chain.bech32_prefix.clone(),
            key,
            account_number,
            sequence,
            gas_limit,
            fee: vec![fee],
            sign_mode,
        })?;
        Ok(PreparedTx { chain, tx_bytes })
    }

    async fn broadcast(&self, chain_id: &str, tx_bytes: Vec<u8>) -> Result<SendResponse, TxError> {
        let connection = self.connections().connection(chain_id)?;
        let active = connection.client().await?;
        let res = active
            .client()
            .broadcast_tx_sync(tx_bytes)
            .await
            .map_err(|source| {
                connection.invalidate_generation(active.generation());
                TxError::Broadcast {
                    endpoint: active.endpoint().to_owned(),
                    source,
                }
            })?;
        if res.code != 0 {
            return Err(TxError::BroadcastFailed {
                code: res.code,
                tx_hash: res.hash,
                raw_log: res.log,
            });
        }
        tracing::debug!("Broadcast transaction {} on {chain_id}", res.hash);
        Ok(SendResponse {
            height: 0,
            tx_hash: res.hash,
            data: res.data,
            gas_wanted: 0,
            gas_used: 0,
            raw_log: res.log,
        })
    }

    /// Sign and broadcast a transfer. Only the mempool check is awaited.
    pub async fn send_transaction(&self, input: &SendInput) -> Result<SendResponse, Error> {
        let PreparedTx { chain, tx_bytes } = self.prepare_send(input).await?;
        Ok(self.broadcast(&chain.chain_id, tx_bytes).await?)
    }

    /// Like [Self::send_transaction], additionally notifying about the
    /// delivered transaction.
    ///
    /// Failing to subscribe does not fail the send, it is reported through
    /// `with_events`.
    pub async fn send_transaction_with_events(
        &self,
        input: &SendWithEventsInput,
    ) -> Result<SendWithEventsResponse, Error> {
        let PreparedTx { chain, tx_bytes } = self.prepare_send(&input.send).await?;
        let params = [("token".to_owned(), input.notification_token.clone())].into();
        let tag = match self
            .events
            .subscribe(&chain.chain_id, &input.send.from, params)
            .await
        {
            Ok(tag) => Some(tag),
            Err(e) => {
                tracing::warn!(
                    "Sending on {} without events, unable to subscribe: {e}",
                    chain.chain_id
                );
                None
            }
        };

        match self.broadcast(&chain.chain_id, tx_bytes).await {
            Ok(res) => Ok(SendWithEventsResponse {
                tx_hash: res.tx_hash,
                with_events: tag.is_some(),
            }),
            Err(e) => {
                if let Some(tag) = tag {
                    self.events.unsubscribe(&tag);
                }
                Err(e.into())
            }
        }
    }

    /// Estimate the gas of a transfer and quote fees for each gas price tier.
    pub async fn simulate_transaction(
        &self,
        input: &SimulateInput,
    ) -> Result<SimulateResponse, Error> {
        Ok(self.simulate_inner(input).await?)
    }

    async fn simulate_inner(&self, input: &SimulateInput) -> Result<SimulateResponse, TxError> {
        let chain = self.resolve_chain(input.chain_id.as_deref(), &input.from, &input.to)?;
        let (_, exponent) = chain.base_denom()?;
        let amount = coin(&chain, &input.amount)?;
        let sign_mode = self.sign_mode(input.sign_mode.as_deref())?;
        let key = signing_key(&input.key, &chain)?;

        let signer = key.address(&chain.bech32_prefix)?.to_string();
        let sequence = match self.account_numbers(&chain.chain_id, &signer).await {
            Ok((_, sequence)) => sequence,
            Err(TxError::Bridge(e)) if e.is_not_found() => 0,
            Err(e) => return Err(e),
        };

        let mut builder = TxBuilder::default();
        builder
            .add_message(MsgSend {
                from_address: input.from.clone(),
                to_address: input.to.clone(),
                amount: vec![amount],
            })
            .set_memo(input.memo.clone());
        #[allow(deprecated)]
        let request = SimulateRequest {
            tx: None,
            tx_bytes: builder.simulation_tx(&key, sequence, sign_mode),
        };
        let reply = self.bridge.query(&chain.chain_id, request).await?;
        let gas_used = reply.value.gas_info.ok_or(TxError::MissingGasInfo)?.gas_used;

        let gas_adjusted = denom::scale_amount(&gas_used.to_string(), self.gas_adjustment)?;
        let quote = |price: f64| {
            denom::from_base_to_display(&denom::scale_amount(&gas_adjusted, price)?, exponent)
        };
        Ok(SimulateResponse {
            gas_adjusted: gas_adjusted.clone(),
            low_gas_price: quote(chain.gas_prices.low)?,
            average_gas_price: quote(chain.gas_prices.average)?,
            high_gas_price: quote(chain.gas_prices.high)?,
        })
    }

    /// Available, staked and total amounts of the chain's asset.
    pub async fn check_balance(&self, input: &CheckBalanceInput) -> Result<BalanceResponse, Error> {
        let chain = match input.chain_id.as_deref().filter(|x| !x.is_empty()) {
            Some(chain_id) => self.store.get_by_id(chain_id)?,
            None => self.store.get_by_address(&input.address)?,
        };
        let (base, _) = chain.base_denom()?;

        let balances = self
            .bridge
            .query(
                &chain.chain_id,
                QueryAllBalancesRequest {
                    address: input.address.clone(),
                    pagination: None,
                },
            )
            .await?;
        let available = balances
            .value
            .balances
            .iter()
            .find(|coin| coin.denom == base)
            .map_or("0", |coin| coin.amount.as_str());

        let delegations = self
            .bridge
            .query(
                &chain.chain_id,
                QueryDelegatorDelegationsRequest {
                    delegator_addr: input.address.clone(),
                    pagination: None,
                },
            )
            .await?;
        let mut staked = "0".to_owned();
        for balance in delegations
            .value
            .delegation_responses
            .iter()
            .filter_map(|x| x.balance.as_ref())
            .filter(|coin| coin.denom == base)
        {
            staked = denom::add_amounts(&staked, &balance.amount)?;
        }
        let total = denom::add_amounts(available, &staked)?;

        Ok(BalanceResponse {
            total_amount: chain.from_base_to_display(&total)?,
            available_amount: chain.from_base_to_display(available)?,
            staked_amount: chain.from_base_to_display(&staked)?,
        })
    }

    /// Every bonded validator of the chain.
    pub async fn list_validators(&self, chain_id: &str) -> Result<Vec<ValidatorInfo>, Error> {
        let chain = self.store.get_by_id(chain_id)?;
        let mut validators = vec![];
        let mut next_key = vec![];
        loop {
            let reply = self
                .bridge
                .query(
                    chain_id,
                    QueryValidatorsRequest {
                        status: "BOND_STATUS_BONDED".to_owned(),
                        pagination: Some(PageRequest {
                            key: next_key,
                            offset: 0,
                            limit: VALIDATOR_PAGE_SIZE,
                            count_total: false,
                            reverse: false,
                        }),
                    },
                )
                .await?;
            for validator in reply.value.validators {
                let description = validator.description.unwrap_or_default();
                let rate = validator
                    .commission
                    .and_then(|x| x.commission_rates)
                    .map(|x| x.rate)
                    .filter(|x| !x.is_empty())
                    .unwrap_or_else(|| "0".to_owned());
                validators.push(ValidatorInfo {
                    operator_address: validator.operator_address,
                    moniker: description.moniker,
                    website: description.website,
                    tokens: chain.from_base_to_display(&validator.tokens)?,
                    commission_rate: denom::from_base_to_display(&rate, DEC_PRECISION)?,
                    jailed: validator.jailed,
                });
            }
            next_key = reply
                .value
                .pagination
                .map(|x| x.next_key)
                .unwrap_or_default();
            if next_key.is_empty() {
                break Ok(validators);
            }
        }
    }
}
