use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cosmos_gateway::{
    clap::GatewayOpt, CheckBalanceInput, CreateAccountInput, Gateway, RestoreAccountInput,
    SendInput, SendWithEventsInput, SendWithEventsResponse, SimulateInput, TxEvent, TxNotifier,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Command line tool for Cosmos wallet operations across the chain registry
#[derive(clap::Parser)]
struct Cmd {
    #[clap(flatten)]
    opt: Opt,
    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(clap::Parser)]
struct Opt {
    #[clap(flatten)]
    gateway_opt: GatewayOpt,
    /// Turn on verbose output
    #[clap(long, short, global = true)]
    verbose: bool,
}

impl Opt {
    fn init_logger(&self) {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(if self.verbose {
                format!("{}=debug,cosmos_gateway=debug,info", env!("CARGO_CRATE_NAME"))
            } else {
                "info".to_owned()
            })
        });
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[derive(clap::Parser)]
struct TransferOpt {
    /// Hex private key or mnemonic phrase
    #[clap(long, env = "COSMOS_KEY")]
    key: String,
    /// Sender address
    #[clap(long)]
    from: String,
    /// Chain ID, found from the addresses when absent
    #[clap(long)]
    chain_id: Option<String>,
    /// Memo to put on transaction
    #[clap(long, default_value = "")]
    memo: String,
    /// Sign mode override: direct or amino-json
    #[clap(long)]
    sign_mode: Option<String>,
    /// Destination address
    to: String,
    /// Amount in display units, e.g. 1.5
    amount: String,
}

impl TransferOpt {
    fn simulate_input(&self) -> SimulateInput {
        SimulateInput {
            chain_id: self.chain_id.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            amount: self.amount.clone(),
            key: self.key.clone(),
            memo: self.memo.clone(),
            sign_mode: self.sign_mode.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cmd::parse();
    cmd.opt.init_logger();

    cmd.subcommand.go(cmd.opt).await
}

#[derive(clap::Parser)]
enum Subcommand {
    /// List every loaded chain
    ListChains {},
    /// Generate a new mnemonic phrase
    CreateMnemonic {
        /// Number of words: 12 or 24
        #[clap(long, default_value_t = 24)]
        size: usize,
    },
    /// Derive a private key and its addresses from a mnemonic
    CreateAccount {
        /// Mnemonic phrase
        #[clap(long, env = "COSMOS_WALLET")]
        mnemonic: String,
        /// SLIP-44 coin type: 118 or 60
        #[clap(long, default_value_t = 118)]
        coin_type: u32,
        #[clap(long, default_value_t = 0)]
        account: u32,
        #[clap(long, default_value_t = 0)]
        index: u32,
        /// Address prefixes to print, e.g. cosmos osmo
        #[clap(required = true)]
        prefixes: Vec<String>,
    },
    /// Print the addresses of a hex private key
    RestoreAccount {
        #[clap(long, env = "COSMOS_KEY")]
        key: String,
        #[clap(long)]
        coin_type: Option<u32>,
        prefixes: Vec<String>,
    },
    /// Print available, staked and total balance
    Balance {
        address: String,
        #[clap(long)]
        chain_id: Option<String>,
    },
    /// List bonded validators
    Validators { chain_id: String },
    /// Estimate gas and fees for a transfer
    Simulate {
        #[clap(flatten)]
        transfer: TransferOpt,
    },
    /// Send coins, simulating first unless a gas limit and fee are given
    Send {
        #[clap(flatten)]
        transfer: TransferOpt,
        /// Gas limit
        #[clap(long, requires = "fee")]
        gas: Option<u64>,
        /// Total fee in display units
        #[clap(long, requires = "gas")]
        fee: Option<String>,
        /// Wait up to this many seconds for the delivered transaction
        #[clap(long)]
        watch: Option<u64>,
    },
    /// Keep the registry fresh until interrupted
    Serve {},
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

impl Subcommand {
    pub(crate) async fn go(self, opt: Opt) -> Result<()> {
        match self {
            Subcommand::ListChains {} => {
                let gateway = opt.gateway_opt.build().await?;
                for chain in gateway.list_chains() {
                    println!("{}\t{}\t{}", chain.id, chain.prefix, chain.display);
                }
            }
            Subcommand::CreateMnemonic { size } => {
                let gateway = offline(&opt)?;
                println!("{}", gateway.create_mnemonic(size)?);
            }
            Subcommand::CreateAccount {
                mnemonic,
                coin_type,
                account,
                index,
                prefixes,
            } => {
                let gateway = offline(&opt)?;
                print_json(&gateway.create_account(&CreateAccountInput {
                    mnemonic,
                    passphrase: String::new(),
                    coin_type,
                    account_path: account,
                    index_path: index,
                    chain_prefixes: prefixes,
                })?)?;
            }
            Subcommand::RestoreAccount {
                key,
                coin_type,
                prefixes,
            } => {
                let gateway = offline(&opt)?;
                print_json(&gateway.restore_account(&RestoreAccountInput {
                    key,
                    coin_type,
                    chain_prefixes: prefixes,
                })?)?;
            }
            Subcommand::Balance { address, chain_id } => {
                let gateway = opt.gateway_opt.build().await?;
                let balance = gateway
                    .check_balance(&CheckBalanceInput {
                        chain_id,
                        address: address.clone(),
                    })
                    .await
                    .with_context(|| format!("Checking balance of {address}"))?;
                print_json(&balance)?;
            }
            Subcommand::Validators { chain_id } => {
                let gateway = opt.gateway_opt.build().await?;
                for validator in gateway.list_validators(&chain_id).await? {
                    println!(
                        "{}\t{}\t{}\t{}{}",
                        validator.operator_address,
                        validator.moniker,
                        validator.tokens,
                        validator.commission_rate,
                        if validator.jailed { "\tjailed" } else { "" }
                    );
                }
            }
            Subcommand::Simulate { transfer } => {
                let gateway = opt.gateway_opt.build().await?;
                print_json(
                    &gateway
                        .simulate_transaction(&transfer.simulate_input())
                        .await?,
                )?;
            }
            Subcommand::Send {
                transfer,
                gas,
                fee,
                watch,
            } => {
                let (sender, receiver) = mpsc::unbounded_channel();
                let mut builder = opt.gateway_opt.builder();
                if watch.is_some() {
                    builder.set_notifier(Some(Arc::new(ChannelNotifier(sender))));
                }
                let gateway = builder
                    .build()
                    .await
                    .context("Unable to load the chain registry")?;
                send(&gateway, transfer, gas.zip(fee), watch, receiver).await?;
            }
            Subcommand::Serve {} => {
                let gateway = opt.gateway_opt.build().await?;
                let worker = gateway.refresh_worker();
                tracing::info!(
                    "Serving {} chains, refreshing every {:?}",
                    gateway.list_chains().len(),
                    worker.interval()
                );
                let cancel = CancellationToken::new();
                let task = tokio::spawn(worker.run(cancel.clone()));
                tokio::signal::ctrl_c().await?;
                tracing::info!("Shutting down");
                cancel.cancel();
                gateway.events().shutdown();
                task.await?;
            }
        }

        Ok(())
    }
}

/// A gateway for key operations only, no registry download.
fn offline(opt: &Opt) -> Result<Gateway> {
    Ok(opt.gateway_opt.builder().build_with_chains(vec![])?)
}

async fn send(
    gateway: &Gateway,
    transfer: TransferOpt,
    gas_and_fee: Option<(u64, String)>,
    watch: Option<u64>,
    mut events: mpsc::UnboundedReceiver<TxEvent>,
) -> Result<()> {
    let (gas, fee) = match gas_and_fee {
        Some(pair) => pair,
        None => {
            let quote = gateway
                .simulate_transaction(&transfer.simulate_input())
                .await
                .context("Simulating transfer")?;
            tracing::info!(
                "Simulated gas {}, paying {}",
                quote.gas_adjusted,
                quote.average_gas_price
            );
            (quote.gas_adjusted.parse()?, quote.average_gas_price)
        }
    };
    let input = SendInput {
        chain_id: transfer.chain_id,
        from: transfer.from,
        to: transfer.to,
        amount: transfer.amount,
        key: transfer.key,
        memo: transfer.memo,
        gas_adjusted: gas.to_string(),
        gas_price: fee,
        sign_mode: transfer.sign_mode,
        account_number: None,
        sequence: None,
    };

    let Some(seconds) = watch else {
        return print_json(&gateway.send_transaction(&input).await?);
    };
    let res = gateway
        .send_transaction_with_events(&SendWithEventsInput {
            send: input,
            notification_token: String::new(),
        })
        .await?;
    print_json(&res)?;
    print_json(&wait_for_event(&res, Duration::from_secs(seconds), &mut events).await?)
}

/// Wait for the event of a broadcast transaction, failing at once when the
/// gateway could not subscribe to it.
async fn wait_for_event(
    res: &SendWithEventsResponse,
    timeout: Duration,
    events: &mut mpsc::UnboundedReceiver<TxEvent>,
) -> Result<TxEvent> {
    anyhow::ensure!(
        res.with_events,
        "Transaction {} was broadcast without an event subscription, not waiting for it",
        res.tx_hash
    );
    match tokio::time::timeout(timeout, events.recv()).await {
        Ok(Some(event)) => Ok(event),
        Ok(None) => Err(anyhow::anyhow!("Event subscription closed")),
        Err(_) => Err(anyhow::anyhow!(
            "No event for transaction {} within {timeout:?}",
            res.tx_hash
        )),
    }
}

/// Forwards delivered transaction events to the command.
struct ChannelNotifier(mpsc::UnboundedSender<TxEvent>);

#[async_trait::async_trait]
impl TxNotifier for ChannelNotifier {
    async fn notify(&self, event: TxEvent, _params: &BTreeMap<String, String>) -> Result<()> {
        self.0
            .send(event)
            .map_err(|_| anyhow::anyhow!("Command no longer waiting for events"))
    }
}
