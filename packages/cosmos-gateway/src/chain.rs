//! Chain metadata as published by the Cosmos chain registry, plus the values
//! derived from it once at load time.

use serde::{Deserialize, Serialize};

use crate::denom;
use crate::error::{ChainError, DenomError};
use crate::wallet::{COSMOS_COIN_TYPE, ETHEREUM_COIN_TYPE};

pub const DEFAULT_LOW_GAS_PRICE: f64 = 0.01;
pub const DEFAULT_AVERAGE_GAS_PRICE: f64 = 0.025;
pub const DEFAULT_HIGH_GAS_PRICE: f64 = 0.04;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeToken {
    #[serde(default)]
    pub denom: String,
    #[serde(default, rename = "fixed_min_gas_price")]
    pub min_gas_price: f64,
    #[serde(default)]
    pub low_gas_price: f64,
    #[serde(default)]
    pub average_gas_price: f64,
    #[serde(default)]
    pub high_gas_price: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Fees {
    #[serde(default)]
    pub fee_tokens: Vec<FeeToken>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rpc {
    pub address: String,
    #[serde(default)]
    pub provider: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Apis {
    #[serde(default)]
    pub rpc: Vec<Rpc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenomUnit {
    pub denom: String,
    #[serde(default)]
    pub exponent: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoUris {
    #[serde(default)]
    pub png: String,
    #[serde(default)]
    pub svg: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub denom_units: Vec<DenomUnit>,
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default, rename = "logo_URIs")]
    pub logo_uris: LogoUris,
}

/// Contents of a registry `assetlist.json`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AssetList {
    #[serde(default)]
    pub chain_name: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// Gas price tiers, in base units per unit of gas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GasPrices {
    pub low: f64,
    pub average: f64,
    pub high: f64,
}

/// One chain from the registry.
///
/// `asset` and `gas_prices` are not part of `chain.json`; the loader fills
/// them in from `assetlist.json` and [Chain::init_gas_prices].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    #[serde(default)]
    pub chain_id: String,
    pub chain_name: String,
    #[serde(default)]
    pub pretty_name: String,
    #[serde(default)]
    pub bech32_prefix: String,
    /// Chains without a coin type are skipped by the loader.
    #[serde(default)]
    pub slip44: u32,
    #[serde(default)]
    pub key_algos: Vec<String>,
    #[serde(default)]
    pub fees: Fees,
    #[serde(default)]
    pub apis: Apis,
    #[serde(default)]
    pub asset: Asset,
    #[serde(default)]
    pub gas_prices: GasPrices,
}

/// Listing projection of a [Chain].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSummary {
    pub id: String,
    pub name: String,
    pub pretty_name: String,
    pub prefix: String,
    pub slip44: u32,
    pub description: String,
    pub base: String,
    pub symbol: String,
    pub display: String,
    pub logo_png_url: String,
    pub logo_svg_url: String,
    pub key_algos: Vec<String>,
}

impl Chain {
    pub fn is_supported_coin_type(&self) -> bool {
        matches!(self.slip44, COSMOS_COIN_TYPE | ETHEREUM_COIN_TYPE)
    }

    /// The base denom and the exponent of the display denom.
    ///
    /// Fails when the denom units have no entry for either the base or the
    /// display denom.
    pub fn base_denom(&self) -> Result<(&str, u32), DenomError> {
        let units = &self.asset.denom_units;
        let base = units
            .iter()
            .find(|unit| unit.denom == self.asset.base)
            .ok_or_else(|| DenomError::BaseDenomNotFound {
                chain_name: self.chain_name.clone(),
            })?;
        let display = units
            .iter()
            .find(|unit| unit.denom == self.asset.display)
            .ok_or_else(|| DenomError::BaseDenomNotFound {
                chain_name: self.chain_name.clone(),
            })?;
        Ok((&base.denom, display.exponent))
    }

    /// Display amount to `<base amount><base denom>`.
    pub fn from_display_to_base(&self, amount: &str) -> Result<String, DenomError> {
        let (denom, exponent) = self.base_denom()?;
        denom::from_display_to_base(amount, exponent, denom)
    }

    /// Base amount (digits only) to display units.
    pub fn from_base_to_display(&self, amount: &str) -> Result<String, DenomError> {
        let (_, exponent) = self.base_denom()?;
        denom::from_base_to_display(amount, exponent)
    }

    /// Derive the gas tiers from the fee token matching the base denom.
    pub fn init_gas_prices(&mut self) {
        let defaults = |min: f64| GasPrices {
            low: DEFAULT_LOW_GAS_PRICE + min,
            average: DEFAULT_AVERAGE_GAS_PRICE + min,
            high: DEFAULT_HIGH_GAS_PRICE + min,
        };
        self.gas_prices = match self
            .fees
            .fee_tokens
            .iter()
            .find(|token| token.denom == self.asset.base)
        {
            None => defaults(0.0),
            Some(token)
                if token.low_gas_price <= 0.0
                    && token.average_gas_price <= 0.0
                    && token.high_gas_price <= 0.0 =>
            {
                defaults(token.min_gas_price)
            }
            Some(token) => GasPrices {
                low: token.low_gas_price + token.min_gas_price,
                average: token.average_gas_price + token.min_gas_price,
                high: token.high_gas_price + token.min_gas_price,
            },
        };
    }

    /// Rewrite every RPC address as `scheme://host:port/path`, dropping the
    /// ones that cannot be used.
    pub fn init_rpc_urls(&mut self) {
        let chain_name = &self.chain_name;
        self.apis.rpc.retain_mut(|rpc| match normalize_rpc_url(&rpc.address) {
            Ok(address) => {
                rpc.address = address;
                true
            }
            Err(e) => {
                tracing::warn!("Dropping RPC endpoint of {chain_name}: {e}");
                false
            }
        });
    }

    pub fn rpc_endpoints(&self) -> Vec<String> {
        self.apis.rpc.iter().map(|rpc| rpc.address.clone()).collect()
    }

    pub fn summary(&self) -> ChainSummary {
        ChainSummary {
            id: self.chain_id.clone(),
            name: self.chain_name.clone(),
            pretty_name: self.pretty_name.clone(),
            prefix: self.bech32_prefix.clone(),
            slip44: self.slip44,
            description: self.asset.description.clone(),
            base: self.asset.base.clone(),
            symbol: self.asset.symbol.clone(),
            display: self.asset.display.clone(),
            logo_png_url: self.asset.logo_uris.png.clone(),
            logo_svg_url: self.asset.logo_uris.svg.clone(),
            key_algos: self.key_algos.clone(),
        }
    }
}

/// Fill in the default port for `http` (80) and `https` (443).
pub fn normalize_rpc_url(address: &str) -> Result<String, ChainError> {
    let url = url::Url::parse(address).map_err(|source| ChainError::InvalidRpcUrl {
        address: address.to_owned(),
        source,
    })?;
    let port = match (url.scheme(), url.port()) {
        ("http" | "https", Some(port)) => port,
        ("http", None) => 80,
        ("https", None) => 443,
        (scheme, _) => {
            return Err(ChainError::UnsupportedScheme {
                address: address.to_owned(),
                scheme: scheme.to_owned(),
            })
        }
    };
    let host = url.host_str().ok_or_else(|| ChainError::MissingHost {
        address: address.to_owned(),
    })?;
    let path = match url.path() {
        "/" => "",
        path => path,
    };
    Ok(format!("{}://{host}:{port}{path}", url.scheme()))
}
