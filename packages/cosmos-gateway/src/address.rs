use std::{
    convert::TryFrom,
    fmt::{Debug, Display},
    str::FromStr,
};

use bech32::{FromBase32, ToBase32};

use crate::error::AddressError;

/// A raw address value not connected to a specific blockchain. You usually want [Address].
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum RawAddress {
    Twenty { raw_address: [u8; 20] },
    ThirtyTwo { raw_address: [u8; 32] },
}

/// Parse a raw address and its HRP from a string. Supports any Cosmos-compatible blockchain.
pub fn parse_raw_address(s: &str) -> Result<(String, RawAddress), AddressError> {
    let invalid = |reason: String| AddressError::InvalidBech32 {
        address: s.to_owned(),
        reason,
    };
    let (hrp, data, variant) = bech32::decode(s).map_err(|e| invalid(e.to_string()))?;
    match variant {
        bech32::Variant::Bech32 => (),
        bech32::Variant::Bech32m => return Err(invalid("must use Bech32 variant".to_owned())),
    }
    let data = Vec::<u8>::from_base32(&data).map_err(|e| invalid(e.to_string()))?;
    let raw_address = RawAddress::try_from(data.as_slice())?;
    Ok((hrp, raw_address))
}

/// The human readable part of a bech32 string, if it has one.
///
/// Cheaper than [parse_raw_address] and does not validate the checksum.
pub fn address_hrp(s: &str) -> Option<&str> {
    s.rfind('1')
        .map(|idx| &s[..idx])
        .filter(|hrp| !hrp.is_empty())
}

/// Re-encode a bech32 address under a different prefix.
pub fn convert_address_prefix(address: &str, prefix: &str) -> Result<String, AddressError> {
    let (_, raw_address) = parse_raw_address(address)?;
    raw_address.with_hrp(prefix).map(|address| address.to_string())
}

impl AsRef<[u8]> for RawAddress {
    fn as_ref(&self) -> &[u8] {
        match self {
            RawAddress::Twenty { raw_address } => raw_address,
            RawAddress::ThirtyTwo { raw_address } => raw_address,
        }
    }
}

impl From<[u8; 20]> for RawAddress {
    fn from(raw_address: [u8; 20]) -> Self {
        RawAddress::Twenty { raw_address }
    }
}

impl From<[u8; 32]> for RawAddress {
    fn from(raw_address: [u8; 32]) -> Self {
        RawAddress::ThirtyTwo { raw_address }
    }
}

impl TryFrom<&[u8]> for RawAddress {
    type Error = AddressError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match value.try_into().ok() {
            Some(raw_address) => Ok(RawAddress::Twenty { raw_address }),
            None => value
                .try_into()
                .map(|raw_address| RawAddress::ThirtyTwo { raw_address })
                .map_err(|_| AddressError::InvalidLength { len: value.len() }),
        }
    }
}

impl RawAddress {
    /// Attach a human readable prefix, checking that it can be bech32 encoded.
    pub fn with_hrp(self, hrp: &str) -> Result<Address, AddressError> {
        bech32::encode(hrp, self.to_base32(), bech32::Variant::Bech32).map_err(|e| {
            AddressError::InvalidPrefix {
                prefix: hrp.to_owned(),
                reason: e.to_string(),
            }
        })?;
        Ok(Address {
            raw_address: self,
            hrp: hrp.to_owned(),
        })
    }
}

/// An address on some Cosmos blockchain, identified by its prefix.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address {
    raw_address: RawAddress,
    hrp: String,
}

impl Address {
    pub fn raw(&self) -> &RawAddress {
        &self.raw_address
    }

    pub fn hrp(&self) -> &str {
        &self.hrp
    }

    /// The same account on a chain with a different prefix.
    pub fn for_prefix(&self, hrp: &str) -> Result<Self, AddressError> {
        self.raw_address.with_hrp(hrp)
    }
}

impl Display for Address {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        // The HRP was validated when the address was built.
        bech32::encode_to_fmt(
            fmt,
            &self.hrp,
            self.raw_address.to_base32(),
            bech32::Variant::Bech32,
        )
        .map_err(|_| std::fmt::Error)?
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hrp, raw_address) = parse_raw_address(s)?;
        Ok(Address { raw_address, hrp })
    }
}
