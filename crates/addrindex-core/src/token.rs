//! ERC-20 transfer annotations.
//!
//! Call data sent to a registered token contract is decoded when it is a
//! `transfer(address,uint256)` or `transferFrom(address,address,uint256)`
//! call and the transaction succeeded.

use std::fmt;

use alloy_primitives::U256;

use crate::config::Network;
use crate::types::IngestTransaction;

const TRANSFER: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
const TRANSFER_FROM: [u8; 4] = [0x23, 0xb8, 0x72, 0xdd];
const WORD: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFunction {
    Transfer,
    TransferFrom,
}

impl TokenFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::TransferFrom => "transferFrom",
        }
    }
}

impl fmt::Display for TokenFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded token movement. `from` is `None` for `transfer`, where the
/// transaction sender is the token sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    pub function: TokenFunction,
    pub from: Option<String>,
    pub to: String,
    /// Decimal amount in the token's base unit.
    pub amount: String,
}

fn word(input: &[u8], index: usize) -> Option<&[u8]> {
    let start = 4 + index * WORD;
    input.get(start..start + WORD)
}

fn address_arg(input: &[u8], index: usize) -> Option<String> {
    let w = word(input, index)?;
    if w[..12].iter().any(|b| *b != 0) {
        return None;
    }
    Some(format!("0x{}", hex::encode(&w[12..])))
}

fn amount_arg(input: &[u8], index: usize) -> Option<String> {
    let w = word(input, index)?;
    Some(U256::from_be_slice(w).to_string())
}

/// Decode ERC-20 transfer call data. Anything else yields `None`.
pub fn parse_transfer(input: &[u8]) -> Option<TokenTransfer> {
    let selector: [u8; 4] = input.get(..4)?.try_into().ok()?;
    match selector {
        TRANSFER => Some(TokenTransfer {
            function: TokenFunction::Transfer,
            from: None,
            to: address_arg(input, 0)?,
            amount: amount_arg(input, 1)?,
        }),
        TRANSFER_FROM => Some(TokenTransfer {
            function: TokenFunction::TransferFrom,
            from: Some(address_arg(input, 0)?),
            to: address_arg(input, 1)?,
            amount: amount_arg(input, 2)?,
        }),
        _ => None,
    }
}

fn parse_decimal(s: &str) -> Option<U256> {
    U256::from_str_radix(s, 10).ok()
}

/// Whether a transaction's receipt marks it as successful.
///
/// Ethereum-family receipts carry a status after Byzantium; older ones are
/// judged by whether the call ran out of gas. RSK treats a missing status as
/// success.
pub fn transaction_succeeded(network: Network, tx: &IngestTransaction) -> bool {
    let Some(receipt) = &tx.receipt else {
        return false;
    };
    match (receipt.status, network.is_ethereum()) {
        (Some(status), _) => status,
        (None, false) => true,
        (None, true) => match (parse_decimal(&receipt.gas_used), parse_decimal(&tx.gas_limit)) {
            (Some(used), Some(limit)) => used < limit,
            _ => false,
        },
    }
}
