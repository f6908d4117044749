//! Contract error mapping
//!
//! Custom Solidity errors revert with a 4-byte selector followed by the
//! ABI-encoded error arguments. The `ErrorMapper` turns known selectors into
//! named domain errors carrying the call that triggered them.

use super::call::ContractCall;
use crate::error::{SchedulerError, TransportError};

use ethers::types::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 4-byte error (or function) selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Selector([u8; 4]);

impl Selector {
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Selector of a Solidity signature such as `InsufficientBalance()`
    pub fn from_signature(signature: &str) -> Self {
        Self(ethers::utils::id(signature))
    }

    pub fn from_revert_data(data: &[u8]) -> Option<Self> {
        let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Selector {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits)
            .map_err(|e| SchedulerError::Config(format!("Invalid selector {}: {}", s, e)))?;
        let bytes: [u8; 4] = bytes
            .try_into()
            .map_err(|_| SchedulerError::Config(format!("Selector {} is not 4 bytes", s)))?;
        Ok(Self(bytes))
    }
}

/// A named contract error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractErrorSpec {
    pub selector: Selector,
    pub name: String,
    pub description: String,
}

/// A revert decoded into a named domain error
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{name} ({selector}): {description} in {call}")]
pub struct ContractRevert {
    pub name: String,
    pub selector: Selector,
    pub description: String,
    /// Formatted call that reverted
    pub call: String,
    /// Full revert data, including encoded error arguments
    pub data: Bytes,
}

/// Selector-keyed table of known contract errors
#[derive(Debug, Clone, Default)]
pub struct ErrorMapper {
    errors: HashMap<Selector, ContractErrorSpec>,
}

impl ErrorMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        selector: Selector,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> &mut Self {
        self.errors.insert(
            selector,
            ContractErrorSpec {
                selector,
                name: name.into(),
                description: description.into(),
            },
        );
        self
    }

    /// Register an error by its Solidity signature, e.g. `ZeroTrade()`
    pub fn register_signature(
        &mut self,
        signature: &str,
        description: impl Into<String>,
    ) -> &mut Self {
        let name = signature.split('(').next().unwrap_or(signature).to_string();
        self.register(Selector::from_signature(signature), name, description)
    }

    pub fn lookup(&self, selector: &Selector) -> Option<&ContractErrorSpec> {
        self.errors.get(selector)
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Decode `err` into a domain error when it carries a known selector
    pub fn decode(&self, err: &TransportError, call: &ContractCall) -> Option<ContractRevert> {
        let known = self.lookup(&err.revert_selector()?)?;

        Some(ContractRevert {
            name: known.name.clone(),
            selector: known.selector,
            description: known.description.clone(),
            call: call.to_string(),
            data: err.revert_data().cloned().unwrap_or_default(),
        })
    }

    /// Map a transport error raised while executing `call`. Known selectors
    /// become `SchedulerError::Contract`; everything else goes through `wrap`.
    pub fn map(
        &self,
        err: TransportError,
        call: &ContractCall,
        wrap: fn(TransportError) -> SchedulerError,
    ) -> SchedulerError {
        match self.decode(&err, call) {
            Some(revert) => SchedulerError::Contract(revert),
            None => wrap(err),
        }
    }

    /// Error table of the CLOB exchange contracts
    pub fn clob() -> Self {
        let mut mapper = Self::new();
        for (selector, name, description) in CLOB_ERRORS {
            let selector = Selector::new(*selector);
            mapper.register(selector, *name, *description);
        }
        mapper
    }
}

const CLOB_ERRORS: &[([u8; 4], &str, &str)] = &[
    ([0xf4, 0xd6, 0x78, 0xb8], "InsufficientBalance", "Insufficient balance for the requested operation."),
    ([0x32, 0xcc, 0x72, 0x36], "NotFactory", "Operation can only be performed by the factory."),
    ([0x87, 0xe3, 0x93, 0xa7], "FOKNotFilled", "Fill-or-kill order could not be completely filled."),
    ([0x60, 0xab, 0x48, 0x40], "UnauthorizedAmend", "Unauthorized attempt to amend an order."),
    ([0x45, 0xbb, 0x60, 0x73], "UnauthorizedCancel", "Unauthorized attempt to cancel an order."),
    ([0x4b, 0x22, 0x64, 0x9a], "InvalidAmend", "Invalid amendment to an order."),
    ([0x31, 0x54, 0x07, 0x8e], "OrderAlreadyExpired", "The order has already expired."),
    ([0x3d, 0x10, 0x45, 0x67], "InvalidAccountOrOperator", "Invalid account or operator for the requested operation."),
    ([0x52, 0x40, 0x9b, 0xa3], "PostOnlyOrderWouldBeFilled", "Post-only order would be immediately filled."),
    ([0x31, 0x5f, 0xf5, 0xe5], "MaxOrdersInBookPostNotCompetitive", "Maximum orders in book reached and post is not competitive."),
    ([0xc1, 0x00, 0x8f, 0x10], "NonPostOnlyAmend", "Non-post-only amendment is not allowed."),
    ([0xd8, 0xa0, 0x00, 0x83], "ZeroCostTrade", "Trade with zero cost is not allowed."),
    ([0x4e, 0xf3, 0x6a, 0x18], "ZeroTrade", "Trade with zero quantity is not allowed."),
    ([0xb8, 0x2d, 0xf1, 0x55], "ZeroOrder", "Order with zero quantity is not allowed."),
    ([0x79, 0x39, 0xf4, 0x24], "TransferFromFailed", "Transfer from operation failed."),
    ([0x52, 0x65, 0x4a, 0x3d], "LimitPriceOutOfBounds", "Limit price is out of bounds for the market."),
];
