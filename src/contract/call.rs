//! Prepared contract calls

use crate::error::{SchedulerError, SchedulerResult};

use ethers::abi::{Abi, Function, Token};
use ethers::types::{Address, Bytes, H256, I256};
use std::fmt;

/// A contract function bound to a target address and argument values
#[derive(Debug, Clone)]
pub struct ContractCall {
    address: Address,
    function: Function,
    args: Vec<Token>,
}

impl ContractCall {
    pub fn new(address: Address, function: Function, args: Vec<Token>) -> Self {
        Self {
            address,
            function,
            args,
        }
    }

    /// Look up `name` in a contract ABI and bind it
    pub fn from_abi(
        address: Address,
        abi: &Abi,
        name: &str,
        args: Vec<Token>,
    ) -> SchedulerResult<Self> {
        let function = abi
            .function(name)
            .map_err(|e| SchedulerError::Decode(format!("Unknown function {}: {}", name, e)))?
            .clone();

        Ok(Self::new(address, function, args))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// ABI-encoded calldata (selector followed by arguments)
    pub fn calldata(&self) -> SchedulerResult<Bytes> {
        self.function
            .encode_input(&self.args)
            .map(Bytes::from)
            .map_err(|e| SchedulerError::Decode(format!("Cannot encode {}: {}", self, e)))
    }

    /// Decode the return data of this function
    pub fn decode_output(&self, data: &[u8]) -> SchedulerResult<Vec<Token>> {
        self.function
            .decode_output(data)
            .map_err(|e| SchedulerError::Decode(format!("Cannot decode {} output: {}", self, e)))
    }

    /// Human-readable form, optionally tagged with the transaction hash
    pub fn describe(&self, tx_hash: Option<H256>) -> String {
        match tx_hash {
            Some(hash) => format!("{} tx_hash: {:?}", self, hash),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for ContractCall {
    /// `0x5fbd…0aa3 transfer(to: 0x…, amount: 1000)`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}(", self.address, self.function.name)?;

        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match self.function.inputs.get(i).map(|p| p.name.as_str()) {
                Some(name) if !name.is_empty() => write!(f, "{}: {}", name, ArgDisplay(arg))?,
                _ => write!(f, "param{}: {}", i, ArgDisplay(arg))?,
            }
        }

        write!(f, ")")
    }
}

/// Argument value as written in source: decimal integers, `0x` hex for
/// addresses and bytes
struct ArgDisplay<'a>(&'a Token);

impl fmt::Display for ArgDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Token::Address(address) => write!(f, "{:?}", address),
            Token::Uint(value) => write!(f, "{}", value),
            Token::Int(value) => write!(f, "{}", I256::from_raw(*value)),
            Token::Bool(value) => write!(f, "{}", value),
            Token::String(value) => write!(f, "{:?}", value),
            Token::Bytes(bytes) | Token::FixedBytes(bytes) => {
                write!(f, "0x{}", hex::encode(bytes))
            }
            Token::Array(items) | Token::FixedArray(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            Token::Tuple(items) => {
                write!(f, "(")?;
                write_list(f, items)?;
                write!(f, ")")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Token]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", ArgDisplay(item))?;
    }
    Ok(())
}
