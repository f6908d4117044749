//! Event extraction from receipts
//!
//! An operation can bind an ABI event together with a decoder. Once the
//! transaction is mined, the receipt's logs are scanned for that event and the
//! first match is decoded into the operation's result.

use crate::error::SchedulerResult;
use crate::receipt::{Receipt, ReceiptLog};

use ethers::abi::{Event, LogParam, RawLog, Token};
use ethers::types::Address;
use tracing::{debug, warn};

/// An event log decoded against its ABI
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub name: String,
    /// Contract that emitted the log
    pub address: Address,
    pub params: Vec<LogParam>,
}

impl DecodedEvent {
    /// Value of the named event argument
    pub fn arg(&self, name: &str) -> Option<&Token> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }
}

/// Turns a decoded event into a typed domain value
pub trait EventDecoder: Send + Sync {
    type Output: Send;

    fn decode(&self, event: &DecodedEvent) -> SchedulerResult<Self::Output>;
}

impl<F, T> EventDecoder for F
where
    F: Fn(&DecodedEvent) -> SchedulerResult<T> + Send + Sync,
    T: Send,
{
    type Output = T;

    fn decode(&self, event: &DecodedEvent) -> SchedulerResult<T> {
        self(event)
    }
}

/// Decoder returning the decoded arguments unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct RawArgs;

impl EventDecoder for RawArgs {
    type Output = DecodedEvent;

    fn decode(&self, event: &DecodedEvent) -> SchedulerResult<DecodedEvent> {
        Ok(event.clone())
    }
}

type BoxedDecoder<E> = Box<dyn Fn(&DecodedEvent) -> SchedulerResult<E> + Send + Sync>;

/// An ABI event paired with the decoder for its result
pub struct EventBinding<E> {
    event: Event,
    emitter: Option<Address>,
    decoder: BoxedDecoder<E>,
}

impl<E> EventBinding<E> {
    pub fn new<D>(event: Event, decoder: D) -> Self
    where
        D: EventDecoder<Output = E> + 'static,
    {
        Self {
            event,
            emitter: None,
            decoder: Box::new(move |decoded: &DecodedEvent| decoder.decode(decoded)),
        }
    }

    /// Only match logs emitted by `address`
    pub fn emitted_by(mut self, address: Address) -> Self {
        self.emitter = Some(address);
        self
    }

    /// Find and decode the bound event in `receipt`
    pub fn extract(&self, receipt: &Receipt) -> SchedulerResult<Option<E>> {
        let mut matches = find_events(&self.event, &receipt.logs);
        if let Some(emitter) = self.emitter {
            matches.retain(|m| m.address == emitter);
        }

        let first = match matches.len() {
            0 => {
                debug!(
                    event = %self.event.name,
                    tx_hash = ?receipt.transaction_hash,
                    "No matching event in receipt"
                );
                return Ok(None);
            }
            1 => &matches[0],
            n => {
                warn!(
                    event = %self.event.name,
                    tx_hash = ?receipt.transaction_hash,
                    matches = n,
                    "Ambiguous event: multiple matching logs, using the first"
                );
                &matches[0]
            }
        };

        (self.decoder)(first).map(Some)
    }
}

impl EventBinding<DecodedEvent> {
    /// Binding that yields the raw decoded arguments
    pub fn raw(event: Event) -> Self {
        Self::new(event, RawArgs)
    }
}

/// All logs in `logs` that decode as `event`, in receipt order. Logs whose
/// topic matches but whose payload does not decode are skipped.
pub fn find_events(event: &Event, logs: &[ReceiptLog]) -> Vec<DecodedEvent> {
    let topic = event.signature();

    logs.iter()
        .filter(|log| event.anonymous || log.topics.first() == Some(&topic))
        .filter_map(|log| {
            let raw = RawLog {
                topics: log.topics.clone(),
                data: log.data.to_vec(),
            };
            match event.parse_log(raw) {
                Ok(parsed) => Some(DecodedEvent {
                    name: event.name.clone(),
                    address: log.address,
                    params: parsed.params,
                }),
                Err(e) => {
                    debug!(event = %event.name, error = %e, "Discarding undecodable log");
                    None
                }
            }
        })
        .collect()
}
