use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Operation recorded by a bucket event. Unknown names are kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::EnumString)]
#[serde(from = "String", into = "String")]
#[strum(serialize_all = "camelCase")]
pub enum OperationKind {
    Mint,
    Transfer,
    TransferFrom,
    Sale,
    MakeListing,
    CancelListing,
    Burn,
    Approve,
    #[strum(default)]
    Other(String),
}

impl OperationKind {
    pub fn name(&self) -> &str {
        match self {
            OperationKind::Mint => "mint",
            OperationKind::Transfer => "transfer",
            OperationKind::TransferFrom => "transferFrom",
            OperationKind::Sale => "sale",
            OperationKind::MakeListing => "makeListing",
            OperationKind::CancelListing => "cancelListing",
            OperationKind::Burn => "burn",
            OperationKind::Approve => "approve",
            OperationKind::Other(name) => name,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for OperationKind {
    fn from(name: String) -> Self {
        OperationKind::from_str(&name).unwrap_or(OperationKind::Other(name))
    }
}

impl From<OperationKind> for String {
    fn from(kind: OperationKind) -> Self {
        kind.name().to_string()
    }
}

/// Value attached to a detail key of a raw bucket event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DetailValue {
    Text(String),
    Principal(String),
    U64(u64),
    Float(f64),
}

impl DetailValue {
    fn as_text(&self) -> String {
        match self {
            DetailValue::Text(s) | DetailValue::Principal(s) => s.clone(),
            DetailValue::U64(v) => v.to_string(),
            DetailValue::Float(v) => v.to_string(),
        }
    }

    fn as_u64(&self) -> Option<u64> {
        match self {
            DetailValue::U64(v) => Some(*v),
            DetailValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Event exactly as the bucket returns it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub operation: String,
    pub time: Option<Timestamp>,
    pub caller: String,
    #[serde(default)]
    pub details: Vec<(String, DetailValue)>,
}

impl RawEvent {
    fn detail(&self, key: &str) -> Option<&DetailValue> {
        self.details.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// One page of bucket history, newest event first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionPage {
    pub events: Vec<RawEvent>,
}

impl TransactionPage {
    pub fn new(events: Vec<RawEvent>) -> Self {
        Self { events }
    }

    /// Parse every event, dropping those without a timestamp. Page order is kept.
    pub fn into_transactions(self) -> Vec<Transaction> {
        self.events.into_iter().filter_map(Transaction::from_raw).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub value: u64,
    pub decimals: Option<u32>,
    pub currency: String,
}

impl Price {
    /// Value in whole currency units.
    pub fn scaled(&self) -> f64 {
        match self.decimals {
            Some(decimals) if decimals > 0 => self.value as f64 / 10f64.powi(i32::try_from(decimals).unwrap_or(i32::MAX)),
            _ => self.value as f64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub operation: OperationKind,
    pub caller: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub price: Option<Price>,
    /// Token or item reference inside the collection.
    pub item: Option<String>,
    pub time: Timestamp,
}

impl Transaction {
    /// Returns `None` for events without a timestamp.
    pub fn from_raw(raw: RawEvent) -> Option<Self> {
        let time = raw.time?;

        let text = |key: &str| raw.detail(key).map(DetailValue::as_text);
        let item = text("token").or_else(|| text("token_id")).or_else(|| text("tokenIdentifier"));
        let price = raw.detail("price").and_then(DetailValue::as_u64).map(|value| Price {
            value,
            decimals: raw
                .detail("price_decimals")
                .and_then(DetailValue::as_u64)
                .and_then(|d| u32::try_from(d).ok()),
            currency: text("price_currency").unwrap_or_default(),
        });

        Some(Self {
            from: text("from"),
            to: text("to"),
            item,
            price,
            operation: OperationKind::from(raw.operation),
            caller: raw.caller,
            time,
        })
    }
}
