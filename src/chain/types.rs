//! Types for blocks and transactions returned by the ledger node

use serde::{Deserialize, Serialize};

/// Transaction type derived from the numeric `type` code on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionType {
    Genesis,
    Transfer,
    Lease,
    CancelLease,
    MassTransfer,
    Data,
    SetScript,
    Anchor,
    Association,
    RevokeAssociation,
    Sponsorship,
    CancelSponsorship,
    Register,
    Burn,
    MappedAnchor,
    Statement,
    /// A type code this service does not know about.
    Unknown(u8),
}

impl TransactionType {
    /// Map a wire type code to a transaction type.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => TransactionType::Genesis,
            4 => TransactionType::Transfer,
            8 => TransactionType::Lease,
            9 => TransactionType::CancelLease,
            11 => TransactionType::MassTransfer,
            12 => TransactionType::Data,
            13 => TransactionType::SetScript,
            15 => TransactionType::Anchor,
            16 => TransactionType::Association,
            17 => TransactionType::RevokeAssociation,
            18 => TransactionType::Sponsorship,
            19 => TransactionType::CancelSponsorship,
            20 => TransactionType::Register,
            21 => TransactionType::Burn,
            22 => TransactionType::MappedAnchor,
            23 => TransactionType::Statement,
            other => TransactionType::Unknown(other),
        }
    }

    /// The address index category for this type, if it has one besides `all`.
    pub fn category(&self) -> Option<&'static str> {
        match self {
            TransactionType::Genesis
            | TransactionType::Transfer
            | TransactionType::MassTransfer => Some("transfer"),
            TransactionType::Lease | TransactionType::CancelLease => Some("lease"),
            TransactionType::Data => Some("data"),
            TransactionType::SetScript => Some("script"),
            TransactionType::Anchor | TransactionType::MappedAnchor => Some("anchor"),
            TransactionType::Association | TransactionType::RevokeAssociation => {
                Some("association")
            }
            TransactionType::Sponsorship | TransactionType::CancelSponsorship => {
                Some("sponsorship")
            }
            TransactionType::Register => Some("register"),
            TransactionType::Burn => Some("burn"),
            TransactionType::Statement => Some("statement"),
            TransactionType::Unknown(_) => None,
        }
    }
}

/// A single recipient of a mass transfer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transfer {
    pub recipient: String,
    pub amount: u64,
}

/// An anchor carried by an anchor transaction.
///
/// Plain anchor transactions carry bare hashes. Mapped anchor transactions carry `{key, value}`
/// pairs, where `value` is the anchored hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AnchorEntry {
    Hash(String),
    Mapped { key: String, value: String },
}

impl AnchorEntry {
    /// The anchored content hash.
    pub fn hash(&self) -> &str {
        match self {
            AnchorEntry::Hash(hash) => hash,
            AnchorEntry::Mapped { value, .. } => value,
        }
    }
}

/// A key/value entry of a data transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataEntry {
    pub key: String,
    #[serde(rename = "type")]
    pub value_type: String,
    pub value: serde_json::Value,
}

/// An account registered by a register transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredAccount {
    pub key_type: String,
    pub public_key: String,
}

/// Transaction as returned by the node.
///
/// Common fields are always present. Type-specific fields are optional and
/// default to empty, so transactions of types this service does not index
/// still deserialize.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// The transaction id, unique per ledger.
    pub id: String,
    /// Numeric type code.
    #[serde(rename = "type")]
    pub type_code: u8,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub sender_public_key: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub amount: Option<u64>,
    #[serde(default)]
    pub transfers: Vec<Transfer>,
    #[serde(default)]
    pub anchors: Vec<AnchorEntry>,
    #[serde(default)]
    pub data: Vec<DataEntry>,
    #[serde(default)]
    pub association_type: Option<u64>,
    #[serde(default)]
    pub party: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub accounts: Vec<RegisteredAccount>,
}

impl Transaction {
    pub fn tx_type(&self) -> TransactionType {
        TransactionType::from_code(self.type_code)
    }

    /// Every address this transaction touches, sender first, without duplicates.
    pub fn addresses(&self) -> Vec<&str> {
        let mut addresses: Vec<&str> = Vec::new();
        let candidates = self
            .sender
            .iter()
            .chain(self.recipient.iter())
            .chain(self.party.iter())
            .map(String::as_str)
            .chain(self.transfers.iter().map(|t| t.recipient.as_str()));

        for address in candidates {
            if !address.is_empty() && !addresses.contains(&address) {
                addresses.push(address);
            }
        }
        addresses
    }
}

/// Block as returned by the node. Never stored verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub height: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

/// Body of `GET /blocks/height`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HeightResponse {
    pub height: u64,
}

/// Error types for node requests
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Node returned status {status} for {path}")]
    NodeStatus {
        status: reqwest::StatusCode,
        path: String,
    },

    #[error("Invalid node URL: {0}")]
    InvalidUrl(String),

    #[error("Range error: {0}")]
    RangeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_mass_transfer() {
        let raw = serde_json::json!({
            "id": "tx1",
            "type": 11,
            "sender": "3Nsender",
            "senderPublicKey": "pk",
            "timestamp": 1_600_000_000_000u64,
            "fee": 100_000_000u64,
            "transfers": [
                {"recipient": "3Nalice", "amount": 10},
                {"recipient": "3Nbob", "amount": 20},
                {"recipient": "3Nalice", "amount": 5}
            ],
            "proofs": ["ignored"]
        });

        let tx: Transaction = serde_json::from_value(raw).expect("valid transaction");
        assert_eq!(tx.tx_type(), TransactionType::MassTransfer);
        assert_eq!(tx.tx_type().category(), Some("transfer"));
        assert_eq!(tx.addresses(), vec!["3Nsender", "3Nalice", "3Nbob"]);
    }

    #[test]
    fn test_deserialize_plain_and_mapped_anchors() {
        let plain: Transaction = serde_json::from_value(serde_json::json!({
            "id": "a1",
            "type": 15,
            "sender": "3Nsender",
            "timestamp": 1,
            "anchors": ["hash-1", "hash-2"]
        }))
        .expect("plain anchors");
        let hashes: Vec<&str> = plain.anchors.iter().map(AnchorEntry::hash).collect();
        assert_eq!(hashes, vec!["hash-1", "hash-2"]);

        let mapped: Transaction = serde_json::from_value(serde_json::json!({
            "id": "a2",
            "type": 22,
            "sender": "3Nsender",
            "timestamp": 1,
            "anchors": [{"key": "doc-1", "value": "hash-3"}]
        }))
        .expect("mapped anchors");
        assert_eq!(mapped.tx_type().category(), Some("anchor"));
        assert_eq!(mapped.anchors[0].hash(), "hash-3");
    }

    #[test]
    fn test_unknown_type_has_no_category() {
        assert_eq!(TransactionType::from_code(99), TransactionType::Unknown(99));
        assert_eq!(TransactionType::from_code(99).category(), None);
    }

    #[test]
    fn test_genesis_without_sender() {
        let raw = serde_json::json!({
            "id": "g1",
            "type": 1,
            "timestamp": 0,
            "recipient": "3Ngenesis",
            "amount": 1000
        });
        let tx: Transaction = serde_json::from_value(raw).expect("valid transaction");
        assert_eq!(tx.sender, None);
        assert_eq!(tx.addresses(), vec!["3Ngenesis"]);
    }
}
