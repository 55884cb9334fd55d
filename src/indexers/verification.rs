//! Verification relationships between accounts.
//!
//! An association transaction whose type falls in the `0x0100` family grants the party a set of
//! verification relationships on the sender's identity. The low byte of the association type
//! holds the relationship flags. The sender's record is an object keyed by party address, and
//! every party keeps the reverse set of senders that verified it.

use crate::chain::TransactionType;
use crate::storage::{Storage, keys};
use crate::sync::{IndexError, IndexedTransaction, TransactionHandler};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Association types `0x0100..=0x01ff` carry verification relationships.
const VERIFICATION_ASSOCIATION_BASE: u64 = 0x0100;

/// Set of verification relationships. Bit positions match the association type encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VerificationRelationships(u8);

impl VerificationRelationships {
	pub const AUTHENTICATION: Self = Self(0x01);
	pub const ASSERTION_METHOD: Self = Self(0x02);
	pub const KEY_AGREEMENT: Self = Self(0x04);
	pub const CAPABILITY_INVOCATION: Self = Self(0x08);
	pub const CAPABILITY_DELEGATION: Self = Self(0x10);

	const ALL_BITS: u8 = 0x1f;
	const NAMES: [(Self, &'static str); 5] = [
		(Self::AUTHENTICATION, "authentication"),
		(Self::ASSERTION_METHOD, "assertionMethod"),
		(Self::KEY_AGREEMENT, "keyAgreement"),
		(Self::CAPABILITY_INVOCATION, "capabilityInvocation"),
		(Self::CAPABILITY_DELEGATION, "capabilityDelegation"),
	];

	pub const fn empty() -> Self {
		Self(0)
	}

	/// Flags from raw bits. `None` if any unknown bit is set.
	pub fn from_bits(bits: u8) -> Option<Self> {
		(bits & !Self::ALL_BITS == 0).then_some(Self(bits))
	}

	pub fn bits(self) -> u8 {
		self.0
	}

	/// Decode an association type. `None` if it is not a verification association.
	pub fn from_association_type(association_type: u64) -> Option<Self> {
		if association_type & !0xff != VERIFICATION_ASSOCIATION_BASE {
			return None;
		}
		Self::from_bits((association_type & 0xff) as u8)
	}

	pub fn association_type(self) -> u64 {
		VERIFICATION_ASSOCIATION_BASE | u64::from(self.0)
	}

	pub fn is_empty(self) -> bool {
		self.0 == 0
	}

	pub fn contains(self, other: Self) -> bool {
		self.0 & other.0 == other.0
	}

	pub fn union(self, other: Self) -> Self {
		Self(self.0 | other.0)
	}

	pub fn authentication(self) -> bool {
		self.contains(Self::AUTHENTICATION)
	}

	pub fn assertion_method(self) -> bool {
		self.contains(Self::ASSERTION_METHOD)
	}

	pub fn key_agreement(self) -> bool {
		self.contains(Self::KEY_AGREEMENT)
	}

	pub fn capability_invocation(self) -> bool {
		self.contains(Self::CAPABILITY_INVOCATION)
	}

	pub fn capability_delegation(self) -> bool {
		self.contains(Self::CAPABILITY_DELEGATION)
	}

	/// Names of the relationships in the set, in bit order.
	pub fn names(self) -> Vec<&'static str> {
		Self::NAMES
			.iter()
			.filter(|(flag, _)| self.contains(*flag))
			.map(|(_, name)| *name)
			.collect()
	}
}

impl fmt::Display for VerificationRelationships {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.names().join("|"))
	}
}

/// Maintains `verification:{sender}` and `verified-by:{party}`.
pub struct VerificationIndexer {
	storage: Arc<dyn Storage>,
}

impl VerificationIndexer {
	pub fn new(storage: Arc<dyn Storage>) -> Self {
		Self { storage }
	}

	/// Relationships `address` has granted, keyed by party. Unreadable entries are skipped.
	pub async fn relationships(
		&self,
		address: &str,
	) -> Result<HashMap<String, VerificationRelationships>, IndexError> {
		let key = keys::verification(address);
		let record = self.storage.get_object(&key).await?;

		let mut relationships = HashMap::with_capacity(record.len());
		for (party, raw) in record {
			match raw.parse::<u8>().ok().and_then(VerificationRelationships::from_bits) {
				Some(flags) => {
					relationships.insert(party, flags);
				}
				None => warn!("Ignoring invalid relationship flags {:?} at {} for {}", raw, key, party),
			}
		}
		Ok(relationships)
	}

	/// Addresses that granted `address` a verification relationship.
	pub async fn verified_by(&self, address: &str) -> Result<Vec<String>, IndexError> {
		let mut senders = self.storage.set_members(&keys::verified_by(address)).await?;
		senders.sort();
		Ok(senders)
	}

	async fn associate(
		&self,
		sender: &str,
		party: &str,
		flags: VerificationRelationships,
	) -> Result<(), IndexError> {
		self.storage
			.add_object_field(&keys::verification(sender), party, &flags.bits().to_string())
			.await?;
		self.storage.add_to_set(&keys::verified_by(party), sender).await?;
		debug!("{} granted {} to {}", sender, flags, party);
		Ok(())
	}

	async fn revoke(&self, sender: &str, party: &str) -> Result<(), IndexError> {
		let key = keys::verification(sender);
		let mut record = self.storage.get_object(&key).await?;
		if record.remove(party).is_some() {
			self.storage.set_object(&key, &record).await?;
		}
		self.storage.remove_from_set(&keys::verified_by(party), sender).await?;
		debug!("{} revoked verification of {}", sender, party);
		Ok(())
	}
}

#[async_trait::async_trait]
impl TransactionHandler for VerificationIndexer {
	async fn handle(&self, tx: &IndexedTransaction<'_>) -> Result<(), IndexError> {
		let transaction = tx.transaction;
		let tx_type = transaction.tx_type();
		if !matches!(
			tx_type,
			TransactionType::Association | TransactionType::RevokeAssociation
		) {
			return Ok(());
		}

		let Some(flags) = transaction
			.association_type
			.and_then(VerificationRelationships::from_association_type)
		else {
			return Ok(());
		};

		let party = transaction.party.as_deref().or(transaction.recipient.as_deref());
		let (Some(sender), Some(party)) = (transaction.sender.as_deref(), party) else {
			warn!(
				"Skipping verification association {} without sender or counterparty",
				transaction.id
			);
			return Ok(());
		};

		if tx_type == TransactionType::Association {
			self.associate(sender, party, flags).await
		} else {
			self.revoke(sender, party).await
		}
	}

	fn name(&self) -> &'static str {
		"verification"
	}
}
