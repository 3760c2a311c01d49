use crate::utils::{hash_json, Hash};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Transactions are identified by the hash of their canonical encoding.
pub type TransactionId = Hash;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("account {0:?} is not a valid hex address")]
pub struct AccountError(pub String);

/// A validated account address: 40 hex digits, optionally prefixed with `0x`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Account(String);

impl Account {
    pub fn new(address: impl Into<String>) -> Result<Self, AccountError> {
        let address = address.into();
        let digits = address
            .strip_prefix("0x")
            .or_else(|| address.strip_prefix("0X"))
            .unwrap_or(&address);
        if digits.len() != 40 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AccountError(address));
        }
        Ok(Account(address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Account {
    type Error = AccountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Account::new(value)
    }
}

impl From<Account> for String {
    fn from(account: Account) -> Self {
        account.0
    }
}

impl FromStr for Account {
    type Err = AccountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Account::new(s)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    #[default]
    #[serde(rename = "")]
    Other,
    /// Mints `value` to the sender. Requires `from == to`.
    #[serde(rename = "self-reward")]
    SelfReward,
    #[serde(rename = "birthday")]
    Birthday,
    #[serde(rename = "loan")]
    Loan,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Reason::Other => "",
            Reason::SelfReward => "self-reward",
            Reason::Birthday => "birthday",
            Reason::Loan => "loan",
        };
        f.write_str(tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Account,
    pub to: Account,
    pub value: u64,
    pub reason: Reason,
    /// Unix timestamp in seconds.
    pub time: u64,
}

impl Transaction {
    pub fn new(from: Account, to: Account, value: u64, reason: Reason, time: u64) -> Self {
        Transaction {
            from,
            to,
            value,
            reason,
            time,
        }
    }

    pub fn is_reward(&self) -> bool {
        self.reason == Reason::SelfReward
    }

    pub fn id(&self) -> Result<TransactionId, serde_json::Error> {
        hash_json(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "0x1111111111111111111111111111111111111111";
    const BOB: &str = "0x2222222222222222222222222222222222222222";

    fn account(address: &str) -> Account {
        Account::new(address).unwrap()
    }

    #[test]
    fn test_account_validation() {
        assert!(Account::new(ALICE).is_ok());
        assert!(Account::new("2222222222222222222222222222222222222222").is_ok());
        assert!(Account::new("0xABCDEFabcdef0000000000000000000000000000").is_ok());
        assert!(Account::new("0x123").is_err());
        assert!(Account::new("0xzz22222222222222222222222222222222222222").is_err());
        assert!(Account::new("").is_err());
    }

    #[test]
    fn test_account_deserialize_validates() {
        let ok: Account = serde_json::from_str(&format!("\"{ALICE}\"")).unwrap();
        assert_eq!(ok.as_str(), ALICE);
        assert!(serde_json::from_str::<Account>("\"andrej\"").is_err());
    }

    #[test]
    fn test_reason_tags() {
        assert_eq!(serde_json::to_string(&Reason::Other).unwrap(), "\"\"");
        let reward: Reason = serde_json::from_str("\"self-reward\"").unwrap();
        assert_eq!(reward, Reason::SelfReward);
        assert!(serde_json::from_str::<Reason>("\"gift\"").is_err());
    }

    #[test]
    fn test_identical_transactions_share_id() {
        let tx = Transaction::new(account(ALICE), account(BOB), 10, Reason::Loan, 1_700_000_000);
        let same = tx.clone();
        assert_eq!(tx.id().unwrap(), same.id().unwrap());

        let later = Transaction { time: tx.time + 1, ..tx.clone() };
        assert_ne!(tx.id().unwrap(), later.id().unwrap());
    }

    #[test]
    fn test_canonical_field_order() {
        let tx = Transaction::new(account(ALICE), account(BOB), 5, Reason::Other, 7);
        let json = serde_json::to_string(&tx).unwrap();
        assert_eq!(
            json,
            format!("{{\"from\":\"{ALICE}\",\"to\":\"{BOB}\",\"value\":5,\"reason\":\"\",\"time\":7}}")
        );
    }
}
