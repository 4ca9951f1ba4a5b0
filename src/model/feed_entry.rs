use super::collection::CollectionWrapper;
use super::transaction::Transaction;
use std::fmt;

/// A captured transaction together with the collection it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct FeedEntry {
    pub transaction: Transaction,
    pub collection: CollectionWrapper,
}

impl FeedEntry {
    pub fn new(transaction: Transaction, collection: CollectionWrapper) -> Self {
        Self { transaction, collection }
    }

    pub fn time(&self) -> u64 {
        self.transaction.time
    }

    /// Stable key for list rendering.
    pub fn key(&self) -> String {
        let reference = self.transaction.item.as_deref().unwrap_or(&self.transaction.caller);
        format!("tx{}{}{}", self.collection.id, reference, self.transaction.time)
    }
}

impl fmt::Display for FeedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tx = &self.transaction;
        write!(f, "{} #{}", self.collection.name, tx.item.as_deref().unwrap_or("?"))?;
        if let Some(price) = tx.price.as_ref().filter(|p| p.value > 0) {
            write!(f, " {}{}", price.scaled(), price.currency)?;
        }
        write!(f, " {}", tx.operation)?;
        if let Some(to) = &tx.to {
            write!(f, " to {}", abbreviate_wallet(to))?;
        }
        if let Some(from) = &tx.from {
            write!(f, " from {}", abbreviate_wallet(from))?;
        }
        write!(f, " ({})", tx.time)
    }
}

/// `abcde...xyz` form of a principal or account id.
pub fn abbreviate_wallet(wallet: &str) -> String {
    let chars: Vec<char> = wallet.chars().collect();
    if chars.len() <= 8 {
        return wallet.to_string();
    }
    let head: String = chars[..5].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{head}...{tail}")
}
