//! Cue catalog and the coin purchase rule

use serde::{Deserialize, Serialize};

/// Highest cue id representable in the ownership bitmask
pub const MAX_CUE_ID: u8 = 63;

/// Ownership mask every new account starts with (the starter cue)
pub const STARTER_CUES: i64 = 1;

/// Cue offered in the market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CueItem {
    pub cue_id: u8,
    pub name: String,
    pub price: i64,
}

/// Built-in catalog used by the in-memory backend
pub fn default_catalog() -> Vec<CueItem> {
    [
        (1, "Starter Cue", 0),
        (2, "Maple Classic", 200),
        (3, "Carbon Striker", 500),
        (4, "Ebony Master", 1200),
        (5, "Golden Break", 3000),
    ]
    .into_iter()
    .map(|(cue_id, name, price)| CueItem {
        cue_id,
        name: name.to_string(),
        price,
    })
    .collect()
}

/// Bit for a cue in the ownership mask, `None` for ids outside 1..=63
pub fn cue_bit(cue_id: u8) -> Option<i64> {
    if (1..=MAX_CUE_ID).contains(&cue_id) {
        Some(1i64 << (cue_id - 1))
    } else {
        None
    }
}

/// Coins and owned cues of one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub coins: i64,
    pub cues_owned: i64,
}

impl Wallet {
    pub fn owns(&self, cue_id: u8) -> bool {
        cue_bit(cue_id).is_some_and(|bit| self.cues_owned & bit != 0)
    }

    /// Wallet after buying `cue`
    pub fn buy(&self, cue: &CueItem) -> Result<Wallet, PurchaseError> {
        let bit = cue_bit(cue.cue_id).ok_or(PurchaseError::UnknownCue(cue.cue_id))?;
        if self.cues_owned & bit != 0 {
            return Err(PurchaseError::AlreadyOwned(cue.cue_id));
        }
        if self.coins < cue.price {
            return Err(PurchaseError::InsufficientCoins {
                price: cue.price,
                coins: self.coins,
            });
        }
        Ok(Wallet {
            coins: self.coins - cue.price,
            cues_owned: self.cues_owned | bit,
        })
    }
}

/// Purchase failures
#[derive(Debug, thiserror::Error)]
pub enum PurchaseError {
    #[error("Unknown user: {0}")]
    UnknownUser(super::UserId),

    #[error("Unknown cue: {0}")]
    UnknownCue(u8),

    #[error("Cue {0} already owned")]
    AlreadyOwned(u8),

    #[error("Insufficient coins: price {price}, balance {coins}")]
    InsufficientCoins { price: i64, coins: i64 },

    #[error(transparent)]
    Store(#[from] super::StoreError),
}
