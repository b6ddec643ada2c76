//! Domain models

pub mod catalog;
pub mod event;
pub mod history;
pub mod rule;
pub mod user_state;
pub mod wallet;

pub use catalog::{Aggregation, Badge, Level, PointCategory, Trophy};
pub use event::{EventDefinition, EventDocument, GameEvent};
pub use history::{HistoryRewardType, RewardHistoryEntry};
pub use rule::{
    ConditionLogic, ConditionSpec, ConditionType, RewardSpec, RewardType, Rule, SpendingSpec,
    SpendingType,
};
pub use user_state::UserState;
pub use wallet::{TransferStatus, Wallet, WalletTransaction, WalletTransactionType, WalletTransfer};
