pub mod config;
pub mod domain;
pub mod errors;
pub mod records;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};
pub use domain::conversation::{Message, Role, ThreadId};
pub use domain::donation::{
    DonationRecord, FoodType, Handling, PickupWindow, Quantity, QuantityUnit,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use records::{merge_patch, Collection, Record, RecordStore, RecordStoreError};
