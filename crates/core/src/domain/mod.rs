pub mod conversation;
pub mod donation;
