//! 上下文层：消息信封与分层作用域存储

pub mod envelope;
pub mod store;

pub use envelope::Envelope;
pub use store::{ContextStore, Scope};
