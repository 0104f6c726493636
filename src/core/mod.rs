//! 核心层：错误类型与传播策略

pub mod error;

pub use error::{EngineError, FormatError};
