pub mod builder;
pub mod decode_log;
pub mod runtime;
pub mod traits;
