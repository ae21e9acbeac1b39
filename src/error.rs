//! Error types for hcs-nspawn

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("'{op}' failed, {context} error: [{code:#010x}]")]
    Driver {
        op: &'static str,
        context: String,
        code: u32,
    },

    #[error("'{op}' failed, {context} error: [{code:#010x}]")]
    Engine {
        op: &'static str,
        context: String,
        code: u32,
    },

    #[error("Unsupported notification kind: [{0:#010x}]")]
    UnsupportedNotification(u32),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Acquisition-phase fault from a layer driver call.
    pub fn driver(op: &'static str, context: impl Into<String>, code: u32) -> Self {
        Error::Driver {
            op,
            context: context.into(),
            code,
        }
    }

    /// Acquisition-phase fault from a compute engine call.
    pub fn engine(op: &'static str, context: impl Into<String>, code: u32) -> Self {
        Error::Engine {
            op,
            context: context.into(),
            code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_formats_op_and_code() {
        let err = Error::driver("PrepareLayer", "layer_name: [leaf],", 0x80070005);
        let msg = err.to_string();
        assert!(msg.contains("'PrepareLayer' failed"));
        assert!(msg.contains("layer_name: [leaf]"));
        assert!(msg.contains("0x80070005"));
    }
}
