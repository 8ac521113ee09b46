use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_KEY_LENGTH: usize = 512;
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

fn validate_key(key: &str) -> Result<(), KvError> {
    if key.is_empty() {
        return Err(KvError::InvalidKey {
            key: key.to_string(),
            reason: "key cannot be empty".to_string(),
        });
    }

    if key.len() > MAX_KEY_LENGTH {
        return Err(KvError::InvalidKey {
            key: key.chars().take(50).collect::<String>() + "...",
            reason: format!("key exceeds maximum length of {MAX_KEY_LENGTH} bytes"),
        });
    }

    if key.trim().is_empty() {
        return Err(KvError::InvalidKey {
            key: key.to_string(),
            reason: "key cannot be only whitespace".to_string(),
        });
    }

    if key.contains('\0') {
        return Err(KvError::InvalidKey {
            key: key.replace('\0', "\\0"),
            reason: "key cannot contain null bytes".to_string(),
        });
    }

    if key.contains("..") {
        return Err(KvError::InvalidKey {
            key: key.to_string(),
            reason: "key cannot contain path traversal sequences".to_string(),
        });
    }

    if key.starts_with('/') || key.starts_with('\\') {
        return Err(KvError::InvalidKey {
            key: key.to_string(),
            reason: "key cannot start with path separator".to_string(),
        });
    }

    if key.chars().any(|c| c.is_control()) {
        return Err(KvError::InvalidKey {
            key: key.to_string(),
            reason: "key contains control characters".to_string(),
        });
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvOperation {
    Get { key: String },
    Set { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl Operation for KvOperation {
    type Output = KvResult;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvOutput {
    /// `None` means the key does not exist.
    Value(Option<Vec<u8>>),
    Written,
    Deleted { existed: bool },
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage error: {message} (retryable: {retryable})")]
    Storage { message: String, retryable: bool },

    #[error("storage operation timed out")]
    Timeout,
}

impl KvError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Storage { retryable, .. } => *retryable,
            Self::Timeout => true,
            _ => false,
        }
    }
}

pub type KvResult = Result<KvOutput, KvError>;

/// Capability for the shell's key-value store.
pub struct KeyValue<Ev> {
    context: CapabilityContext<KvOperation, Ev>,
}

impl<Ev> Clone for KeyValue<Ev> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<Ev> Capability<Ev> for KeyValue<Ev> {
    type Operation = KvOperation;
    type MappedSelf<MappedEv> = KeyValue<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        KeyValue::new(self.context.map_event(f))
    }
}

impl<Ev> KeyValue<Ev>
where
    Ev: Send + 'static,
{
    pub fn new(context: CapabilityContext<KvOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn get<F>(&self, key: impl Into<String>, make_event: F)
    where
        F: FnOnce(KvResult) -> Ev + Send + 'static,
    {
        let key = key.into();
        if let Err(e) = validate_key(&key) {
            self.context.update_app(make_event(Err(e)));
            return;
        }
        self.dispatch(KvOperation::Get { key }, make_event);
    }

    pub fn set<F>(&self, key: impl Into<String>, value: Vec<u8>, make_event: F)
    where
        F: FnOnce(KvResult) -> Ev + Send + 'static,
    {
        let key = key.into();
        if let Err(e) = validate_key(&key) {
            self.context.update_app(make_event(Err(e)));
            return;
        }
        if value.len() > MAX_VALUE_SIZE {
            self.context.update_app(make_event(Err(KvError::ValueTooLarge {
                size: value.len(),
                max: MAX_VALUE_SIZE,
            })));
            return;
        }
        self.dispatch(KvOperation::Set { key, value }, make_event);
    }

    pub fn delete<F>(&self, key: impl Into<String>, make_event: F)
    where
        F: FnOnce(KvResult) -> Ev + Send + 'static,
    {
        let key = key.into();
        if let Err(e) = validate_key(&key) {
            self.context.update_app(make_event(Err(e)));
            return;
        }
        self.dispatch(KvOperation::Delete { key }, make_event);
    }

    fn dispatch<F>(&self, operation: KvOperation, make_event: F)
    where
        F: FnOnce(KvResult) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let result = ctx.request_from_shell(operation).await;
            ctx.update_app(make_event(result));
        });
    }
}
