use voice_persistence::StoreError;

pub type Result<T> = std::result::Result<T, WebhookError>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WebhookError {
    #[error("no call found for provider_call_id/custom_field in event")]
    UnknownCall,
    #[error(transparent)]
    Store(#[from] StoreError),
}
