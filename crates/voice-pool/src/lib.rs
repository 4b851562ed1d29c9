//! Bounded external-resource pools (§4.1 C1, §4.2 C2).

pub mod error;
pub mod events;
pub mod metrics;
pub mod status;
pub mod stt;
pub mod tts;

pub use error::{PoolError, SynthesisError};
pub use events::{SttEvent, SttOptions};
pub use metrics::{PoolMetrics, PoolMetricsRegistry};
pub use status::{PoolSnapshot, PoolStatus};
pub use stt::{new_client_id, SttConnector, SttPool, SttPoolConfig, SttSlot, SttStream};
pub use tts::{TtsConfig, TtsLaneSnapshot, TtsQueue};
