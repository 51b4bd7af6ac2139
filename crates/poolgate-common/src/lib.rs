mod config;
mod model_table;
pub mod messages;
mod tier;

pub use config::{GatewayConfig, GatewayConfigError, GatewayConfigPatch};
pub use model_table::{ModelInfo, ModelTable, ModelTableError};
pub use tier::{OPUS_MODEL, SONNET_MODEL, Tier, TierParseError};
