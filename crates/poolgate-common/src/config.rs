use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GatewayConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Final, merged gateway configuration used by the running process.
///
/// Merge order: ENV > defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Fixed window an account spends in cooldown per limited model.
    pub cooldown_window: Duration,
    /// Registration retry budget during a normal pool load.
    pub register_retries: u32,
    /// Registration retry budget during an admin-triggered reload.
    pub register_retries_reload: u32,
    /// Pause between registration attempts.
    pub register_wait: Duration,
    /// Whole-stream retry attempts before surfacing the error as text.
    pub stream_attempts: u32,
    /// Pause between streaming attempts.
    pub stream_retry_delay: Duration,
    /// Accounts probed concurrently per sweep batch.
    pub probe_batch_size: usize,
    /// Pause between sweep batches.
    pub probe_batch_pause: Duration,
    /// Whether transcripts are trimmed to the model's token limit.
    pub token_trimming: bool,
    /// Most recent attachment paths carried into a request.
    pub max_attachments: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            cooldown_window: Duration::from_secs(8 * 3600),
            register_retries: 1,
            register_retries_reload: 15,
            register_wait: Duration::from_secs(3),
            stream_attempts: 3,
            stream_retry_delay: Duration::from_secs(1),
            probe_batch_size: 3,
            probe_batch_pause: Duration::from_secs(1),
            token_trimming: true,
            max_attachments: 5,
        }
    }
}

/// Optional layer used for merging gateway config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayConfigPatch {
    pub cooldown_window: Option<Duration>,
    pub register_retries: Option<u32>,
    pub register_retries_reload: Option<u32>,
    pub register_wait: Option<Duration>,
    pub stream_attempts: Option<u32>,
    pub stream_retry_delay: Option<Duration>,
    pub probe_batch_size: Option<usize>,
    pub probe_batch_pause: Option<Duration>,
    pub token_trimming: Option<bool>,
    pub max_attachments: Option<usize>,
}

impl GatewayConfigPatch {
    /// Reads `POOLGATE_*` overrides from the environment.
    pub fn from_env() -> Result<Self, GatewayConfigError> {
        Ok(Self {
            cooldown_window: env_secs("POOLGATE_COOLDOWN_SECS")?,
            register_retries: env_parse("POOLGATE_REGISTER_RETRIES")?,
            register_retries_reload: env_parse("POOLGATE_REGISTER_RETRIES_RELOAD")?,
            register_wait: env_secs("POOLGATE_REGISTER_WAIT_SECS")?,
            stream_attempts: env_parse("POOLGATE_STREAM_ATTEMPTS")?,
            stream_retry_delay: env_secs("POOLGATE_STREAM_RETRY_DELAY_SECS")?,
            probe_batch_size: env_parse("POOLGATE_PROBE_BATCH_SIZE")?,
            probe_batch_pause: env_secs("POOLGATE_PROBE_BATCH_PAUSE_SECS")?,
            token_trimming: env_parse("POOLGATE_TOKEN_TRIMMING")?,
            max_attachments: env_parse("POOLGATE_MAX_ATTACHMENTS")?,
        })
    }

    pub fn overlay(&mut self, other: GatewayConfigPatch) {
        if other.cooldown_window.is_some() {
            self.cooldown_window = other.cooldown_window;
        }
        if other.register_retries.is_some() {
            self.register_retries = other.register_retries;
        }
        if other.register_retries_reload.is_some() {
            self.register_retries_reload = other.register_retries_reload;
        }
        if other.register_wait.is_some() {
            self.register_wait = other.register_wait;
        }
        if other.stream_attempts.is_some() {
            self.stream_attempts = other.stream_attempts;
        }
        if other.stream_retry_delay.is_some() {
            self.stream_retry_delay = other.stream_retry_delay;
        }
        if other.probe_batch_size.is_some() {
            self.probe_batch_size = other.probe_batch_size;
        }
        if other.probe_batch_pause.is_some() {
            self.probe_batch_pause = other.probe_batch_pause;
        }
        if other.token_trimming.is_some() {
            self.token_trimming = other.token_trimming;
        }
        if other.max_attachments.is_some() {
            self.max_attachments = other.max_attachments;
        }
    }

    pub fn into_config(self) -> GatewayConfig {
        let defaults = GatewayConfig::default();
        GatewayConfig {
            cooldown_window: self.cooldown_window.unwrap_or(defaults.cooldown_window),
            register_retries: self.register_retries.unwrap_or(defaults.register_retries),
            register_retries_reload: self
                .register_retries_reload
                .unwrap_or(defaults.register_retries_reload),
            register_wait: self.register_wait.unwrap_or(defaults.register_wait),
            stream_attempts: self.stream_attempts.unwrap_or(defaults.stream_attempts),
            stream_retry_delay: self
                .stream_retry_delay
                .unwrap_or(defaults.stream_retry_delay),
            probe_batch_size: self.probe_batch_size.unwrap_or(defaults.probe_batch_size),
            probe_batch_pause: self
                .probe_batch_pause
                .unwrap_or(defaults.probe_batch_pause),
            token_trimming: self.token_trimming.unwrap_or(defaults.token_trimming),
            max_attachments: self.max_attachments.unwrap_or(defaults.max_attachments),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, GatewayConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| GatewayConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(None),
    }
}

fn env_secs(name: &'static str) -> Result<Option<Duration>, GatewayConfigError> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_secs))
}
