use std::time::Duration;

use log::warn;
use url::Url;

use crate::error::ConfigError;

/// Which side of the call leg is forked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    /// Audio heard from the channel (the remote party).
    In,
    /// Audio spoken into the channel (the local party).
    Out,
    /// Both sides, mixed.
    Both,
}

impl Direction {
    /// Parse a direction keyword. Unknown values fall back to `Both` with a
    /// warning instead of failing the whole start request.
    pub fn parse_lenient(s: &str) -> Direction {
        if s.eq_ignore_ascii_case("in") {
            Direction::In
        } else if s.eq_ignore_ascii_case("out") {
            Direction::Out
        } else if s.eq_ignore_ascii_case("both") {
            Direction::Both
        } else {
            warn!("Invalid direction '{}' given. Using default of 'both'", s);
            Direction::Both
        }
    }

    /// Whether a frame tagged `tagged` satisfies a read for `self`.
    pub(crate) fn accepts(self, tagged: Direction) -> bool {
        self == Direction::Both || tagged == Direction::Both || self == tagged
    }
}

/// Bounded-retry settings for re-establishing a dropped link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

/// Heard/spoken volume adjustments, in the -4..=4 exponent range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeAdjust {
    pub read: i32,
    pub write: i32,
}

/// Maps an adjustment exponent to the factor applied per sample: positive
/// exponents multiply by `1 << x`, negative ones divide by `1 << |x|`,
/// zero leaves samples untouched.
pub(crate) fn volume_factor(x: i32) -> i32 {
    match x {
        0 => 0,
        x if x > 0 => 1 << x,
        x => -(1 << x.unsigned_abs()),
    }
}

/// Transport security settings for `wss://` endpoints. Absent means a
/// plain-text link.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Skip peer certificate verification.
    pub accept_invalid_certs: bool,
}

/// Everything a caller supplies to fork one audio stream.
#[derive(Debug, Clone)]
pub struct ForkConfig {
    /// `ws://` or `wss://` URL of the remote sink.
    pub endpoint: String,
    pub direction: Direction,
    pub reconnect: ReconnectPolicy,
    pub volume: VolumeAdjust,
    pub tls: Option<TlsOptions>,
    /// Shell command executed after the fork completes. Variable
    /// substitution happens before this struct is built.
    pub post_command: Option<String>,
    /// Handle of a periodic tone playing on the channel while forking.
    pub tone_id: Option<String>,
    /// Capture frames only while the owning leg is bridged.
    pub bridged_only: bool,
    /// Substitute silence for frames filtered out by the direction
    /// selector, keeping the forwarded timeline in sync.
    pub sync_silence: bool,
}

impl ForkConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            direction: Direction::Both,
            reconnect: ReconnectPolicy::default(),
            volume: VolumeAdjust::default(),
            tls: None,
            post_command: None,
            tone_id: None,
            bridged_only: false,
            sync_silence: false,
        }
    }

    /// Validate and normalize before a session is created. Hard errors
    /// reject the start request; out-of-range volumes are warned about and
    /// dropped, matching the leniency of the dialplan surface.
    pub(crate) fn validated(mut self) -> Result<ForkConfig, ConfigError> {
        let url = Url::parse(&self.endpoint).map_err(|e| ConfigError::Endpoint {
            url: self.endpoint.clone(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ConfigError::Endpoint {
                    url: self.endpoint.clone(),
                    reason: format!("unsupported scheme '{}'", other),
                })
            }
        }

        if self.reconnect.max_attempts == 0 {
            return Err(ConfigError::Policy(
                "at least one connection attempt is required".into(),
            ));
        }

        if !(-4..=4).contains(&self.volume.read) {
            warn!(
                "Heard volume must be between -4 and 4, not {}",
                self.volume.read
            );
            self.volume.read = 0;
        }
        if !(-4..=4).contains(&self.volume.write) {
            warn!(
                "Spoken volume must be between -4 and 4, not {}",
                self.volume.write
            );
            self.volume.write = 0;
        }

        Ok(self)
    }
}
