//! Configuration, validated once at startup.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::domain::asset::Destination;
use crate::domain::scaling::ScalingCaps;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} env var required")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Completion-gate timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Give up once this much time has passed.
    pub timeout: Duration,
    /// Wait before the second round of checks.
    pub initial_interval: Duration,
    /// The wait doubles after every round, up to this bound.
    pub max_interval: Duration,
}

/// Longest completion wait the configuration accepts.
pub const MAX_COMPLETION_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            initial_interval: Duration::from_millis(1000),
            max_interval: Duration::from_millis(10_000),
        }
    }
}

/// Controller configuration, shared by every stage.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Sources above this many bytes are rejected
    pub file_size_limit: u64,
    /// Sources at or below this many bytes are never split
    pub split_size_limit: u64,
    /// Segment length in seconds
    pub segment_duration: u64,
    /// Key component swapped for `<component>_parts` in segment keys
    pub input_contents_path: String,
    /// Where renditions are written
    pub rendition_destination: Destination,
    /// Where thumbnails are written
    pub thumbnail_destination: Destination,
    /// Key prefix of merged outputs
    pub merged_destination: String,
    /// Prefix listing settings templates in the source bucket
    pub templates_prefix: String,
    /// Tag written into job metadata
    pub application: String,
    /// Lifetime of URLs handed to the probing tool
    pub presign_expiry: Duration,
    pub scaling: ScalingCaps,
    pub poll: PollPolicy,
    /// Parent directory for scoped workspaces, system temp dir when unset
    pub work_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Load configuration from environment variables (and `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let config = Self {
            file_size_limit: vars.required_parse("FILE_SIZE_LIMIT")?,
            split_size_limit: vars.required_parse("FILE_SPLIT_SIZE_LIMIT")?,
            segment_duration: vars.required_parse("SEGMENT_DURATION")?,
            input_contents_path: vars
                .required("INPUT_CONTENTS_PATH")?
                .trim_matches('/')
                .to_string(),
            rendition_destination: vars.destination("ENCODED_FILE_DESTINATION")?,
            thumbnail_destination: vars.destination("THUMBNAIL_DESTINATION")?,
            merged_destination: vars
                .required("MERGED_DESTINATION")?
                .trim_matches('/')
                .to_string(),
            templates_prefix: vars
                .optional("JOB_TEMPLATES_PREFIX")
                .unwrap_or_else(|| String::from("jobs/")),
            application: vars
                .optional("APPLICATION")
                .unwrap_or_else(|| String::from("cadenza")),
            presign_expiry: Duration::from_secs(vars.optional_parse("PRESIGN_EXPIRY_SECS", 300)?),
            scaling: ScalingCaps {
                long_edge: vars.optional_parse("SCALE_LONG_EDGE", 960)?,
                short_edge: vars.optional_parse("SCALE_SHORT_EDGE", 540)?,
            },
            poll: PollPolicy {
                timeout: Duration::from_secs(vars.optional_parse("COMPLETION_TIMEOUT_SECS", 300)?),
                initial_interval: Duration::from_millis(
                    vars.optional_parse("POLL_INTERVAL_MS", 1000)?,
                ),
                max_interval: Duration::from_millis(
                    vars.optional_parse("POLL_MAX_INTERVAL_MS", 10_000)?,
                ),
            },
            work_dir: vars.optional("WORK_DIR").map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.split_size_limit > self.file_size_limit {
            return Err(ConfigError::invalid(
                "FILE_SPLIT_SIZE_LIMIT",
                self.split_size_limit.to_string(),
                "must not exceed FILE_SIZE_LIMIT",
            ));
        }
        if self.segment_duration == 0 {
            return Err(ConfigError::invalid("SEGMENT_DURATION", "0", "must be positive"));
        }
        if self.input_contents_path.is_empty() {
            return Err(ConfigError::invalid("INPUT_CONTENTS_PATH", "", "must not be empty"));
        }
        if self.merged_destination.is_empty() {
            return Err(ConfigError::invalid("MERGED_DESTINATION", "", "must not be empty"));
        }
        for (key, edge) in [
            ("SCALE_LONG_EDGE", self.scaling.long_edge),
            ("SCALE_SHORT_EDGE", self.scaling.short_edge),
        ] {
            if edge == 0 || edge % 2 != 0 {
                return Err(ConfigError::invalid(key, edge.to_string(), "must be even and positive"));
            }
        }
        if self.poll.timeout.is_zero() {
            return Err(ConfigError::invalid("COMPLETION_TIMEOUT_SECS", "0", "must be positive"));
        }
        if self.poll.timeout > MAX_COMPLETION_TIMEOUT {
            return Err(ConfigError::invalid(
                "COMPLETION_TIMEOUT_SECS",
                self.poll.timeout.as_secs().to_string(),
                "must not exceed one week",
            ));
        }
        if self.poll.initial_interval.is_zero() {
            return Err(ConfigError::invalid("POLL_INTERVAL_MS", "0", "must be positive"));
        }
        if self.poll.initial_interval > self.poll.max_interval {
            return Err(ConfigError::invalid(
                "POLL_MAX_INTERVAL_MS",
                self.poll.max_interval.as_millis().to_string(),
                "must not be below POLL_INTERVAL_MS",
            ));
        }
        Ok(())
    }
}

/// Settings of the single-host deployment.
#[cfg(feature = "local")]
#[derive(Clone, Debug, PartialEq)]
pub struct LocalConfig {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: u16,
    /// Root of the filesystem object store, one directory per bucket
    pub storage_root: PathBuf,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

#[cfg(feature = "local")]
impl LocalConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        Ok(Self {
            addr: vars.optional("ADDR").unwrap_or_else(|| String::from("127.0.0.1")),
            port: vars.optional_parse("PORT", 3000)?,
            storage_root: vars
                .optional("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./storage")),
            ffmpeg: vars
                .optional("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            ffprobe: vars
                .optional("FFPROBE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffprobe")),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

/// Settings only the AWS adapters need.
#[cfg(feature = "aws")]
#[derive(Clone, Debug)]
pub struct AwsConfig {
    /// IAM role MediaConvert assumes for jobs
    pub mediaconvert_role: String,
    /// Account-specific MediaConvert endpoint
    pub mediaconvert_endpoint: String,
    /// State machine started by the trigger stage
    pub state_machine_arn: Option<String>,
}

#[cfg(feature = "aws")]
impl AwsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let vars = Vars(|key: &str| env::var(key).ok());
        Ok(Self {
            mediaconvert_role: vars.required("MEDIACONVERT_ROLE")?,
            mediaconvert_endpoint: vars.required("MEDIACONVERT_ENDPOINT")?,
            state_machine_arn: vars.optional("STATE_MACHINE_ARN"),
        })
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &'static str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn required_parse<T>(&self, key: &'static str) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.required(key)?;
        raw.trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(key, raw.clone(), e.to_string()))
    }

    fn optional_parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(_) => self.required_parse(key),
            None => Ok(default),
        }
    }

    fn destination(&self, key: &'static str) -> Result<Destination, ConfigError> {
        let raw = self.required(key)?;
        Destination::parse(&raw).map_err(|e| ConfigError::invalid(key, raw.clone(), e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) fn base_vars() -> HashMap<&'static str, String> {
        HashMap::from([
            ("FILE_SIZE_LIMIT", (3u64 << 30).to_string()),
            ("FILE_SPLIT_SIZE_LIMIT", (100u64 << 20).to_string()),
            ("SEGMENT_DURATION", "60".to_string()),
            ("INPUT_CONTENTS_PATH", "input".to_string()),
            ("ENCODED_FILE_DESTINATION", "media/encoded".to_string()),
            ("THUMBNAIL_DESTINATION", "media/thumbnails".to_string()),
            ("MERGED_DESTINATION", "output".to_string()),
        ])
    }

    pub(crate) fn config_from(vars: &HashMap<&'static str, String>) -> Result<PipelineConfig, ConfigError> {
        PipelineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    /// A valid configuration for tests elsewhere in the crate.
    pub(crate) fn test_config() -> PipelineConfig {
        config_from(&base_vars()).unwrap()
    }

    #[cfg(feature = "local")]
    #[test]
    fn test_local_defaults() {
        let local = LocalConfig::from_lookup(|_| None).unwrap();
        assert_eq!(local.bind_addr(), "127.0.0.1:3000");
        assert_eq!(local.storage_root, PathBuf::from("./storage"));
        assert_eq!(local.ffprobe, PathBuf::from("ffprobe"));
    }

    #[cfg(feature = "local")]
    #[test]
    fn test_local_port_must_parse() {
        let err = LocalConfig::from_lookup(|key| (key == "PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }

    #[test]
    fn test_defaults_apply() {
        let config = test_config();
        assert_eq!(config.segment_duration, 60);
        assert_eq!(config.templates_prefix, "jobs/");
        assert_eq!(config.application, "cadenza");
        assert_eq!(config.scaling, ScalingCaps::default());
        assert_eq!(config.poll, PollPolicy::default());
        assert_eq!(config.rendition_destination.bucket, "media");
        assert_eq!(config.rendition_destination.prefix, "encoded/");
        assert!(config.work_dir.is_none());
    }

    #[test]
    fn test_missing_required_key_is_fatal() {
        let mut vars = base_vars();
        vars.remove("SEGMENT_DURATION");
        assert_eq!(
            config_from(&vars).unwrap_err(),
            ConfigError::Missing("SEGMENT_DURATION")
        );
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut vars = base_vars();
        vars.insert("MERGED_DESTINATION", "  ".to_string());
        assert_eq!(
            config_from(&vars).unwrap_err(),
            ConfigError::Missing("MERGED_DESTINATION")
        );
    }

    #[test]
    fn test_unparsable_number_is_invalid() {
        let mut vars = base_vars();
        vars.insert("FILE_SIZE_LIMIT", "3GB".to_string());
        assert!(matches!(
            config_from(&vars).unwrap_err(),
            ConfigError::Invalid { key: "FILE_SIZE_LIMIT", .. }
        ));
    }

    #[test]
    fn test_split_threshold_above_ceiling_is_invalid() {
        let mut vars = base_vars();
        vars.insert("FILE_SPLIT_SIZE_LIMIT", (4u64 << 30).to_string());
        assert!(matches!(
            config_from(&vars).unwrap_err(),
            ConfigError::Invalid { key: "FILE_SPLIT_SIZE_LIMIT", .. }
        ));
    }

    #[test]
    fn test_odd_scaling_cap_is_invalid() {
        let mut vars = base_vars();
        vars.insert("SCALE_LONG_EDGE", "961".to_string());
        assert!(matches!(
            config_from(&vars).unwrap_err(),
            ConfigError::Invalid { key: "SCALE_LONG_EDGE", .. }
        ));
    }

    #[test]
    fn test_poll_bounds_are_checked() {
        let mut vars = base_vars();
        vars.insert("POLL_INTERVAL_MS", "5000".to_string());
        vars.insert("POLL_MAX_INTERVAL_MS", "1000".to_string());
        assert!(matches!(
            config_from(&vars).unwrap_err(),
            ConfigError::Invalid { key: "POLL_MAX_INTERVAL_MS", .. }
        ));

        let mut vars = base_vars();
        vars.insert("COMPLETION_TIMEOUT_SECS", "0".to_string());
        assert!(matches!(
            config_from(&vars).unwrap_err(),
            ConfigError::Invalid { key: "COMPLETION_TIMEOUT_SECS", .. }
        ));
    }

    #[test]
    fn test_completion_timeout_is_capped() {
        let mut vars = base_vars();
        vars.insert("COMPLETION_TIMEOUT_SECS", u64::MAX.to_string());
        assert!(matches!(
            config_from(&vars).unwrap_err(),
            ConfigError::Invalid { key: "COMPLETION_TIMEOUT_SECS", .. }
        ));

        let mut vars = base_vars();
        vars.insert(
            "COMPLETION_TIMEOUT_SECS",
            MAX_COMPLETION_TIMEOUT.as_secs().to_string(),
        );
        assert_eq!(config_from(&vars).unwrap().poll.timeout, MAX_COMPLETION_TIMEOUT);
    }
}
