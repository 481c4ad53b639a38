// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::emit::Emitter;
use crate::error::{Error, Result};
use crate::finder::{FileFinder, OrderingCriteria};
use crate::fingerprint::DEFAULT_FINGERPRINT_SIZE;
use crate::manager::{Manager, PollSettings};
use crate::reader::ReaderFactory;

/// Smallest fingerprint that still tells files apart reliably
pub const MIN_FINGERPRINT_SIZE: usize = 16;

/// Record lengths are tracked as u32
pub const MAX_LOG_SIZE_LIMIT: usize = u32::MAX as usize;

/// Where to start reading from when a file is first discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAt {
    /// Start reading from the beginning of the file
    Beginning,
    /// Start reading from the end of the file (only new content)
    #[default]
    End,
}

/// Configuration for a file consumer
#[derive(Debug, Clone, Deserialize)]
pub struct FileConsumerConfig {
    /// Glob patterns for files to include
    pub include: Vec<String>,

    /// Glob patterns for files to exclude
    #[serde(default)]
    pub exclude: Vec<String>,

    /// How often to poll for file changes (in milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Where to start reading files found on the first poll
    #[serde(default)]
    pub start_at: StartAt,

    /// Size of fingerprint to use for file identification (in bytes)
    #[serde(default = "default_fingerprint_size")]
    pub fingerprint_size: usize,

    /// Maximum size of a single log entry (in bytes)
    #[serde(default = "default_max_log_size")]
    pub max_log_size: usize,

    /// Maximum number of files open at once. Half of them are read per
    /// batch, the other half is kept for draining rotated files.
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,

    /// Maximum number of batches per poll, 0 for no limit
    #[serde(default)]
    pub max_batches: usize,

    /// Maximum number of records per emitted batch
    #[serde(default = "default_emit_batch_size")]
    pub emit_batch_size: usize,

    /// Number of readers remembered for matching; defaults to three times
    /// `max_concurrent_files`
    #[serde(default)]
    pub known_files_capacity: Option<usize>,

    /// Whether to include the file name as an attribute
    #[serde(default = "default_true")]
    pub include_file_name: bool,

    /// Whether to include the file path as an attribute
    #[serde(default)]
    pub include_file_path: bool,

    /// Only read the best-ranked matches
    #[serde(default)]
    pub ordering_criteria: Option<OrderingCriteria>,
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_fingerprint_size() -> usize {
    DEFAULT_FINGERPRINT_SIZE
}

fn default_max_log_size() -> usize {
    1024 * 1024 // 1MB
}

fn default_max_concurrent_files() -> usize {
    512
}

fn default_emit_batch_size() -> usize {
    100
}

fn default_true() -> bool {
    true
}

impl Default for FileConsumerConfig {
    fn default() -> Self {
        Self {
            include: vec![],
            exclude: vec![],
            poll_interval_ms: default_poll_interval_ms(),
            start_at: StartAt::default(),
            fingerprint_size: default_fingerprint_size(),
            max_log_size: default_max_log_size(),
            max_concurrent_files: default_max_concurrent_files(),
            max_batches: 0,
            emit_batch_size: default_emit_batch_size(),
            known_files_capacity: None,
            include_file_name: true,
            include_file_path: false,
            ordering_criteria: None,
        }
    }
}

impl FileConsumerConfig {
    /// Get the poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn known_files_capacity(&self) -> usize {
        self.known_files_capacity
            .unwrap_or(self.max_concurrent_files * 3)
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.include.is_empty() {
            return Err("include patterns cannot be empty".to_string());
        }

        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be positive".to_string());
        }

        if self.fingerprint_size < MIN_FINGERPRINT_SIZE {
            return Err(format!(
                "fingerprint_size must be at least {} bytes",
                MIN_FINGERPRINT_SIZE
            ));
        }

        if self.max_log_size == 0 {
            return Err("max_log_size must be positive".to_string());
        }

        if self.max_log_size > MAX_LOG_SIZE_LIMIT {
            return Err(format!(
                "max_log_size must be at most {} bytes",
                MAX_LOG_SIZE_LIMIT
            ));
        }

        if self.max_concurrent_files < 2 {
            return Err("max_concurrent_files must be at least 2".to_string());
        }

        if self.emit_batch_size == 0 {
            return Err("emit_batch_size must be positive".to_string());
        }

        if self.known_files_capacity() < self.max_concurrent_files / 2 {
            return Err("known_files_capacity must hold at least one batch of files".to_string());
        }

        if let Some(ordering) = &self.ordering_criteria {
            if !ordering.is_empty() && ordering.regex.is_empty() {
                return Err("ordering_criteria.regex must be set".to_string());
            }
            if !ordering.is_empty() && ordering.sort_by.is_empty() {
                return Err("ordering_criteria.sort_by must not be empty".to_string());
            }
            if ordering.top_n == 0 {
                return Err("ordering_criteria.top_n must be at least 1".to_string());
            }
        }

        Ok(())
    }

    /// Validate the configuration and build a stopped manager delivering
    /// records to `emitter`.
    pub fn build(&self, emitter: Arc<dyn Emitter>) -> Result<Manager> {
        self.validate().map_err(Error::Config)?;

        let finder = FileFinder::new(
            self.include.clone(),
            self.exclude.clone(),
            self.ordering_criteria.clone(),
        )?;

        let factory = ReaderFactory {
            fingerprint_size: self.fingerprint_size,
            max_log_size: self.max_log_size,
            emit_batch_size: self.emit_batch_size,
            include_file_name: self.include_file_name,
            include_file_path: self.include_file_path,
            from_beginning: self.start_at == StartAt::Beginning,
        };

        let settings = PollSettings {
            poll_interval: self.poll_interval(),
            max_batch_files: self.max_concurrent_files / 2,
            max_batches: self.max_batches,
            known_files_capacity: self.known_files_capacity(),
        };

        Ok(Manager::new(finder, factory, emitter, settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::test_support::RecordingEmitter;
    use crate::finder::SortRule;
    use crate::manager::ManagerState;

    fn valid() -> FileConsumerConfig {
        FileConsumerConfig {
            include: vec!["/var/log/*.log".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = FileConsumerConfig::default();
        assert_eq!(config.poll_interval_ms, 200);
        assert_eq!(config.fingerprint_size, 1000);
        assert_eq!(config.max_log_size, 1024 * 1024);
        assert_eq!(config.max_concurrent_files, 512);
        assert_eq!(config.max_batches, 0);
        assert_eq!(config.emit_batch_size, 100);
        assert_eq!(config.known_files_capacity(), 1536);
        assert_eq!(config.start_at, StartAt::End);
        assert!(config.include_file_name);
        assert!(!config.include_file_path);
    }

    #[test]
    fn test_config_deserialize() {
        let json = r#"{
            "include": ["/var/log/app/*.log"],
            "exclude": ["/var/log/app/debug.log"],
            "start_at": "beginning",
            "poll_interval_ms": 50,
            "max_concurrent_files": 4,
            "ordering_criteria": {
                "regex": "app\\.(?P<n>\\d+)\\.log",
                "sort_by": [{"sort_type": "numeric", "regex_key": "n"}]
            }
        }"#;

        let config: FileConsumerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.start_at, StartAt::Beginning);
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.fingerprint_size, 1000);
        assert_eq!(config.known_files_capacity(), 12);

        let ordering = config.ordering_criteria.as_ref().unwrap();
        assert_eq!(ordering.top_n, 1);
        assert_eq!(
            ordering.sort_by,
            vec![SortRule::Numeric {
                regex_key: "n".to_string(),
                ascending: false
            }]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.include = vec![];
        assert!(config.validate().is_err());

        let mut config = valid();
        config.fingerprint_size = 10;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.max_concurrent_files = 1;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.emit_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.max_log_size = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.max_log_size = MAX_LOG_SIZE_LIMIT;
        assert!(config.validate().is_ok());

        #[cfg(target_pointer_width = "64")]
        {
            let mut config = valid();
            config.max_log_size = MAX_LOG_SIZE_LIMIT + 1;
            assert!(config.validate().is_err());
        }

        let mut config = valid();
        config.known_files_capacity = Some(1);
        assert!(config.validate().is_err());

        let mut config = valid();
        config.ordering_criteria = Some(OrderingCriteria {
            regex: String::new(),
            top_n: 1,
            sort_by: vec![SortRule::Alphabetical {
                regex_key: "x".to_string(),
                ascending: true,
            }],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_reports_config_errors() {
        let emitter = Arc::new(RecordingEmitter::default());

        let config = FileConsumerConfig::default();
        assert!(matches!(config.build(emitter.clone()), Err(Error::Config(_))));

        let mut config = valid();
        config.include = vec!["/var/log/[".to_string()];
        assert!(matches!(config.build(emitter.clone()), Err(Error::InvalidGlob(_))));

        let mut config = valid();
        config.ordering_criteria = Some(OrderingCriteria {
            regex: r"(?P<n>\d+".to_string(),
            top_n: 1,
            sort_by: vec![SortRule::Numeric {
                regex_key: "n".to_string(),
                ascending: false,
            }],
        });
        assert!(matches!(config.build(emitter), Err(Error::Regex(_))));
    }

    #[test]
    fn test_build_returns_stopped_manager() {
        let manager = valid().build(Arc::new(RecordingEmitter::default())).unwrap();
        assert_eq!(manager.state(), ManagerState::Stopped);
    }
}
