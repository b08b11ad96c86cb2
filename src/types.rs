use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Domain {
    Com,
    Cn,
}

impl Domain {
    pub fn as_str(&self) -> &str {
        match self {
            Domain::Com => "com",
            Domain::Cn => "cn",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Which media kinds the `list` report includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFilter {
    All,
    Photos,
    Videos,
}

impl MediaFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFilter::All => "all",
            MediaFilter::Photos => "photos",
            MediaFilter::Videos => "videos",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_filter_strings() {
        assert_eq!(LogLevel::Debug.as_filter(), "debug");
        assert_eq!(LogLevel::Warn.as_filter(), "warn");
    }

    #[test]
    fn test_media_filter_serde_lowercase() {
        let json = serde_json::to_string(&MediaFilter::Videos).unwrap();
        assert_eq!(json, "\"videos\"");
        let parsed: MediaFilter = serde_json::from_str("\"photos\"").unwrap();
        assert_eq!(parsed, MediaFilter::Photos);
    }
}
