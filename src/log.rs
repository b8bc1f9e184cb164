use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

/// One structured diagnostic kept in the extraction result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub stage: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page {
            Some(page) => write!(f, "[{}] p{} {}", self.stage, page, self.message),
            None => write!(f, "[{}] {}", self.stage, self.message),
        }
    }
}

/// Synchronous observer invoked for every entry as it is appended.
pub type LogCallback = Arc<dyn Fn(&LogEntry) + Send + Sync>;

/// Per-run diagnostics: appended in memory, mirrored to `tracing`, and
/// optionally forwarded to a caller callback.
#[derive(Default)]
pub struct RunLog {
    entries: Vec<LogEntry>,
    callback: Option<LogCallback>,
}

impl fmt::Debug for RunLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLog")
            .field("entries", &self.entries.len())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl RunLog {
    pub fn new(callback: Option<LogCallback>) -> Self {
        RunLog {
            entries: Vec::new(),
            callback,
        }
    }

    pub fn push(&mut self, level: LogLevel, stage: &'static str, page: Option<u32>, message: impl Into<String>) {
        let entry = LogEntry {
            level,
            stage,
            message: message.into(),
            page,
        };
        match level {
            LogLevel::Debug => debug!(stage, page, "{}", entry.message),
            LogLevel::Info => info!(stage, page, "{}", entry.message),
            LogLevel::Warn => warn!(stage, page, "{}", entry.message),
        }
        if let Some(cb) = &self.callback {
            cb(&entry);
        }
        self.entries.push(entry);
    }

    pub fn debug(&mut self, stage: &'static str, message: impl Into<String>) {
        self.push(LogLevel::Debug, stage, None, message);
    }

    pub fn info(&mut self, stage: &'static str, message: impl Into<String>) {
        self.push(LogLevel::Info, stage, None, message);
    }

    pub fn warn(&mut self, stage: &'static str, message: impl Into<String>) {
        self.push(LogLevel::Warn, stage, None, message);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn callback_sees_every_entry() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut log = RunLog::new(Some(Arc::new(move |e: &LogEntry| {
            sink.lock().unwrap().push(e.to_string());
        })));
        log.info("candidates", "3 windows");
        log.push(LogLevel::Warn, "certidao", Some(7), "no signer");
        assert_eq!(log.entries().len(), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["[candidates] 3 windows".to_string(), "[certidao] p7 no signer".to_string()]
        );
    }
}
