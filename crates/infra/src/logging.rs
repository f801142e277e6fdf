//! Operation logging hook.
//!
//! Repository operations report `(severity, template, args)` to an optional
//! [`OperationLogger`]. The default sink forwards to `tracing`.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;

/// Template used for every mutating repository operation.
pub const OPERATION_TEMPLATE: &str = "{method}({arg}) result={result}";

/// Log severity for operation records.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Trace,
    #[default]
    Debug,
    Info,
    Warn,
    Error,
}

impl LogSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogSeverity {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" | "information" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(RepositoryError::invalid_argument(format!(
                "unknown log severity '{other}'"
            ))),
        }
    }
}

impl From<LogSeverity> for tracing::Level {
    fn from(value: LogSeverity) -> Self {
        match value {
            LogSeverity::Trace => tracing::Level::TRACE,
            LogSeverity::Debug => tracing::Level::DEBUG,
            LogSeverity::Info => tracing::Level::INFO,
            LogSeverity::Warn => tracing::Level::WARN,
            LogSeverity::Error => tracing::Level::ERROR,
        }
    }
}

/// Sink for repository operation records.
///
/// Implementations must not panic; a failing sink should drop the record.
pub trait OperationLogger: Send + Sync {
    /// Record one operation. `template` names its holes; `args` fill them in order.
    fn log(&self, severity: LogSeverity, template: &str, args: &[&dyn fmt::Display]);
}

/// Fill `{name}` holes of a message template positionally.
///
/// Holes beyond the supplied args are left as written; extra args are ignored.
pub fn format_message(template: &str, args: &[&dyn fmt::Display]) -> String {
    let mut out = String::with_capacity(template.len() + 32);
    let mut args = args.iter();
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        match args.next() {
            Some(arg) => out.push_str(&arg.to_string()),
            None => out.push_str(&rest[start..start + len + 1]),
        }
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    out
}

/// Forwards operation records to `tracing` at the requested level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingOperationLogger;

impl OperationLogger for TracingOperationLogger {
    fn log(&self, severity: LogSeverity, template: &str, args: &[&dyn fmt::Display]) {
        let message = format_message(template, args);
        match severity {
            LogSeverity::Trace => tracing::trace!(target: "idrepo::repository", "{message}"),
            LogSeverity::Debug => tracing::debug!(target: "idrepo::repository", "{message}"),
            LogSeverity::Info => tracing::info!(target: "idrepo::repository", "{message}"),
            LogSeverity::Warn => tracing::warn!(target: "idrepo::repository", "{message}"),
            LogSeverity::Error => tracing::error!(target: "idrepo::repository", "{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_message_fills_holes_in_order() {
        let msg = format_message(OPERATION_TEMPLATE, &[&"add_item", &"Customer #1", &1]);
        assert_eq!(msg, "add_item(Customer #1) result=1");
    }

    #[test]
    fn format_message_keeps_unfilled_holes() {
        assert_eq!(format_message("{a} and {b}", &[&1]), "1 and {b}");
        assert_eq!(format_message("no holes", &[&1]), "no holes");
        assert_eq!(format_message("open {a", &[&1]), "open {a");
    }

    #[test]
    fn severity_parses_case_insensitively() {
        assert_eq!("DEBUG".parse::<LogSeverity>().unwrap(), LogSeverity::Debug);
        assert_eq!("warning".parse::<LogSeverity>().unwrap(), LogSeverity::Warn);
        assert!("loud".parse::<LogSeverity>().is_err());
        assert_eq!(LogSeverity::default(), LogSeverity::Debug);
    }

    #[test]
    fn tracing_logger_accepts_every_level() {
        let logger = TracingOperationLogger;
        for severity in [
            LogSeverity::Trace,
            LogSeverity::Debug,
            LogSeverity::Info,
            LogSeverity::Warn,
            LogSeverity::Error,
        ] {
            logger.log(severity, OPERATION_TEMPLATE, &[&"m", &"arg", &0]);
        }
    }
}
