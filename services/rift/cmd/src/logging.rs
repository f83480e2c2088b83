use std::fmt;
use std::fmt::Write as _;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// ANSI color codes for console output
const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";
const COLOR_BRIGHT_GRAY: &str = "\x1b[90m";

/// Column widths for alignment
const COMPONENT_WIDTH: usize = 12;
const LOG_LEVEL_WIDTH: usize = 7;

/// Log line formatter: `[timestamp] [component] [level] message key=value`
///
/// Protocol crates tag their events with a `component` field (`rift-lie`,
/// `rift-flood`, `rift-spf`, ...); events without one are attributed to the
/// process itself.
pub struct RiftLogFormatter {
    process_name: String,
    color_enabled: bool,
}

impl RiftLogFormatter {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            color_enabled: is_terminal(),
        }
    }

    #[cfg(test)]
    fn plain(process_name: &str) -> Self {
        Self {
            process_name: process_name.to_string(),
            color_enabled: false,
        }
    }

    /// Component column with fixed width
    fn format_component(&self, component: Option<&str>) -> String {
        let name = component.unwrap_or(&self.process_name);
        if name.chars().count() > COMPONENT_WIDTH {
            let truncated: String = name.chars().take(COMPONENT_WIDTH - 1).collect();
            format!("{}…", truncated)
        } else {
            format!("{:<width$}", name, width = COMPONENT_WIDTH)
        }
    }

    /// Level column with a visual indicator
    fn format_log_level(&self, level: &tracing::Level) -> String {
        let level_str = match *level {
            tracing::Level::ERROR => "✗ ERROR",
            tracing::Level::WARN => "⚠ WARN",
            tracing::Level::INFO => "ℹ INFO",
            tracing::Level::DEBUG => "◦ DEBUG",
            tracing::Level::TRACE => "◦ TRACE",
        };
        format!("{:<width$}", level_str, width = LOG_LEVEL_WIDTH + 2)
    }

    fn color_for_level(&self, level: &tracing::Level) -> &'static str {
        if !self.color_enabled {
            return "";
        }
        match *level {
            tracing::Level::ERROR => COLOR_BRIGHT_RED,
            tracing::Level::WARN => COLOR_BRIGHT_YELLOW,
            tracing::Level::INFO => COLOR_GREEN,
            tracing::Level::DEBUG | tracing::Level::TRACE => COLOR_BRIGHT_GRAY,
        }
    }

    fn format_line(&self, timestamp: &str, level: &tracing::Level, fields: &FieldVisitor) -> String {
        let color = self.color_for_level(level);
        let (reset, cyan) = if self.color_enabled {
            (COLOR_RESET, COLOR_CYAN)
        } else {
            ("", "")
        };
        format!(
            "{}[{}] [{}] [{}{}{}] {}{}{}",
            cyan,
            timestamp,
            self.format_component(fields.component.as_deref()),
            color,
            self.format_log_level(level),
            reset,
            fields.message,
            fields.extra,
            reset
        )
    }
}

impl<S, N> FormatEvent<S, N> for RiftLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = chrono::Local::now()
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        writeln!(
            writer,
            "{}",
            self.format_line(&timestamp, event.metadata().level(), &visitor)
        )
    }
}

/// Collects the message, the component and any other fields of an event
#[derive(Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
    extra: String,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "component" => self.component = Some(unquote(&format!("{:?}", value))),
            name => {
                let _ = write!(self.extra, " {}={:?}", name, value);
            }
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            name => {
                let _ = write!(self.extra, " {}={}", name, value);
            }
        }
    }
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

/// Whether stdout is a terminal that understands colors
fn is_terminal() -> bool {
    use std::io::IsTerminal;
    std::env::var("TERM").map_or(false, |term| term != "dumb") && std::io::stdout().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_column() {
        let formatter = RiftLogFormatter::plain("rift");
        assert_eq!(formatter.format_component(None), "rift        ");
        assert_eq!(formatter.format_component(Some("rift-lie")), "rift-lie    ");
        assert_eq!(
            formatter.format_component(Some("rift-disaggregation")),
            "rift-disagg…"
        );
    }

    #[test]
    fn test_plain_line() {
        let formatter = RiftLogFormatter::plain("rift");
        let fields = FieldVisitor {
            message: "Interface if1 adjacency OneWay -> TwoWay".to_string(),
            component: Some("rift-lie".to_string()),
            extra: " node=leaf-1".to_string(),
        };
        let line = formatter.format_line("2024-01-01 00:00:00.000", &tracing::Level::INFO, &fields);
        assert_eq!(
            line,
            "[2024-01-01 00:00:00.000] [rift-lie    ] [ℹ INFO   ] \
             Interface if1 adjacency OneWay -> TwoWay node=leaf-1"
        );
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"rift-spf\""), "rift-spf");
        assert_eq!(unquote("plain"), "plain");
    }
}
