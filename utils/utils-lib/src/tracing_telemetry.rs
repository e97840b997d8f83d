use crate::constants::{RUST_LOG_QUIET_DEFAULTS, TUNNEL_TRACE_VERBOSITY};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Fmt Layer for console output.
pub enum FmtLayer {
    /// Output traces to stdout.
    Stdout,
    /// Output traces to stderr.
    Stderr,
    /// Don't output traces to console.
    None,
}

/// Tracing telemetry style.
#[derive(Debug, Clone, Copy, strum_macros::EnumString, strum_macros::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum FmtStyle {
    /// Compact style.
    Compact,
    /// Pretty Style.
    Pretty,
    /// JSON Style.
    Json,
}

/// Tracing telemetry builder.
pub struct TracingTelemetry {
    writer: FmtLayer,
    style: FmtStyle,
    colours: bool,
    verbosity: u8,
}

impl TracingTelemetry {
    /// Tracing telemetry default builder.
    /// Traces go to stderr so that stdout is left for the command output.
    pub fn builder() -> Self {
        Self {
            writer: FmtLayer::Stderr,
            style: FmtStyle::Compact,
            colours: true,
            verbosity: 0,
        }
    }
    /// Specify writer stream.
    pub fn with_writer(self, writer: FmtLayer) -> TracingTelemetry {
        TracingTelemetry { writer, ..self }
    }
    /// Specify style.
    pub fn with_style(self, style: FmtStyle) -> TracingTelemetry {
        TracingTelemetry { style, ..self }
    }
    /// Specify whether colour is needed or not.
    pub fn with_colours(self, colours: bool) -> TracingTelemetry {
        TracingTelemetry { colours, ..self }
    }
    /// Specify the verbosity, ie the number of `-v` flags given on the cmdline.
    pub fn with_verbosity(self, verbosity: u8) -> TracingTelemetry {
        TracingTelemetry { verbosity, ..self }
    }

    /// Initialize the telemetry instance.
    /// If set, `RUST_LOG` takes precedence over the verbosity.
    pub fn init(self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(verbosity_directives(self.verbosity)));

        let stdout = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(self.colours);
        let stderr = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(self.colours);

        let subscriber = Registry::default().with(filter);

        match (self.writer, self.style) {
            (FmtLayer::Stderr, FmtStyle::Compact) => subscriber.with(stderr.compact()).init(),
            (FmtLayer::Stdout, FmtStyle::Compact) => subscriber.with(stdout.compact()).init(),
            (FmtLayer::Stderr, FmtStyle::Pretty) => subscriber.with(stderr.pretty()).init(),
            (FmtLayer::Stdout, FmtStyle::Pretty) => subscriber.with(stdout.pretty()).init(),
            (FmtLayer::Stderr, FmtStyle::Json) => subscriber.with(stderr.json()).init(),
            (FmtLayer::Stdout, FmtStyle::Json) => subscriber.with(stdout.json()).init(),
            (FmtLayer::None, _) => subscriber.init(),
        };
    }
}

/// Maps the verbosity to a tracing level.
pub fn verbosity_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        v if v == TUNNEL_TRACE_VERBOSITY => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Filter directives for the given verbosity.
/// Dependencies are kept quiet unless we're tracing our own code.
pub fn verbosity_directives(verbosity: u8) -> String {
    let level = verbosity_level(verbosity);
    if level == Level::DEBUG {
        format!("{},{RUST_LOG_QUIET_DEFAULTS}", level.as_str().to_lowercase())
    } else {
        level.as_str().to_lowercase()
    }
}
