//! Tracing setup for ZimView binaries and tests.
//!
//! Output goes to stderr so that tools printing results on stdout stay
//! parseable. Verbosity can be raised per component without touching the
//! rest, e.g. only the interceptor at `debug`.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-readable.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// One JSON object per event.
    Json,
}

/// Parts of the viewer with their own tracing target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Channel,
    Interceptor,
    Controller,
    Cache,
    Assets,
}

impl Component {
    pub fn target(self) -> &'static str {
        match self {
            Component::Channel => "zimview_channel",
            Component::Interceptor => "zimview_sw",
            Component::Controller => "zimview_controller",
            Component::Cache => "zimview_cache",
            Component::Assets => "zimview_assets",
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level for everything without an override.
    pub level: Level,

    pub format: LogFormat,

    /// Per-component levels.
    pub overrides: Vec<(Component, Level)>,

    /// Raw `EnvFilter` directives; replace everything else when set.
    pub directives: Option<String>,

    /// Source file and line on each event.
    pub with_location: bool,

    /// Span enter/close events.
    pub with_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            overrides: Vec::new(),
            directives: None,
            with_location: false,
            with_spans: false,
        }
    }
}

impl LogConfig {
    /// Debug everywhere, with locations and spans.
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            with_location: true,
            with_spans: true,
            ..Default::default()
        }
    }

    /// JSON at `info`.
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Override the level of one component.
    pub fn component(mut self, component: Component, level: Level) -> Self {
        self.overrides.retain(|(c, _)| *c != component);
        self.overrides.push((component, level));
        self
    }

    pub fn with_directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = Some(directives.into());
        self
    }

    /// Filter directives derived from the level and overrides.
    pub fn filter_directives(&self) -> String {
        let mut directives = self.level.to_string().to_lowercase();
        for (component, level) in &self.overrides {
            directives.push_str(&format!(",{}={}", component.target(), level.to_string().to_lowercase()));
        }
        directives
    }

    /// Explicit directives win, then `RUST_LOG`, then level and overrides.
    fn env_filter(&self) -> EnvFilter {
        let derived = || EnvFilter::new(self.filter_directives());
        match &self.directives {
            Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| derived()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| derived()),
        }
    }
}

/// Install the global subscriber.
///
/// Returns `false` when one was already installed, as happens when several
/// tests in one binary initialise logging.
pub fn init_logging(config: LogConfig) -> bool {
    let spans = if config.with_spans {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(config.with_location)
            .with_line_number(config.with_location)
            .with_span_events(spans)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_span_events(spans)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_span_events(spans)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(config.env_filter()))
        .try_init()
        .is_ok()
}
