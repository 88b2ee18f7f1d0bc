use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    fn is_verbose(self) -> bool {
        matches!(self, LogLevel::Debug | LogLevel::Trace)
    }
}

/// Route `gattrpc*` events at `level` to stderr. Other crates stay at warn.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let filter = Targets::new()
        .with_default(level.as_filter().min(LevelFilter::WARN))
        .with_target("gattrpc", level.as_filter());

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false);
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => {
            let _ = registry.with(layer.with_target(level.is_verbose())).try_init();
        }
        LogFormat::Json => {
            let _ = registry.with(layer.json()).try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_levels_cap_foreign_crates() {
        assert_eq!(
            LogLevel::Error.as_filter().min(LevelFilter::WARN),
            LevelFilter::ERROR
        );
        assert_eq!(
            LogLevel::Trace.as_filter().min(LevelFilter::WARN),
            LevelFilter::WARN
        );
    }
}
