use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    EnvFilter, Layer, filter::FilterFn, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Emit an event inside a short-lived span named after the traffic direction.
#[macro_export]
macro_rules! tagged {
    ($level:expr, $tag:literal, $($msg:tt)+) => {{
        let span = $crate::tracing::span!($level, $tag);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg)+)
    }};
}

/// Client to server traffic, e.g. a command received by the inbound server.
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:tt)+) => {
        $crate::tagged!($crate::tracing::Level::$level, "incoming", $($msg)+)
    };

    ($($msg:tt)+) => {
        $crate::incoming!(level = TRACE, $($msg)+)
    };
}

/// Server to client traffic, e.g. a reply line written by the inbound server.
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:tt)+) => {
        $crate::tagged!($crate::tracing::Level::$level, "outgoing", $($msg)+)
    };

    ($($msg:tt)+) => {
        $crate::outgoing!(level = TRACE, $($msg)+)
    };
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:tt)+) => {
        $crate::tagged!($crate::tracing::Level::$level, "internal", $($msg)+)
    };

    ($($msg:tt)+) => {
        $crate::internal!(level = TRACE, $($msg)+)
    };
}

fn default_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    }
}

/// Builds the event filter from `LOG_LEVEL`, which accepts any `EnvFilter`
/// directive (`debug`, `courier_delivery=trace`, ...).
fn filter() -> EnvFilter {
    let default = default_level();

    std::env::var("LOG_LEVEL").map_or_else(
        |_| EnvFilter::default().add_directive(default.into()),
        |level| {
            EnvFilter::try_new(&level).unwrap_or_else(|_| {
                eprintln!("Invalid log level specified {level}, defaulting to {default}");
                EnvFilter::default().add_directive(default.into())
            })
        },
    )
}

/// Installs the global subscriber. Calling this more than once is harmless;
/// only the first call takes effect.
pub fn init() {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(filter())
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("courier")
                })),
        )
        .try_init();

    if installed.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}
