use std::io;
use tracing::Level;
use tracing_appender::rolling;
use tracing_subscriber::filter::FilterFn;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::environment::get_env_var_or;

const DEFAULT_STDOUT_FILTER: &str = "info,web_request=warn,db_query=warn,sqlx=off";
const DEFAULT_FILE_FILTER: &str = "debug,web_request=debug,db_query=info,sqlx=info";

pub fn configure_logging() {
    // Keep per-retry noise from the HTTP stack out of the console
    let custom_filter = FilterFn::new(|metadata| {
        !(metadata.level() == &Level::DEBUG && metadata.target().starts_with("hyper"))
    });

    // RUST_LOG overrides the console filter only
    let stdout_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_STDOUT_FILTER));

    let stdout_log = fmt::layer()
        .with_writer(io::stderr)
        .with_filter(stdout_filter)
        .with_filter(custom_filter);

    let log_dir = get_env_var_or("THEMIS_LOG_DIR", "logs");
    let file_appender = rolling::daily(log_dir, "themis.log");
    let file_log = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_filter(EnvFilter::new(DEFAULT_FILE_FILTER));

    tracing_subscriber::Registry::default()
        .with(stdout_log)
        .with(file_log)
        .init();
}
