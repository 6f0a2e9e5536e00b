//! Global logging system.

use std::{
    fs::File,
    sync::Arc,
    env,
    panic,
};
use backtrace::Backtrace;
use tracing_subscriber::{
    fmt::{
        self,
        time::uptime,
    },
    prelude::*,
    Registry,
    EnvFilter,
};


/// File the server mirrors its log output into, in the working directory.
pub const LOG_FILE_NAME: &'static str = "server.log";

/// Default logging environment filter. Our crates are debug, everything else is warn.
const DEFAULT_FILTER: &'static str = "warn,blockserv=debug,chunk_space=debug";

/// Initializes a `tracing` logging backend which outputs to stdout and, if the file can be
/// created, mirrors into `server.log`. Accepts ecosystem-standard `RUST_LOG` env filters, appended
/// to the default filter. Also routes panics through the logging system.
pub fn init_logging() {
    let format = fmt::format()
        .compact()
        .with_timer(uptime())
        .with_line_number(true);
    let stdout_log = fmt::layer()
        .event_format(format);

    // a missing log file degrades to stdout-only rather than refusing to start
    let log_file_log = match File::create(LOG_FILE_NAME) {
        Ok(log_file) => Some(tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Arc::new(log_file))),
        Err(e) => {
            eprintln!("unable to create {} ({}), logging to stdout only", LOG_FILE_NAME, e);
            None
        }
    };

    let mut filter = DEFAULT_FILTER.to_owned();
    if let Ok(env_filter) = env::var(EnvFilter::DEFAULT_ENV) {
        filter.push(',');
        filter.push_str(&env_filter);
    }

    let subscriber = Registry::default()
        .with(EnvFilter::new(filter))
        .with(stdout_log)
        .with(log_file_log);
    tracing::subscriber::set_global_default(subscriber)
        .expect("unable to install log subscriber");
    info!("logging initialized");

    // make panic messages and backtrace go through logging system
    panic::set_hook(Box::new(|info| {
        error!("{}", info);
        if env::var("RUST_BACKTRACE").map(|val| val != "0").unwrap_or(true) {
            error!("{:?}", Backtrace::new());
        }
    }));
    trace!("installed custom panic hook");
}
