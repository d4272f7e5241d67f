use env_logger::Builder;
use log::{Level, LevelFilter};
use std::io::Write;
use std::path::Path;
use std::time::{Instant, SystemTime};

pub fn setup_logging() {
    let colored = atty::is(atty::Stream::Stderr);

    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_env("RUST_LOG")
        .format(move |buf, record| {
            let level = record.level();
            let timestamp = humantime::format_rfc3339_millis(SystemTime::now());

            if colored {
                write!(buf, "{}{:>5}\x1B[0m", level_color(level), level)?;
            } else {
                write!(buf, "{:>5}", level)?;
            }
            write!(buf, " [{}] {}", timestamp, record.args())?;

            // Source location only helps when chasing debug output
            if level >= Level::Debug {
                write!(
                    buf,
                    " - {}:{}",
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0)
                )?;
            }
            writeln!(buf)
        })
        .init();
}

fn level_color(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1B[31m",
        Level::Warn => "\x1B[33m",
        Level::Info => "\x1B[32m",
        Level::Debug => "\x1B[36m",
        Level::Trace => "\x1B[35m",
    }
}

#[macro_export]
macro_rules! log_request {
    ($method:expr, $target:expr) => {
        log::info!("→ {} {}", $method, $target)
    };
}

#[macro_export]
macro_rules! log_response {
    ($status:expr, $target:expr, $duration:expr, $encoding:expr) => {
        log::info!(
            "← {} {} ({}) encoding={}",
            $status,
            $target,
            humantime::format_duration($duration),
            $encoding
        )
    };
}

#[macro_export]
macro_rules! log_error {
    ($error:expr, $context:expr) => {
        log::error!("❌ {} - {}", $context, $error)
    };
}

pub trait Loggable {
    fn log_description(&self) -> String;
}

impl<T: std::fmt::Display> Loggable for T {
    fn log_description(&self) -> String {
        self.to_string()
    }
}

impl Loggable for Path {
    fn log_description(&self) -> String {
        self.display().to_string()
    }
}

pub trait LoggingExt: Loggable {
    /// Runs `f`, logging start and elapsed time at debug level and failures at error level.
    fn log_operation<F, T, E>(&self, operation: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::fmt::Display;
}

impl<S: ?Sized + Loggable> LoggingExt for S {
    fn log_operation<F, T, E>(&self, operation: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::fmt::Display,
    {
        let subject = self.log_description();
        let start_time = Instant::now();
        log::debug!("Starting {} on {}", operation, subject);

        let result = f();
        let elapsed = humantime::format_duration(start_time.elapsed());
        match &result {
            Ok(_) => log::debug!("Completed {} on {} in {}", operation, subject, elapsed),
            Err(e) => log::error!("Failed {} on {} after {}: {}", operation, subject, elapsed, e),
        }
        result
    }
}
