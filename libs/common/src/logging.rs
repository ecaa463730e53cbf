//! Logging setup for the Dantherm service
//!
//! Console output plus an optional daily rolling file. The filter is wrapped
//! in a reload layer so the level can be changed while the service runs.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Bracketed level tag: `[INFO]`, `[WARN]`, ...
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter producing `timestamp [LEVEL] message`
///
/// Example output: `2026-03-02T00:50:44.809113Z [INFO] Connected to 192.168.1.20:502`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Keeps the non-blocking file writer alive for the process lifetime
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

type EnvFilterReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;
static LOG_FILTER_HANDLE: OnceLock<EnvFilterReloadHandle> = OnceLock::new();
static CURRENT_LOG_LEVEL: OnceLock<Mutex<String>> = OnceLock::new();

/// Default max file size before rotating within a day: 50MB
const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

struct RollingState {
    date: String,
    file: File,
    size: u64,
    rotation: u32,
}

/// Daily rolling file writer: `{YYYYMMDD}_{service}.log`, `{YYYYMMDD}_{service}.N.log`
/// once a file exceeds the size limit
#[derive(Clone)]
struct DailyRollingWriter {
    service_name: String,
    log_dir: PathBuf,
    max_file_size: u64,
    state: Arc<Mutex<RollingState>>,
}

impl DailyRollingWriter {
    fn new(service_name: String, log_dir: PathBuf, max_file_size: u64) -> std::io::Result<Self> {
        fs::create_dir_all(&log_dir)?;
        let date = chrono::Local::now().format("%Y%m%d").to_string();
        let file = Self::open(&log_dir, &date, &service_name, 0)?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            service_name,
            log_dir,
            max_file_size,
            state: Arc::new(Mutex::new(RollingState {
                date,
                file,
                size,
                rotation: 0,
            })),
        })
    }

    fn file_name(date: &str, service_name: &str, rotation: u32) -> String {
        if rotation == 0 {
            format!("{}_{}.log", date, service_name)
        } else {
            format!("{}_{}.{}.log", date, service_name, rotation)
        }
    }

    fn open(
        log_dir: &std::path::Path,
        date: &str,
        service_name: &str,
        rotation: u32,
    ) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(Self::file_name(date, service_name, rotation)))
    }

    fn roll_if_needed(&self, state: &mut RollingState, incoming: usize) -> std::io::Result<()> {
        let today = chrono::Local::now().format("%Y%m%d").to_string();
        if state.date != today {
            fs::create_dir_all(&self.log_dir)?;
            state.file = Self::open(&self.log_dir, &today, &self.service_name, 0)?;
            state.size = state.file.metadata().map(|m| m.len()).unwrap_or(0);
            state.date = today;
            state.rotation = 0;
        } else if state.size + incoming as u64 > self.max_file_size {
            state.rotation += 1;
            state.file =
                Self::open(&self.log_dir, &state.date, &self.service_name, state.rotation)?;
            state.size = 0;
        }
        Ok(())
    }
}

impl Write for DailyRollingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let state_arc = Arc::clone(&self.state);
        let mut state = state_arc.lock();
        self.roll_if_needed(&mut state, buf.len())?;
        let written = state.file.write(buf)?;
        state.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.state.lock().file.flush()
    }
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, used as the default filter target and in file names
    pub service_name: String,
    /// Directory for log files; `None` logs to the console only
    pub log_dir: Option<PathBuf>,
    /// Filter used when RUST_LOG is not set
    pub level: String,
    /// JSON lines in the log file instead of the bracketed format
    pub enable_json: bool,
    /// Size limit per file before a same-day rotation
    pub max_file_size: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "dantherm".to_string(),
            log_dir: None,
            level: "info".to_string(),
            enable_json: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl LogConfig {
    /// Effective filter string: RUST_LOG wins, then the configured level
    /// with the service target raised to debug when the level is `info`
    pub fn filter_string(&self) -> String {
        if let Ok(env_str) = std::env::var("RUST_LOG") {
            if !env_str.trim().is_empty() {
                return env_str;
            }
        }
        let target = self.service_name.replace('-', "_");
        if self.level.contains(',') || self.level.contains('=') {
            self.level.clone()
        } else if self.level.eq_ignore_ascii_case("info") {
            format!("info,{}=debug", target)
        } else {
            self.level.clone()
        }
    }
}

/// Initialize logging with configuration
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter_str = config.filter_string();
    let env_filter = EnvFilter::try_new(&filter_str)?;

    let (reload_filter, reload_handle) = reload::Layer::new(env_filter);
    let _ = LOG_FILTER_HANDLE.set(reload_handle);
    let _ = CURRENT_LOG_LEVEL.set(Mutex::new(filter_str));

    let console_layer = fmt::layer()
        .with_ansi(true)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = match &config.log_dir {
        Some(dir) => {
            let writer = DailyRollingWriter::new(
                config.service_name.clone(),
                dir.clone(),
                config.max_file_size,
            )?;
            let (non_blocking, guard) = tracing_appender::non_blocking(writer);
            GUARDS.get_or_init(|| Mutex::new(Vec::new())).lock().push(guard);

            let layer = if config.enable_json {
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_level(true)
                    .with_target(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat)
                    .boxed()
            };
            Some(layer)
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(reload_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    match &config.log_dir {
        Some(dir) => tracing::info!("Logging: {} @ {:?}", config.service_name, dir),
        None => tracing::info!("Logging: {} (console)", config.service_name),
    }

    Ok(())
}

/// Change the log filter at runtime
///
/// Accepts a plain level ("debug") or a full filter ("info,dantherm=trace").
pub fn set_log_level(level: &str) -> Result<(), String> {
    let handle = LOG_FILTER_HANDLE
        .get()
        .ok_or("Logging not initialized with reload support")?;

    let new_filter =
        EnvFilter::try_new(level).map_err(|e| format!("Invalid log level '{}': {}", level, e))?;

    handle
        .reload(new_filter)
        .map_err(|e| format!("Failed to reload log filter: {}", e))?;

    if let Some(current) = CURRENT_LOG_LEVEL.get() {
        *current.lock() = level.to_string();
    }

    tracing::info!("Log level changed to: {}", level);
    Ok(())
}

/// Current log filter string
pub fn get_log_level() -> String {
    CURRENT_LOG_LEVEL
        .get()
        .map(|current| current.lock().clone())
        .unwrap_or_else(|| "unknown".to_string())
}
