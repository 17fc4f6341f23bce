//! Tracing setup shared by the registry proxy binaries.
//!
//! Output is controlled entirely through environment variables:
//!
//! - `LOG_LEVEL`: default filter when `RUST_LOG` is unset (`info`)
//! - `LOG_OUTPUT`: `console`, `file` or `both` (`console`)
//! - `LOG_FORMAT`: `human` or `json` (`human`)
//! - `LOG_FILE_PATH`: daily-rolled log file (`/tmp/registry-proxy.log`)

use std::{
    env,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::MakeWriter, prelude::*, registry, EnvFilter};

const DEFAULT_LOG_FILE: &str = "/tmp/registry-proxy.log";

/// Where formatted events are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
    Silent,
}

impl LogOutput {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "console" | "" => LogOutput::Console,
            "file" => LogOutput::File,
            "both" => LogOutput::Both,
            _ => LogOutput::Silent,
        }
    }
}

/// Resolved logging settings.
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: String,
    pub output: LogOutput,
    pub json: bool,
    pub file_path: PathBuf,
}

impl LogSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            output: LogOutput::parse(&lookup("LOG_OUTPUT").unwrap_or_default()),
            json: lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            file_path: lookup("LOG_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        for directive in ["tokio=warn", "hyper=warn", "hyper_util=warn", "reqwest=warn"] {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    }

    fn file_location(&self) -> (&Path, &Path) {
        let dir = self
            .file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("/tmp"));
        let name = self
            .file_path
            .file_name()
            .map(Path::new)
            .unwrap_or_else(|| Path::new("registry-proxy.log"));
        (dir, name)
    }
}

// Writes every buffer to both sinks; succeeds if either one does.
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let first = self.a.write_all(buf);
        let second = self.b.write_all(buf);
        first.or(second).map(|_| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    a: A,
    b: B,
}

impl<'a, A, B> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a>,
    B: MakeWriter<'a>,
{
    type Writer = Tee<A::Writer, B::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.a.make_writer(),
            b: self.b.make_writer(),
        }
    }
}

/// Install the global subscriber from the environment.
///
/// The returned guard must be held for the life of the process when file
/// output is enabled, otherwise buffered lines are lost on exit.
pub fn init_subscriber() -> Option<WorkerGuard> {
    init_with(&LogSettings::from_env())
}

/// Install the global subscriber from explicit settings.
pub fn init_with(settings: &LogSettings) -> Option<WorkerGuard> {
    let base = registry().with(settings.env_filter());

    macro_rules! install {
        ($writer:expr) => {{
            let layer = tracing_subscriber::fmt::layer().with_writer($writer);
            if settings.json {
                let _ = base.with(layer.json()).try_init();
            } else {
                let _ = base.with(layer).try_init();
            }
        }};
    }

    match settings.output {
        LogOutput::Console => {
            install!(io::stdout);
            None
        }
        LogOutput::File => {
            let (dir, name) = settings.file_location();
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
            install!(writer);
            Some(guard)
        }
        LogOutput::Both => {
            let (dir, name) = settings.file_location();
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
            install!(MakeTee {
                a: io::stdout,
                b: writer,
            });
            Some(guard)
        }
        LogOutput::Silent => {
            let _ = base.try_init();
            None
        }
    }
}
