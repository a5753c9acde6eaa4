// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fmt, path::Path};

use chrono::Utc;
use serde::Deserialize;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter,
    fmt::{time::FormatTime, writer::BoxMakeWriter},
};

use crate::core::errors::{Error, Result};

#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum Output {
    #[default]
    Stdout,
    Stderr,
    File,
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationFreq {
    Minutely,
    Hourly,
    Daily,
    #[default]
    Never,
}

/// Where and how the runtime logs.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggerOptions {
    /// Default filter directive; `RUST_LOG` overrides it.
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub output: Output,
    /// Log file path, required when `output` is `file`.
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub rotation: RotationFreq,
}

struct ChronoTimer;

impl FormatTime for ChronoTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        write!(w, "{}", Utc::now().to_rfc3339())
    }
}

/// Installs the global tracing subscriber.
///
/// Returns a guard that must stay alive for file output to be flushed; hold
/// it for the lifetime of the process.
pub fn init_logger(opts: &LoggerOptions) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(opts.level.as_deref().unwrap_or("info")))
        .map_err(|e| Error::Config(format!("bad log filter: {e}")))?;

    let (writer, guard): (BoxMakeWriter, Option<WorkerGuard>) = match opts.output {
        Output::Stdout => (BoxMakeWriter::new(std::io::stdout), None),
        Output::Stderr => (BoxMakeWriter::new(std::io::stderr), None),
        Output::File => {
            let file = opts
                .file
                .as_deref()
                .ok_or_else(|| Error::Config("file output requires a log file path".into()))?;
            let path = Path::new(file);
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| Error::Config(format!("bad log file path {file}")))?;
            let rotation = match opts.rotation {
                RotationFreq::Minutely => Rotation::MINUTELY,
                RotationFreq::Hourly => Rotation::HOURLY,
                RotationFreq::Daily => Rotation::DAILY,
                RotationFreq::Never => Rotation::NEVER,
            };
            let appender = RollingFileAppender::new(rotation, dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoTimer)
        .with_writer(writer)
        .try_init()
        .map_err(|e| Error::Config(format!("logger already initialized: {e}")))?;
    Ok(guard)
}
