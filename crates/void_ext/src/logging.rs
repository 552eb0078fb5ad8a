//! Routing diagnostics to the engine
//!
//! Errors and warnings go to the engine's print sinks so they show up where
//! the user looks; everything quieter goes to an env_logger logger.

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{Level, LevelFilter, Log, Metadata, Record};
use void_ext_sys::{try_interface, FALSE, TRUE};

use crate::config::ExtensionConfig;

static EDITOR_NOTIFY: AtomicBool = AtomicBool::new(false);

/// `log` backend that forwards to the engine's error and warning sinks
pub struct EngineLogger {
    fallback: env_logger::Logger,
}

impl EngineLogger {
    /// Build a logger from the configured filter
    pub fn new(config: &ExtensionConfig) -> Self {
        let fallback = env_logger::Builder::new()
            .parse_filters(&config.log_filter)
            .format_timestamp(None)
            .build();
        Self { fallback }
    }

    /// Most verbose level this logger can emit
    pub fn max_level(&self) -> LevelFilter {
        self.fallback.filter().max(LevelFilter::Warn)
    }
}

impl Log for EngineLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Warn || self.fallback.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = record.level();
        if level <= Level::Warn && try_interface().is_some() {
            let message = record.args().to_string();
            let file = record.file().unwrap_or("<unknown>");
            let line = record.line().unwrap_or(0);
            let target = record.target();
            if level == Level::Error {
                report_error(&message, target, file, line);
            } else {
                report_warning(&message, target, file, line);
            }
            return;
        }

        self.fallback.log(record);
    }

    fn flush(&self) {
        self.fallback.flush();
    }
}

/// Install the engine logger as the `log` backend
///
/// Returns false when another logger was installed first; that logger
/// stays in place.
pub fn install(config: &ExtensionConfig) -> bool {
    EDITOR_NOTIFY.store(config.editor_notify, Ordering::Relaxed);

    let logger = EngineLogger::new(config);
    let max_level = logger.max_level();
    match log::set_boxed_logger(Box::new(logger)) {
        Ok(()) => {
            log::set_max_level(max_level);
            true
        }
        Err(_) => {
            log::debug!("A logger is already installed, keeping it");
            false
        }
    }
}

fn c_text(text: &str) -> CString {
    match CString::new(text) {
        Ok(text) => text,
        Err(_) => CString::new(text.replace('\0', "\u{fffd}")).unwrap_or_default(),
    }
}

fn editor_notify() -> u8 {
    if EDITOR_NOTIFY.load(Ordering::Relaxed) {
        TRUE
    } else {
        FALSE
    }
}

/// Send one error to the engine's error sink
///
/// Falls back to stderr when the interface is not bound yet.
pub fn report_error(message: &str, function: &str, file: &str, line: u32) {
    let Some(iface) = try_interface() else {
        eprintln!("ERROR: {message} ({function} at {file}:{line})");
        return;
    };
    let (description, message_c) = (c_text(message), c_text(message));
    let (function, file) = (c_text(function), c_text(file));
    unsafe {
        (iface.print_error_with_message)(
            description.as_ptr(),
            message_c.as_ptr(),
            function.as_ptr(),
            file.as_ptr(),
            line as i32,
            editor_notify(),
        );
    }
}

/// Send one warning to the engine's warning sink
pub fn report_warning(message: &str, function: &str, file: &str, line: u32) {
    let Some(iface) = try_interface() else {
        eprintln!("WARNING: {message} ({function} at {file}:{line})");
        return;
    };
    let (description, message_c) = (c_text(message), c_text(message));
    let (function, file) = (c_text(function), c_text(file));
    unsafe {
        (iface.print_warning_with_message)(
            description.as_ptr(),
            message_c.as_ptr(),
            function.as_ptr(),
            file.as_ptr(),
            line as i32,
            editor_notify(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interior_nul_is_replaced() {
        let text = c_text("a\0b");
        assert_eq!(text.to_str().unwrap(), "a\u{fffd}b");
    }

    #[test]
    fn test_warnings_always_enabled() {
        let config = ExtensionConfig { log_filter: "off".to_string(), ..Default::default() };
        let logger = EngineLogger::new(&config);
        let warn = Metadata::builder().level(Level::Warn).target("x").build();
        let debug = Metadata::builder().level(Level::Debug).target("x").build();
        assert!(logger.enabled(&warn));
        assert!(!logger.enabled(&debug));
        assert_eq!(logger.max_level(), LevelFilter::Warn);
    }
}
