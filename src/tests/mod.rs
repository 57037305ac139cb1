use std::sync::{Mutex, Once};

mod lock;

/// Records every log line so tests can check what reached the sink.
struct CaptureLogger {
    lines: Mutex<Vec<String>>,
}

impl log::Log for CaptureLogger {
    fn enabled(&self, _: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        self.lines.lock().unwrap().push(record.args().to_string());
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger { lines: Mutex::new(Vec::new()) };
static INSTALL: Once = Once::new();

/// Installs the capturing logger. Safe to call from every test.
pub(crate) fn capture_logs() {
    INSTALL.call_once(|| {
        log::set_logger(&LOGGER).unwrap();
        log::set_max_level(log::LevelFilter::Trace);
    });
}

/// Every line logged since the logger was installed, by any test.
pub(crate) fn logged_lines() -> Vec<String> {
    LOGGER.lines.lock().unwrap().clone()
}

/// 0 + 1 + ... + (n - 1), the total the counting tests expect.
pub(crate) fn make_total(n: u64) -> u64 {
    (0..n).sum()
}
