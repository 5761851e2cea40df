use log::{LevelFilter, Metadata, Record};
use rtt_target::rprintln;

struct RttLogger;

impl log::Log for RttLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            rprintln!("{} {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: RttLogger = RttLogger;

/// Routes `log` records to the RTT print channel, which must already be up.
pub fn init(level: LevelFilter) {
    // only fails if a logger is already installed
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
