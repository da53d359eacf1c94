use env_logger::{Builder, Env};
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Process-wide logger setup.
///
/// The interesting work in this engine happens on named dedicated threads
/// (`garbage-collector`, `log-serializer`, `disk-log-writer`) interleaved
/// with anonymous workers, so the format leads with the thread name to keep
/// concurrent output attributable. The default filter keeps this crate at
/// debug and everything else at info; set `PYRITE_LOG` to override at
/// runtime (e.g. `PYRITE_LOG=pyrite::storage=trace`).
pub fn initialize_logger() {
    INIT.call_once(|| {
        Builder::from_env(Env::new().filter_or("PYRITE_LOG", "info,pyrite=debug"))
            .format(|buf, record| {
                let thread = std::thread::current();
                writeln!(
                    buf,
                    "{} {:<5} [{}] {}: {}",
                    buf.timestamp_millis(),
                    record.level(),
                    thread.name().unwrap_or("worker"),
                    record.target(),
                    record.args()
                )
            })
            .init();
    });
}
