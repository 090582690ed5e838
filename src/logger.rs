use ansi_term::Colour;
use chrono_tz::Tz;
use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

/// Names the timezone log timestamps are rendered in, e.g. `Europe/Moscow`.
pub const TIMEZONE_ENV: &str = "SERVE_DIR_LOG_TZ";

/// Installs the global logger at `level`; `RUST_LOG` directives take precedence.
pub fn init(level: LevelFilter) {
    let tz = timezone(std::env::var(TIMEZONE_ENV).ok().as_deref());

    let mut builder = Builder::new();
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    builder
        .format(move |buf, record| {
            let timestamp = chrono::Utc::now()
                .with_timezone(&tz)
                .format("%Y-%m-%dT%H:%M:%S%:z");

            let level = match record.level() {
                log::Level::Error => Colour::Red.paint(record.level().to_string()),
                log::Level::Warn => Colour::Yellow.paint(record.level().to_string()),
                log::Level::Info => Colour::Green.paint(record.level().to_string()),
                log::Level::Debug => Colour::Blue.paint(record.level().to_string()),
                log::Level::Trace => Colour::Purple.paint(record.level().to_string()),
            };

            writeln!(
                buf,
                "[{} {} {}] {}",
                timestamp,
                level,
                record.module_path().unwrap_or_default(),
                record.args()
            )
        })
        .init();
}

fn timezone(name: Option<&str>) -> Tz {
    name.and_then(|name| name.parse::<Tz>().ok())
        .unwrap_or(Tz::UTC)
}
