use colored::Colorize;
use env_logger::Builder;
use log::Level;
use std::io::Write;

/// Timestamped stderr logging: this crate at info (debug when `verbose`), dependencies at warn.
pub fn setup_logging(verbose: bool) {
    use log::LevelFilter;

    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    // try_init: a second call (tests, embedding) keeps the first logger.
    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn) // Default: only warnings from dependencies
        .filter_module(env!("CARGO_PKG_NAME"), level) // Our crate: use requested level
        .format(|buf, record| {
            let name = env!("CARGO_PKG_NAME");
            let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = match record.level() {
                        Level::Warn => "WARN".yellow(),
                        Level::Error => "ERROR".red(),
                        _ => unreachable!(),
                    };
                    let path = record.target().to_string().white();
                    format!(
                        "{} [{} {} {}] {}",
                        stamp,
                        name.cyan(),
                        level_str,
                        path,
                        record.args()
                    )
                }
                _ => format!("{} [{}] {}", stamp, name.cyan(), record.args()),
            };
            writeln!(buf, "{}", line)
        })
        .try_init();
}
