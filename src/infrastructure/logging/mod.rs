use std::io::Write as _;

use log::{Level, LevelFilter};
use pretty_env_logger::env_logger;

const NOISY_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "teloxide::dispatching"];

/// Installs the coloured, timestamped logger. `RUST_LOG` overrides the defaults.
pub fn init() {
    let mut builder = pretty_env_logger::formatted_timed_builder();
    builder.filter_level(LevelFilter::Info);
    for target in NOISY_TARGETS {
        builder.filter_module(target, LevelFilter::Warn);
    }
    builder.parse_default_env();

    builder.format(|buf, record| {
        let mut level_style = buf.style();
        level_style.set_color(match record.level() {
            Level::Error => env_logger::fmt::Color::Red,
            Level::Warn => env_logger::fmt::Color::Yellow,
            Level::Info => env_logger::fmt::Color::Green,
            Level::Debug => env_logger::fmt::Color::Blue,
            Level::Trace => env_logger::fmt::Color::Magenta,
        });
        level_style.set_bold(true);

        writeln!(
            buf,
            "{} {} {} > {}",
            buf.timestamp(),
            level_style.value(format!("{:<5}", record.level())),
            short_target(record.target()),
            record.args()
        )
    });

    builder.init();
}

/// Drops the crate prefix so lines read `ledger::engine` instead of the full path.
fn short_target(target: &str) -> &str {
    target
        .strip_prefix("zebranium_bot::")
        .map(|rest| {
            rest.strip_prefix("application::")
                .or_else(|| rest.strip_prefix("infrastructure::"))
                .or_else(|| rest.strip_prefix("interfaces::"))
                .unwrap_or(rest)
        })
        .unwrap_or(target)
}

#[cfg(test)]
mod tests {
    use super::short_target;

    #[test]
    fn short_target_strips_layer_prefixes() {
        assert_eq!(short_target("zebranium_bot::application::ledger::engine"), "ledger::engine");
        assert_eq!(short_target("zebranium_bot::main"), "main");
        assert_eq!(short_target("teloxide::dispatching"), "teloxide::dispatching");
    }
}
