use log::LevelFilter;

pub struct Logger;

impl Logger {
    /// Installs the coloured terminal logger. `RUST_LOG` still refines
    /// per-module levels on top of `level`.
    pub fn init(level: LevelFilter) {
        let mut builder = colog::default_builder();
        builder
            .filter_level(level)
            .filter_module("chromiumoxide", LevelFilter::Warn)
            .filter_module("tungstenite", LevelFilter::Warn)
            .parse_default_env();

        if let Err(e) = builder.try_init() {
            eprintln!("logger already initialized: {e}");
        }
    }
}
