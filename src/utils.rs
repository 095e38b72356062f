use pretty_env_logger::formatted_builder;

/// Installs the global logger, filtered by `RUST_LOG` (defaults to `info`)
pub fn init_logger() -> Result<(), log::SetLoggerError> {
    let mut builder = formatted_builder();

    if let Ok(s) = ::std::env::var("RUST_LOG") {
        builder.parse_filters(&s);
    } else {
        builder.parse_filters("info");
    }

    builder.try_init()
}
