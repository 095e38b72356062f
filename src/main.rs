use tonboc::cli::Cli;
use tonboc::utils::init_logger;

fn main() -> anyhow::Result<()> {
    init_logger()?;
    let cli = Cli::parse_args();
    cli.execute()?;
    Ok(())
}
