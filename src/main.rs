use clap::Parser;
use vault_owner_transfer::cli;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let code = cli.run()?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
