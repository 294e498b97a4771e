use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cli = ot_ledger_cli::Cli::parse();
    ot_ledger_cli::run_cli(cli)
}
