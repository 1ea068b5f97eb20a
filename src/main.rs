use clap::Parser;

use flower_classifier_lib::{cli::Cli, init_logging};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    cli.run()
}
