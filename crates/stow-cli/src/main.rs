use clap::Parser;

mod cli;
mod commands;

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `fetch` can stream object bytes on stdout.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let cli = cli::Cli::parse();
    commands::run_command(cli)
}
