use clap::Parser;
use color_eyre::Result;

mod cli;
mod dispatch;
mod output;

use cli::FolioCli;
use output::OutputOptions;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = FolioCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let info = dispatch::command_info(&cli);
    let outcome = dispatch::execute(&cli);
    let code = output::emit_output(OutputOptions { json: cli.json }, info, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = format!(
        "folio={level},folio_cli={level},folio_core={level},folio_mets={level},folio_store={level}"
    );
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
