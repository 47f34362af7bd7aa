use clap::Parser as _;
use daikin_altherma_tools::commands;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(clap::Parser)]
#[clap(version, about, author)]
enum Commands {
    Operations(commands::operations::Args),
    Inspect(commands::inspect::Args),
    Homie(commands::homie::Args),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn main() {
    let filter_description =
        std::env::var("DAIKIN_ALTHERMA_TOOLS_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = match filter_description
        .parse::<tracing_subscriber::filter::targets::Targets>()
    {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("error: could not parse DAIKIN_ALTHERMA_TOOLS_LOG: {e}");
            std::process::exit(1);
        }
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    match Commands::parse() {
        Commands::Operations(args) => end(commands::operations::run(args)),
        Commands::Inspect(args) => end(commands::inspect::run(args)),
        Commands::Homie(args) => end(commands::homie::run(args)),
    }
}
