mod archive;
mod cli;
mod commands;
mod common;
mod install;
mod manifest;
mod registry;
mod ui;

#[cfg(test)]
mod test_support;

use clap::Parser;

use crate::cli::Cli;
use crate::ui::prelude::*;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    ui::set_debug_mode(cli.debug);
    ui::init(cli.output, !cli.no_color);
    if cli.no_color {
        colored::control::set_override(false);
    }

    match commands::dispatch(cli.command).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            emit(
                Level::Error,
                "command.failed",
                &format!("{} {:#}", char::from(NerdFont::Cross), e),
                None,
            );
            std::process::exit(1);
        }
    }
}
