#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Command-line interface for creating Pantheon multidev environments via the
//! libmultidev crate.

use std::{
    io::{self, IsTerminal, Write},
    process,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use libmultidev::{
    Config, Git, MultidevError, Output, ProvisionReport, ProvisionRequest, Provisioner, Quiet,
    Terminal, Terminus,
};

/// Command-line argument definitions.
mod args;
/// Rendering helpers.
mod ui;
/// Path and config-location helpers.
mod utils;

use args::Cli;
use ui::{emit, render_report};
use utils::{config_location, expand_tilde};

/// CLI entrypoint.
fn main() -> Result<()> {
    let cli = Cli::parse();

    let color = if cli.color {
        true
    } else if cli.no_color {
        false
    } else {
        io::stdout().is_terminal()
    };

    let output: Arc<dyn Output> = if cli.quiet {
        Arc::new(Quiet)
    } else {
        Arc::new(Terminal::new(color))
    };

    match run(cli, output.as_ref()) {
        Ok(report) => {
            // Printed regardless of --quiet so scripts can capture it.
            println!("{}", report.preview_url);
            Ok(())
        }
        Err(e) => {
            if color && io::stdout().is_terminal() {
                print!("\x1b[0m");
                if let Err(flush_err) = io::stdout().flush() {
                    eprintln!("Failed to flush stdout while resetting colors: {flush_err}");
                }
            }

            if let Err(display_err) = output.fail(&format!("{e:#}")) {
                eprintln!("Failed to report error via output handler: {display_err:#}");
            }
            if let Err(finish_err) = output.finish() {
                eprintln!("Failed to flush output handler: {finish_err:#}");
            }

            let exit_code = e
                .downcast_ref::<MultidevError>()
                .map_or(1, MultidevError::exit_code);
            process::exit(exit_code);
        }
    }
}

/// Load configuration and run one provisioning pass.
fn run(cli: Cli, output: &dyn Output) -> Result<ProvisionReport> {
    let (config_path, required) = config_location(cli.config.as_deref());
    let config = Config::load(&config_path, required)?;

    let mut options = config.provision_options();
    if let Some(dir) = &cli.scratch_dir {
        options.scratch_root = expand_tilde(dir);
    }
    if cli.keep_branch {
        options.delete_branch = false;
    }

    let request = ProvisionRequest {
        source: cli.source,
        branch: cli.branch,
        remote_url: cli.remote.or_else(|| config.remote.clone()),
    };

    let mut terminus = Terminus::new(config.terminus.clone())?;
    let git = Git::new(expand_tilde(&config.git));
    let report = Provisioner::new(&mut terminus, git, output, options)
        .provision(&request)
        .with_context(|| format!("Failed to provision branch '{}'", request.branch))?;

    render_report(output, &report)?;
    emit(output.finish())?;
    Ok(report)
}
