//! `render-node-compute`: run one compute shader on a render node and dump
//! its output buffers.

use std::fs;
use std::process::ExitCode;

use anyhow::Context;
use render_node_compute::logging::{init_logging, LoggingConfig};
use render_node_compute::options::{parse_args, usage, Command, Options};
use render_node_compute::hexdump_dwords;

fn main() -> ExitCode {
    init_logging(LoggingConfig::default());

    let mut args = std::env::args();
    let program = args
        .next()
        .unwrap_or_else(|| env!("CARGO_BIN_NAME").to_string());

    let options = match parse_args(args) {
        Ok(Command::Run(options)) => options,
        Ok(Command::Help) => {
            print!("{}", usage(&program));
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("{program}: {err}");
            eprint!("{}", usage(&program));
            return ExitCode::FAILURE;
        }
    };

    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(options: &Options) -> anyhow::Result<()> {
    let source = fs::read_to_string(&options.shader)
        .with_context(|| format!("failed to read shader {}", options.shader.display()))?;
    println!("shader:\n{source}");

    let report = render_node_compute::run(options, &source).with_context(|| {
        format!(
            "running {} on {}",
            options.shader.display(),
            options.device.display()
        )
    })?;

    for dump in &report.dumps {
        println!("{}", dump.header());
        print!("{}", hexdump_dwords(&dump.words));
    }
    Ok(())
}
