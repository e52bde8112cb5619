mod install;

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

use rig_pm::RigError;

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .format_target(debug)
        .init();
}

fn run() -> Result<i32> {
    let args = install::InstallArgs::parse();
    init_logging(args.debug);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(install::execute(args))
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("{} {}", console::style("Error:").red().bold(), e);
            for cause in e.chain().skip(1) {
                eprintln!("  Caused by: {}", cause);
            }

            let code = e
                .downcast_ref::<RigError>()
                .and_then(RigError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}
