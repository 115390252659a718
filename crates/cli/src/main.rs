mod args;
mod logging;
mod run;

use anyhow::{Context, Result};
use args::{parse_args, Command, USAGE};
use gentable_client::{JamaiClient, JamaiConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = logging::init()?;

    let cmd = match parse_args(std::env::args()) {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("error: {:#}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };
    match cmd {
        Command::Version => {
            println!("gentable {}", VERSION);
            return Ok(());
        }
        Command::Help => {
            println!("{}", USAGE);
            return Ok(());
        }
        _ => {}
    }

    let cfg = JamaiConfig::from_env_and_file().context("load config")?;
    let client = JamaiClient::new(cfg).context("build http client")?;
    let mut out = std::io::stdout().lock();
    run::run(&client, cmd, &mut out).await
}
