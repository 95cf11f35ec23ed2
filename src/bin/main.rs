use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use proxy_log::info;
use vibeserv::config;
use vibeserv::error::AppError;
use vibeserv::server::Server;

#[derive(Parser)]
#[command(name = "vibeserv", about = "A single-threaded HTTP/1.1 origin server with CGI support")]
struct Args {
    /// Path to the server's configuration file.
    #[arg(default_value = "config/default.conf")]
    config_path: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args.config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: &std::path::Path) -> Result<(), AppError> {
    vibeserv::signals::install()?;

    let servers = config::load(config_path)?;
    if servers.is_empty() {
        return Err(AppError::NoValidServers);
    }
    config::display_config(&servers);
    info!("loaded {} server block(s) from {}", servers.len(), config_path.display());

    let mut server = Server::new(servers)?;
    server.run()
}
