use anyhow::Result;
use clap::Parser;
use log::{error, info, LevelFilter};
use mailcatcher::{Config, MailCatcher};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use std::io;
use std::process::ExitCode;
use std::time::Duration;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Catch all mail sent over SMTP and browse it through a JSON API.
#[derive(Parser, Debug)]
#[command(name = "mailcatcher", disable_version_flag = true)]
struct Args {
    /// Port for the SMTP listener [env: MAILCATCHER_SMTP_PORT] [default: 1025]
    #[arg(long)]
    smtp_port: Option<u16>,

    /// Port for the HTTP API [env: MAILCATCHER_HTTP_PORT] [default: 8025]
    #[arg(long)]
    http_port: Option<u16>,

    /// Log every SMTP line and HTTP request
    #[arg(long)]
    verbose: bool,

    /// Print version information and exit
    #[arg(short = 'V', long)]
    version: bool,
}

// Flags win over the environment; bad environment values fall back to the defaults
fn config(args: &Args) -> Config {
    let mut config = Config::from_env();
    if let Some(port) = args.smtp_port {
        config.smtp_port = port;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    config
}

fn print_version() {
    println!("mailcatcher {}", env!("CARGO_PKG_VERSION"));
    println!("  commit: {}", option_env!("MAILCATCHER_COMMIT").unwrap_or("none"));
    println!(
        "  built:  {}",
        option_env!("MAILCATCHER_BUILD_DATE").unwrap_or("unknown")
    );
}

fn init_logger(verbose: bool) -> Result<()> {
    let mut builder = ConfigBuilder::new();
    builder.add_filter_allow_str("mailcatcher");
    let level = if verbose {
        builder.add_filter_allow_str("actix_web");
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    };
    TermLogger::init(
        level,
        builder.build(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}

fn wait_for_shutdown() -> io::Result<()> {
    actix_web::rt::System::new().block_on(shutdown_signal())
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    if args.version {
        print_version();
        return Ok(ExitCode::SUCCESS);
    }
    init_logger(args.verbose)?;

    let catcher = MailCatcher::start(config(&args))?;
    info!(
        "SMTP on {}, API on http://{}/api/v1/emails",
        catcher.smtp_addr(),
        catcher.http_addr()
    );

    wait_for_shutdown()?;
    info!("shutting down");
    if let Err(e) = catcher.stop(SHUTDOWN_TIMEOUT) {
        error!("shutdown failed: {}", e);
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn ports_from_flags_and_env() {
        env::set_var("MAILCATCHER_SMTP_PORT", "not-a-port");
        env::set_var("MAILCATCHER_HTTP_PORT", "9090");

        let args = Args::try_parse_from(["mailcatcher"]).unwrap();
        let parsed = config(&args);
        assert_eq!(parsed.smtp_port, 1025);
        assert_eq!(parsed.http_port, 9090);

        let args =
            Args::try_parse_from(["mailcatcher", "--smtp-port", "2525", "--http-port", "8080"])
                .unwrap();
        let parsed = config(&args);
        assert_eq!(parsed.smtp_port, 2525);
        assert_eq!(parsed.http_port, 8080);

        assert!(Args::try_parse_from(["mailcatcher", "--smtp-port", "70000"]).is_err());
    }
}
