use clap::Parser;
use email_passcode::settings::{ExitBehavior, DEFAULT_SETTINGS_FILE};
use email_passcode::{Coordinator, DesktopAutomation, Error, Settings, SystemClipboard};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "email-passcode",
    about = "Copy the newest emailed passcode to the clipboard",
    version
)]
struct Cli {
    #[arg(short, long, default_value = DEFAULT_SETTINGS_FILE, help = "Settings file")]
    config: PathBuf,

    #[arg(long, help = "Print the full error chain on failure")]
    verbose_errors: bool,

    #[arg(long, help = "Wait for Enter before exiting on failure")]
    wait_on_error: bool,

    #[arg(long, help = "Use the simulated mailbox instead of the IMAP server")]
    test_mode: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // RUST_LOG controls log levels, e.g. RUST_LOG=email_passcode=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("email_passcode=info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let cli = Cli::parse();
    let mut exit = ExitBehavior {
        verbose_errors: cli.verbose_errors,
        wait_on_error: cli.wait_on_error,
    };

    match run(&cli, &mut exit).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err, exit);
            if exit.wait_on_error {
                wait_for_enter();
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, exit: &mut ExitBehavior) -> email_passcode::Result<()> {
    let mut settings = Settings::load(&cli.config)?;

    let configured = settings.exit_behavior();
    exit.verbose_errors |= configured.verbose_errors;
    exit.wait_on_error |= configured.wait_on_error;

    if cli.test_mode {
        settings.force_simulation();
    }

    let config = settings.to_run_config()?;
    info!(
        subject = %config.search.subject,
        mode = ?config.test_mode.session_mode(),
        "Looking for passcode"
    );

    let report = Coordinator::new(config, SystemClipboard::new(), DesktopAutomation::new())
        .run()
        .await?;

    info!(
        uid = report.secret.message_id.0,
        candidates = report.candidates.len(),
        deleted = report.outcome.deletion.forwarded,
        "Done"
    );
    Ok(())
}

fn report_error(err: &Error, exit: ExitBehavior) {
    let message = if exit.verbose_errors {
        error_chain(err)
    } else {
        err.to_string()
    };

    if err.is_warning() {
        warn!(category = %err.category(), "{message}");
    } else {
        error!(category = %err.category(), "{message}");
    }
}

fn error_chain(err: &Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str("\n  caused by: ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn wait_for_enter() {
    eprintln!("Press Enter to exit...");
    let mut line = String::new();
    let _ = std::io::stdin().lock().read_line(&mut line);
}
