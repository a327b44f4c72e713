//! Terminal front end for ECU programming sessions
//! Attaches to the session controller as a subscriber and drives it from stdin

mod console;
mod input;
mod render;

use anyhow::{Context, Result};
use clap::Parser;
use ecuflash_core::{
    CommandDispatcher, CoreError, EcuEvent, OverflowPolicy, SessionConfig, SessionController,
    Subscriber, Update, Verification, ViolationResponse,
};
use console::{Console, Step};
use input::{Input, HELP};
use render::Printer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// EcuFlash - ECU programming session console
#[derive(Parser, Debug)]
#[command(name = "ecuflash")]
#[command(author = "EcuFlash Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Console for flashing ignition maps through an ECU simulator", long_about = None)]
struct Args {
    /// ECU simulator executable (defaults to $ECU_SIM_PATH, then `ecu_sim`)
    #[arg(short, long)]
    sim: Option<PathBuf>,

    /// Arguments passed to the simulator
    #[arg(last = true)]
    sim_args: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Milliseconds to wait for a graceful quit before SIGTERM
    #[arg(long, default_value_t = 2000)]
    grace_ms: u64,

    /// Milliseconds to wait after SIGTERM before killing
    #[arg(long, default_value_t = 1000)]
    terminate_ms: u64,

    /// Events buffered between the process reader and the console
    #[arg(long, default_value_t = 256)]
    buffer: usize,

    /// Drop the oldest buffered event instead of pausing the reader when full
    #[arg(long, default_value = "false")]
    drop_oldest: bool,

    /// Print one JSON object per line instead of styled text
    #[arg(long, default_value = "false")]
    json: bool,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        let mut config = match &self.sim {
            Some(path) => SessionConfig::with_program(path.clone()),
            None => SessionConfig::default(),
        };
        for arg in &self.sim_args {
            config = config.with_arg(arg.clone());
        }
        let policy = if self.drop_oldest {
            OverflowPolicy::DropOldest
        } else {
            OverflowPolicy::Backpressure
        };
        config
            .with_timeouts(
                Duration::from_millis(self.grace_ms),
                Duration::from_millis(self.terminate_ms),
            )
            .with_buffer(self.buffer, policy)
    }
}

/// What the console receives from the controller
enum Notice {
    Update(Update),
    Closed,
}

/// Subscriber forwarding to the console loop
struct Forwarder(mpsc::UnboundedSender<Notice>);

impl Subscriber for Forwarder {
    fn on_update(&self, update: &Update) {
        let _ = self.0.send(Notice::Update(update.clone()));
    }

    fn on_close(&self) {
        let _ = self.0.send(Notice::Closed);
    }

    fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    let config = args.session_config();
    let program = config.program.display().to_string();
    info!("Starting EcuFlash console v{}", env!("CARGO_PKG_VERSION"));

    let printer = Printer::new(args.json);
    let controller = SessionController::launch(&config)
        .with_context(|| format!("Could not start ECU simulator '{}'", program))?;
    printer.banner(&program);

    let (notice_tx, mut notices) = mpsc::unbounded_channel();
    controller.subscribe(Arc::new(Forwarder(notice_tx)));

    // Line-buffered stdin on a detached thread
    let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        use std::io::BufRead;

        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if stdin_tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let dispatcher = controller.dispatcher_handle();
    let mut console = Console::default();

    loop {
        tokio::select! {
            line = stdin_rx.recv() => {
                let Some(line) = line else { break };
                match handle_line(&line, &mut console, &dispatcher, &printer).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => printer.error(&e.to_string()),
                }
            }
            notice = notices.recv() => {
                match notice {
                    Some(Notice::Update(update)) => on_update(&update, &mut console, &dispatcher, &printer),
                    Some(Notice::Closed) | None => {
                        printer.info("ECU process exited");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    match controller.quit().await {
        Ok(outcome) => info!("ECU process stopped ({:?})", outcome),
        Err(e) => printer.error(&format!("Shutdown failed: {}", e)),
    }

    // Drain anything delivered during shutdown
    while let Ok(Notice::Update(update)) = notices.try_recv() {
        printer.update(&update);
    }

    Ok(())
}

/// Handle one console line. Returns false when the user asked to quit.
async fn handle_line(
    line: &str,
    console: &mut Console,
    dispatcher: &CommandDispatcher,
    printer: &Printer,
) -> std::result::Result<bool, CoreError> {
    let input = match console.take_line(line) {
        Step::Answer(answer) => {
            if let Err(e) = dispatcher.respond_to_prompt(&answer).await {
                console.set_prompt(dispatcher.pending_prompt().is_some());
                return Err(e);
            }
            if console.override_waiting() {
                printer.confirm_override();
            }
            return Ok(true);
        }
        Step::Override(true) => {
            dispatcher.acknowledge_violation(ViolationResponse::Override);
            printer.info("Violation overridden; RACE map kept");
            return Ok(true);
        }
        Step::Override(false) => {
            let maps = dispatcher.acknowledge_violation(ViolationResponse::Correct);
            printer.recommendation(&maps);
            return Ok(true);
        }
        Step::Command(input) => input,
    };

    match input {
        Input::Identify => dispatcher.identify().await?,
        Input::AllowedMaps => dispatcher.get_allowed_maps().await?,
        Input::Flash(map_id) => dispatcher.flash_map(&map_id).await?,
        Input::Verify => check_compliance(console, dispatcher, printer),
        Input::Catalog => printer.catalog(),
        Input::Status => printer.status(&dispatcher.session(), dispatcher.is_connected()),
        Input::Cancel => match dispatcher.abandon_exchange() {
            Some(command) => printer.info(&format!("Stopped waiting for {}", command)),
            None => printer.info("No command in flight"),
        },
        Input::Help => printer.info(HELP),
        Input::Quit => return Ok(false),
        Input::Empty => {}
        Input::Unknown(text) => printer.error(&format!("Unknown command '{}', try `help`", text)),
    }
    Ok(true)
}

fn on_update(update: &Update, console: &mut Console, dispatcher: &CommandDispatcher, printer: &Printer) {
    printer.update(update);

    // Updates can trail the live state; an answered prompt stays closed
    let prompt_open = update.pending_prompt.is_some() && dispatcher.pending_prompt().is_some();
    if console.set_prompt(prompt_open) {
        printer.confirm_override();
    }

    // Verify right after a flash lands
    if matches!(update.event, EcuEvent::Success { .. })
        && update.session.flashed_map.is_some()
    {
        check_compliance(console, dispatcher, printer);
    }
}

fn check_compliance(console: &mut Console, dispatcher: &CommandDispatcher, printer: &Printer) {
    let verification = dispatcher.verify();
    printer.verification(&verification);
    if matches!(verification, Verification::Violation { .. }) && console.ask_override() {
        printer.confirm_override();
    }
}

fn setup_logging(level: &str) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::WARN);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
