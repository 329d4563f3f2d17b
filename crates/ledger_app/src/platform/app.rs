use std::collections::VecDeque;
use std::io::{self, BufRead, IsTerminal};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use ledger_core::{update, ConsoleState, Msg, QueryStatus};
use ledger_engine::EngineHandle;
use ledger_logging::{ledger_info, ledger_warn};

use super::cli::Cli;
use super::effects::{host_commands, EffectRunner, EngineCommands};
use super::logging;
use super::render::Renderer;
use super::settings::Settings;

const TICK_INTERVAL: Duration = Duration::from_millis(75);

enum AppEvent {
    Core(Msg),
    /// Stdin reached end of file.
    InputClosed,
}

pub fn run_app() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::initialize(&cli.log_options());

    let mut settings = Settings::load_or_default(&cli.config);
    settings.apply_cli(&cli);
    ledger_info!(
        "Starting console against {} (graph: {:?})",
        settings.api_base_url,
        settings.default_graph
    );

    let engine = EngineHandle::new(settings.engine_config()).context("failed to start engine")?;
    let mut runner = EffectRunner::new(engine);

    let mut config = settings.console_config();
    config.extra_commands.extend(host_commands());
    let mut state = ConsoleState::new(config);

    let interactive = io::stdin().is_terminal();
    let (event_tx, event_rx) = mpsc::channel::<AppEvent>();
    spawn_input_reader(event_tx.clone(), interactive)?;
    spawn_ticker(event_tx.clone())?;
    if let Some(graph) = settings.default_graph.clone() {
        let _ = event_tx.send(AppEvent::Core(Msg::ContextSelected(Some(graph))));
    }
    drop(event_tx);

    let mut renderer = Renderer::new(io::stdout().lock());
    renderer.render_new(state.transcript())?;
    if interactive {
        renderer.prompt(state.context_id())?;
    }

    let mut input_closed = false;
    loop {
        let mut queue = VecDeque::new();
        match event_rx.recv_timeout(TICK_INTERVAL) {
            Ok(event) => push_event(event, &mut queue, &mut input_closed),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => input_closed = true,
        }
        while let Ok(event) = event_rx.try_recv() {
            push_event(event, &mut queue, &mut input_closed);
        }
        queue.extend(runner.drain_events());

        if input_closed && queue.is_empty() && is_settled(&state, &runner) {
            ledger_info!("Input closed and no work pending");
            queue.push_back(Msg::Shutdown);
        }

        let mut shutting_down = false;
        while let Some(msg) = queue.pop_front() {
            shutting_down |= matches!(msg, Msg::Shutdown);
            let (next, effects) = update(state, msg);
            state = next;
            let view = state.view();
            queue.extend(runner.run(&view, effects));
        }

        if state.consume_dirty() {
            let written = renderer.render_new(state.transcript())?;
            if interactive && written > 0 && !shutting_down {
                renderer.prompt(state.context_id())?;
            }
        }
        if shutting_down {
            break;
        }
    }

    ledger_info!("Console closed");
    Ok(())
}

fn push_event(event: AppEvent, queue: &mut VecDeque<Msg>, input_closed: &mut bool) {
    match event {
        AppEvent::Core(msg) => queue.push_back(msg),
        AppEvent::InputClosed => *input_closed = true,
    }
}

/// Nothing is in flight that a piped script would still want to see.
fn is_settled<E: EngineCommands>(state: &ConsoleState, runner: &EffectRunner<E>) -> bool {
    let view = state.view();
    runner.is_idle()
        && !state.submit_pending()
        && view.query_status != QueryStatus::Streaming
        && view.pending_agent_requests == 0
        && view.tasks.is_empty()
}

/// Feeds stdin lines into the console. A terminal goes through the Enter
/// debounce; piped input is submitted line by line.
fn spawn_input_reader(tx: mpsc::Sender<AppEvent>, interactive: bool) -> io::Result<()> {
    thread::Builder::new()
        .name("ledger-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let text = match line {
                    Ok(text) => text,
                    Err(err) => {
                        ledger_warn!("Failed to read stdin: {}", err);
                        break;
                    }
                };
                let now = Instant::now();
                let changed = Msg::InputChanged { text, now };
                let submit = if interactive {
                    Msg::EnterPressed { now }
                } else {
                    Msg::InputSubmitted
                };
                if tx.send(AppEvent::Core(changed)).is_err()
                    || tx.send(AppEvent::Core(submit)).is_err()
                {
                    return;
                }
            }
            let _ = tx.send(AppEvent::InputClosed);
        })?;
    Ok(())
}

// Background tick to drive the submit debounce.
fn spawn_ticker(tx: mpsc::Sender<AppEvent>) -> io::Result<()> {
    thread::Builder::new()
        .name("ledger-tick".to_string())
        .spawn(move || {
            while tx
                .send(AppEvent::Core(Msg::Tick {
                    now: Instant::now(),
                }))
                .is_ok()
            {
                thread::sleep(TICK_INTERVAL);
            }
        })?;
    Ok(())
}
