//! Hark Console
//!
//! Terminal front end for one voice session. The speech engines are the
//! simulated ones from `hark_voice::simulated`: `listen <text>` makes the
//! recognizer "hear" that text, so every state transition can be driven by hand.

use hark_voice::simulated::{
    utterance_script, OscillatingLevel, ScriptedRecognizer, ScriptedSynthesizer,
};
use hark_voice::{
    Acceptance, Affordance, CapabilityProbe, EchoBackend, HostEnvironment, Intent, Shortcut,
    VoiceConfig, VoiceControlPresenter, VoiceEngines, VoiceInfo, VoiceSessionController,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Per-word pacing of simulated speech.
const WORD_STEP: Duration = Duration::from_millis(150);
/// How long the simulated synthesizer takes per utterance.
const UTTERANCE_LENGTH: Duration = Duration::from_millis(800);
/// Silence before the simulated recognizer gives up with `no-speech`.
const SILENCE_TIMEOUT: Duration = Duration::from_secs(4);

static PROBE: CapabilityProbe = CapabilityProbe::new();

type ConsoleResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[hark-console] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "hark console failed");
        std::process::exit(1);
    }
}

#[cfg(feature = "cpal-host")]
fn host() -> Box<dyn HostEnvironment> {
    Box::new(hark_voice::CpalHost {
        recognizer_installed: true,
        synthesizer_installed: true,
    })
}

#[cfg(not(feature = "cpal-host"))]
fn host() -> Box<dyn HostEnvironment> {
    Box::new(hark_voice::StaticHost(hark_voice::VoiceCapabilities::all()))
}

fn simulated_voices() -> Vec<VoiceInfo> {
    [
        ("sim-en-us", "Ada", "en-US", true),
        ("sim-en-gb", "Brook", "en-GB", false),
        ("sim-de", "Clara", "de-DE", false),
    ]
    .into_iter()
    .map(|(id, name, language, is_default)| VoiceInfo {
        id: id.into(),
        name: name.into(),
        language: language.into(),
        is_default,
    })
    .collect()
}

async fn run() -> ConsoleResult<()> {
    let config = match VoiceConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "voice config not loaded; using defaults");
            VoiceConfig::default()
        }
    };
    let capabilities = PROBE.probe(host().as_ref());

    let recognizer = ScriptedRecognizer::new(SILENCE_TIMEOUT);
    let engines = VoiceEngines {
        recognizer: Box::new(recognizer.clone()),
        synthesizer: Arc::new(
            ScriptedSynthesizer::new(UTTERANCE_LENGTH).with_voices(simulated_voices()),
        ),
        level_source: Some(Arc::new(OscillatingLevel::default())),
        backend: Some(Arc::new(EchoBackend)),
    };
    let controller = VoiceSessionController::new(config, capabilities, engines)?;
    let presenter = VoiceControlPresenter::new(controller.clone());
    let pending = Arc::new(Mutex::new(None::<String>));

    spawn_printers(&controller, Arc::clone(&pending));
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match handle_line(line.trim(), &presenter, &recognizer, &pending) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("  ! {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; shutting down console");
                break;
            }
        }
    }
    controller.stop_recording();
    Ok(())
}

/// Returns `Ok(false)` on quit.
fn handle_line(
    line: &str,
    presenter: &VoiceControlPresenter,
    recognizer: &ScriptedRecognizer,
    pending: &Mutex<Option<String>>,
) -> ConsoleResult<bool> {
    let controller = presenter.controller();
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "" => {}
        "listen" | "mumble" => {
            if !rest.is_empty() {
                let confidence = if command == "listen" { 0.92 } else { 0.55 };
                recognizer.push_script(utterance_script(rest, confidence, WORD_STEP));
            }
            let attempt = controller.start_recording(None)?;
            println!("  recording {attempt}");
        }
        "stop" => controller.stop_recording(),
        "toggle" => presenter.dispatch(Intent::ToggleRecording)?,
        "cancel" => presenter.dispatch(Intent::Cancel)?,
        "key" => {
            let shortcut: Shortcut = rest.parse()?;
            match presenter.handle_shortcut(&shortcut) {
                Some(outcome) => outcome?,
                None => println!("  {shortcut} is not bound"),
            }
        }
        "say" => controller.speak(rest, None)?,
        "ask" => controller.converse(rest)?,
        "send" => {
            let text = pending.lock().ok().and_then(|mut p| p.take());
            match text {
                Some(text) => controller.converse(&text)?,
                None => println!("  nothing awaiting confirmation"),
            }
        }
        "clear" => controller.clear_error(),
        "status" => println!("{}", serde_json::to_string_pretty(&controller.status())?),
        "voices" => {
            for voice in controller.voices() {
                let marker = if voice.is_default { "*" } else { " " };
                println!("  {marker} {:<10} {:<6} {}", voice.id, voice.language, voice.name);
            }
        }
        "help" => print_help(),
        "quit" | "exit" => return Ok(false),
        other => println!("  unknown command `{other}` (try `help`)"),
    }
    Ok(true)
}

fn spawn_printers(controller: &VoiceSessionController, pending: Arc<Mutex<Option<String>>>) {
    let mut states = controller.subscribe_state();
    tokio::spawn(async move {
        while let Some(state) = states.recv().await {
            let Affordance { icon, tooltip, pressed, .. } = Affordance::for_state(&state);
            println!("  [{icon:?}{}] {tooltip}", if pressed { " on" } else { "" });
        }
    });

    let mut transcripts = controller.subscribe_transcripts();
    tokio::spawn(async move {
        while let Some(result) = transcripts.recv().await {
            let tag = if result.is_final { "final" } else { "..." };
            println!("  {tag} \"{}\" ({:.2})", result.text, result.confidence);
        }
    });

    let mut accepted = controller.subscribe_accepted();
    let chat = controller.clone();
    tokio::spawn(async move {
        while let Some(transcript) = accepted.recv().await {
            match transcript.acceptance {
                Acceptance::AutoSubmit => {
                    if let Err(e) = chat.converse(&transcript.text) {
                        tracing::warn!(error = %e, "could not submit transcript");
                    }
                }
                Acceptance::Confirm => {
                    println!("  heard \"{}\"; type `send` to submit it", transcript.text);
                    if let Ok(mut slot) = pending.lock() {
                        *slot = Some(transcript.text);
                    }
                }
            }
        }
    });

    let mut replies = controller.subscribe_replies();
    tokio::spawn(async move {
        while let Some(reply) = replies.recv().await {
            println!("  assistant: {}", reply.reply);
        }
    });

    let mut errors = controller.subscribe_errors();
    tokio::spawn(async move {
        while let Some(notice) = errors.recv().await {
            let scope = if notice.transient { "" } else { " (permanent)" };
            println!("  ! {}{scope}", notice.message);
        }
    });
}

fn print_help() {
    println!(
        "commands:
  listen [text]   record; the simulated engine hears `text` (silence if omitted)
  mumble <text>   like listen, with low confidence
  stop | toggle | cancel
  key <chord>     press a shortcut, e.g. `key ctrl+space`, `key escape`
  say <text>      speak text
  ask <text>      send text to the assistant and speak the reply
  send            submit a transcript awaiting confirmation
  clear           dismiss the current error
  status | voices | help | quit"
    );
}
