use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hearth_companion::audio::{AudioChannel, AudioEngine, AudioFrame, Consumer};
use hearth_companion::{Config, Daemon};

/// Hearth - always-listening voice companion
#[derive(Parser)]
#[command(name = "hearth", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "HEARTH_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Show resolved configuration paths and wake phrases
    Paths,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,hearth_companion=info",
        1 => "info,hearth_companion=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();

    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(config_path, duration).await,
            Command::TestSpeaker => test_speaker(config_path).await,
            Command::Paths => cmd_paths(config_path),
        };
    }

    let config = Config::load(config_path)?;
    let wake_phrases: Vec<String> = config
        .wake_models()
        .iter()
        .map(|m| m.wake_phrase.clone())
        .collect();

    let daemon = Daemon::new(config)?;
    tracing::info!("hearth ready - say \"{}\"", wake_phrases.join("\" or \""));

    // Run until interrupted
    daemon.run().await?;

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config_path: Option<&Path>, duration: u64) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;

    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let channel = AudioChannel::new(&config.audio);
    let _engine = AudioEngine::start(&channel, &config.audio)?;
    let mut input = channel.acquire_input(Consumer::Diagnostics)?;

    println!("Sample rate: {} Hz", config.audio.sample_rate);
    println!("---");

    for i in 0..duration {
        let second_end = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut peak = 0.0_f32;

        loop {
            let remaining = second_end.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, input.next_frame()).await {
                Ok(Ok(frame)) => peak = peak.max(frame.rms()),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => break,
            }
        }

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (peak * 200.0).min(50.0) as usize;
        let meter: String = "\u{2588}".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {peak:.4} | [{meter}]", i + 1);
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
#[allow(clippy::future_not_send)]
async fn test_speaker(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;

    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let channel = AudioChannel::new(&config.audio);
    let _engine = AudioEngine::start(&channel, &config.audio)?;
    let output = channel.acquire_output(Consumer::Diagnostics)?;

    let sample_rate = config.audio.sample_rate;
    let frequency = 440.0_f32;
    let num_samples = sample_rate as usize * 2;

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let samples: Vec<i16> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let v = (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3; // 30% volume
            (v * f32::from(i16::MAX)) as i16
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());

    let frame_samples = config.audio.frame_samples().max(1);
    for chunk in samples.chunks(frame_samples) {
        output.write(AudioFrame::new(chunk.to_vec(), sample_rate))?;
    }
    output.drained().await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Show resolved paths and wake phrases
fn cmd_paths(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    config.validate()?;

    println!("Data directory: {}", config.data_dir().display());
    println!(
        "Memory record:  {}",
        config
            .data_dir()
            .join(format!("memory_{}.yml", config.active_profile))
            .display()
    );
    println!("Active profile: {}", config.active_profile);
    println!("Languages:");
    for model in config.wake_models() {
        println!(
            "  {} ({}): wake \"{}\", sleep \"{}\"",
            model.language_name, model.language, model.wake_phrase, model.sleep_phrase
        );
    }

    Ok(())
}
