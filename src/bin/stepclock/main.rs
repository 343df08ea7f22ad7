//! stepclock - drive a metronome from the host audio clock
//!
//! Run with: cargo run -- --bpm 120 --ppq 4 --midi-port 0
//! Stop with Ctrl+C.

mod metronome;
mod signals;

use clap::Parser;
use color_eyre::eyre::{eyre, Result as EyreResult, WrapErr};
use stepclock::driver::{result_code, INVALID_TEMPO_EXIT_CODE};
use stepclock::host::{list_midi_ports, CpalEngine, OfflineEngine};
use stepclock::io::MidiEvent;
use stepclock::{run_driver, DriverConfig, StopSignal, TimingMode, DEFAULT_BURN_IN_FRAMES};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use metronome::Metronome;

#[derive(Parser, Debug)]
#[command(name = "stepclock", version, about = "Sample-accurate MIDI step clock")]
struct Cli {
    /// Tempo in beats per minute
    #[arg(short, long, default_value_t = 120)]
    bpm: u32,

    /// Steps per quarter note
    #[arg(short, long, default_value_t = 4)]
    ppq: u32,

    /// Frames to skip after activation before the first step
    #[arg(long, default_value_t = DEFAULT_BURN_IN_FRAMES)]
    burn_in: u64,

    /// Drift-free step placement instead of the fixed truncated step length
    #[arg(long)]
    exact: bool,

    /// MIDI channel (1-16)
    #[arg(short, long, default_value_t = 10)]
    channel: u8,

    /// MIDI note to click
    #[arg(short, long, default_value_t = 37)]
    note: u8,

    /// Note velocity (0-127)
    #[arg(short = 'v', long, default_value_t = 90)]
    velocity: u8,

    /// Pattern length in steps
    #[arg(long)]
    length: Option<u64>,

    /// Play the pattern once instead of looping
    #[arg(long, requires = "length")]
    once: bool,

    /// MIDI output port index (see --list-ports); events are logged without one
    #[arg(short = 'm', long)]
    midi_port: Option<usize>,

    /// List MIDI output ports and exit
    #[arg(short, long)]
    list_ports: bool,

    /// Use the simulated engine instead of an audio device
    #[arg(long)]
    offline: bool,

    /// Sample rate of the simulated engine
    #[arg(long, default_value_t = 48_000, requires = "offline")]
    sample_rate: u32,

    /// Block size of the simulated engine
    #[arg(long, default_value_t = 256, requires = "offline")]
    block_size: u32,

    /// Render this many blocks as fast as possible, then exit
    #[arg(long, requires = "offline")]
    blocks: Option<u64>,
}

impl Cli {
    fn driver_config(&self) -> DriverConfig {
        let timing = if self.exact {
            TimingMode::Exact
        } else {
            TimingMode::Truncated
        };
        DriverConfig::new(self.bpm, self.ppq)
            .burn_in_frames(self.burn_in)
            .timing(timing)
    }

    fn metronome(&self) -> Metronome {
        let metronome = Metronome::new(self.channel, self.note, self.velocity, self.ppq);
        match self.length {
            Some(steps) => metronome.length(steps, !self.once),
            None => metronome,
        }
    }
}

/// Exit code for failures before the driver starts: arguments, audio
/// device, MIDI port listing, signal handlers
const SETUP_FAILED_EXIT_CODE: i32 = INVALID_TEMPO_EXIT_CODE + 1;

fn main() {
    std::process::exit(exit_code(run()));
}

/// Setup errors keep their own code so they never read as a driver result
fn exit_code(outcome: EyreResult<i32>) -> i32 {
    match outcome {
        Ok(code) => code,
        Err(report) => {
            eprintln!("Error: {:?}", report);
            SETUP_FAILED_EXIT_CODE
        }
    }
}

/// Returns the driver's result code
fn run() -> EyreResult<i32> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // clap's own usage-error status (2) would read as an activation failure
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            let _ = err.print();
            return Err(eyre!("invalid command line"));
        }
    };

    if cli.list_ports {
        let ports = list_midi_ports().wrap_err("failed to enumerate MIDI ports")?;
        if ports.is_empty() {
            println!("No MIDI output ports available");
        }
        for (i, name) in ports.iter().enumerate() {
            println!("{}: {}", i, name);
        }
        return Ok(0);
    }

    let stop = StopSignal::new();
    signals::forward_to(stop.clone()).wrap_err("failed to install signal handlers")?;

    let config = cli.driver_config();
    let metronome = cli.metronome();
    info!("metronome: {}", metronome::describe(&metronome));

    let result = if cli.offline {
        let mut engine = OfflineEngine::new(cli.sample_rate, cli.block_size);
        engine = match cli.blocks {
            Some(blocks) => engine.max_blocks(blocks).on_finished(stop.clone()),
            None => engine.paced(true).capture_capacity(1 << 16),
        };

        let result = run_driver(&mut engine, &config, metronome, &stop);
        for captured in engine.drain_events() {
            info!(
                frame = captured.frame,
                event = ?MidiEvent::from_bytes(captured.event.bytes()),
                "captured"
            );
        }
        info!(frames = engine.frames_rendered(), "offline render complete");
        result
    } else {
        let mut engine = CpalEngine::new().wrap_err("failed to open audio device")?;
        if let Some(port) = cli.midi_port {
            engine = engine.midi_port(port);
        }
        run_driver(&mut engine, &config, metronome, &stop)
    };

    if let Err(err) = &result {
        error!("{}", err);
    }
    Ok(result_code(&result))
}
