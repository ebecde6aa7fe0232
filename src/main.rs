use std::io::{self, BufRead, Write};

use oscillator_engine::{
    EngineConfig, EngineError, EngineSession, SynthControl, VoiceId, VoiceSettings, WaveType,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const HELP: &str = "\
commands:
  osc <sine|square|saw> <freq> <amp> <attack> <decay> <sustain> <release>
  off <id>                       release one voice
  rm <id>                        remove one voice immediately
  release                        release every voice
  delay <time> <feedback> <mix>
  reverb <decay> <mix>
  status
  quit";

enum Outcome {
    Continue,
    Quit,
}

fn parse_wave(name: &str) -> Option<WaveType> {
    match name {
        "sine" => Some(WaveType::Sine),
        "square" => Some(WaveType::Square),
        "saw" | "sawtooth" => Some(WaveType::Sawtooth),
        _ => name.parse().ok().and_then(WaveType::from_index),
    }
}

fn parse_numbers<const N: usize>(args: &[&str]) -> Option<[f32; N]> {
    if args.len() != N {
        return None;
    }
    let mut values = [0.0; N];
    for (value, arg) in values.iter_mut().zip(args) {
        *value = arg.parse().ok()?;
    }
    Some(values)
}

fn parse_voice(args: &[&str]) -> Option<VoiceId> {
    match args {
        [id] => id.trim_start_matches('#').parse().ok().map(VoiceId),
        _ => None,
    }
}

fn print_status(session: &mut EngineSession) {
    let delay = session.delay_parameters();
    let reverb = session.reverb_parameters();
    if let Err(err) = session.check_render_health() {
        println!("warning: {}", err);
    }
    println!(
        "voices: {} ({} sounding), frames: {}, stolen: {}",
        session.voice_count(),
        session.active_voice_count(),
        session.frames_rendered(),
        session.voices_stolen()
    );
    for (id, settings) in session.voices() {
        println!(
            "  {} {:?} {} Hz amp {} adsr {}/{}/{}/{}",
            id,
            settings.wave_type,
            settings.frequency,
            settings.amplitude,
            settings.attack,
            settings.decay,
            settings.sustain,
            settings.release
        );
    }
    println!(
        "delay: {}s feedback {} mix {}",
        delay.delay_time, delay.feedback, delay.mix
    );
    println!("reverb: decay {} mix {}", reverb.decay, reverb.mix);
}

fn execute(session: &mut EngineSession, line: &str) -> Result<Outcome, EngineError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((command, args)) = words.split_first() else {
        return Ok(Outcome::Continue);
    };

    match *command {
        "osc" => match args.split_first() {
            Some((wave, rest)) => match (parse_wave(wave), parse_numbers::<6>(rest)) {
                (Some(wave_type), Some([frequency, amplitude, attack, decay, sustain, release])) => {
                    let id = session.add_oscillator(VoiceSettings::new(
                        wave_type, frequency, amplitude, attack, decay, sustain, release,
                    ))?;
                    println!("added voice {}", id);
                }
                _ => println!("usage: osc <sine|square|saw> <freq> <amp> <a> <d> <s> <r>"),
            },
            None => println!("usage: osc <sine|square|saw> <freq> <amp> <a> <d> <s> <r>"),
        },
        "off" => match parse_voice(args) {
            Some(id) => session.note_off(id)?,
            None => println!("usage: off <id>"),
        },
        "rm" => match parse_voice(args) {
            Some(id) => session.remove_voice(id)?,
            None => println!("usage: rm <id>"),
        },
        "release" => session.release_all()?,
        "delay" => match parse_numbers::<3>(args) {
            Some([time, feedback, mix]) => session.set_delay_parameters(time, feedback, mix)?,
            None => println!("usage: delay <time> <feedback> <mix>"),
        },
        "reverb" => match parse_numbers::<2>(args) {
            Some([decay, mix]) => session.set_reverb_parameters(decay, mix)?,
            None => println!("usage: reverb <decay> <mix>"),
        },
        "status" => print_status(session),
        "help" => println!("{}", HELP),
        "quit" | "exit" => return Ok(Outcome::Quit),
        other => println!("unknown command '{}', try 'help'", other),
    }
    Ok(Outcome::Continue)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let config = EngineConfig::from_env();
    let mut session = match EngineSession::new(config) {
        Ok(session) => session,
        Err(err) => {
            error!(%err, "invalid engine configuration");
            std::process::exit(2);
        }
    };

    if let Err(err) = session.initialize() {
        error!(%err, "could not start audio output");
        std::process::exit(1);
    }
    println!("{}", HELP);

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        // a failed prompt flush is not worth stopping for
        let _ = io::stdout().flush();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(err)) => {
                error!(%err, "failed to read command");
                break;
            }
            None => break,
        };
        match execute(&mut session, &line) {
            Ok(Outcome::Continue) => {}
            Ok(Outcome::Quit) => break,
            Err(err) => println!("error: {}", err),
        }
    }

    session.cleanup();
    info!("bye");
}
