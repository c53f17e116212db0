//! Standalone engine host.
//!
//! Starts the engine, attaches the audio device when one is available, and
//! exposes the command surface over a line protocol so any front end (or a
//! terminal) can drive it:
//!
//! - Reads `name arg ...` lines from stdin; args parse as integers, floats or
//!   strings, in that order.
//! - Writes each command result to stdout as one line of JSON.
//! - `quit` exits.

use std::io::{BufRead, BufReader, Write};

use loopbox::audio::device::{start_audio, AudioConfig};
use loopbox::audio::engine::init_engine;
use loopbox::commands::dispatch;
use loopbox::value::Value;

fn parse_arg(raw: &str) -> Value {
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Int(int);
    }
    if let Ok(float) = raw.parse::<f64>() {
        return Value::Float(float);
    }
    Value::Str(raw.to_string())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("loopbox-host starting");

    let config = AudioConfig::default();
    let engine = init_engine(config.sample_rate as f64);

    match start_audio(engine.clone(), &config, None, None) {
        Ok(()) => log::info!("Audio device attached"),
        Err(e) => log::warn!("Running without audio device: {}", e),
    }

    let stdin = std::io::stdin();
    let mut reader = BufReader::new(stdin.lock());
    let stdout = std::io::stdout();

    println!("ready");
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                log::error!("stdin error: {}", e);
                break;
            }
        }

        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            continue;
        };
        if name == "quit" {
            break;
        }

        let params: Vec<Value> = parts.map(parse_arg).collect();
        let result = dispatch(&engine, name, &params);
        let encoded = serde_json::to_string(&result).unwrap_or_else(|_| "null".to_string());

        let mut out = stdout.lock();
        let _ = writeln!(out, "{}", encoded);
        let _ = out.flush();
    }

    log::info!("loopbox-host exiting");
}
