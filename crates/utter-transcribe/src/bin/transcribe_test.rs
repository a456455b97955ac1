//! Test binary for a single transcription handoff.
//!
//! Usage: transcribe-test <audio_file> <api_key> [model]

use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use utter_core::AudioArtifact;
use utter_transcribe::{HandoffOutcome, OpenAIClient, OpenAIConfig, TranscriptionHandoff};

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("webm") => "audio/webm",
        Some("ogg") => "audio/ogg",
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("flac") => "audio/flac",
        _ => "audio/wav",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} <audio_file> <api_key> [model]", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} test.wav sk-... gpt-4o-mini-transcribe", args[0]);
        std::process::exit(1);
    }

    let audio_file = Path::new(&args[1]);
    let api_key = &args[2];
    let model = args.get(3).map(|s| s.as_str());

    println!("Reading audio file: {}", audio_file.display());
    let audio = fs::read(audio_file)?;
    let artifact = AudioArtifact::new(audio, mime_for(audio_file));
    println!(
        "Audio size: {} bytes ({:.2} KB), {}",
        artifact.len(),
        artifact.len() as f64 / 1024.0,
        artifact.mime_type()
    );

    let mut config = OpenAIConfig::new(api_key);
    if let Some(model) = model {
        config = config.with_model(model);
    }
    println!("Using model: {}", config.model());

    let handoff = TranscriptionHandoff::new(Arc::new(OpenAIClient::new(config)));

    println!("Sending transcription request...");
    let start = Instant::now();
    let outcome = handoff.run(artifact).await;
    let elapsed = start.elapsed();

    println!();
    println!("Handoff completed in {:.2}s", elapsed.as_secs_f64());
    match outcome {
        HandoffOutcome::Transcript(text) => {
            println!("---");
            println!("{}", text);
            println!("---");
        }
        HandoffOutcome::NoSpeech => println!("No speech detected."),
        HandoffOutcome::Failed(e) => return Err(e.into()),
    }

    Ok(())
}
