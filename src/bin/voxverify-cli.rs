use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use voxverify::Verifier;
use voxverify::cli::ConfigArgs;

#[derive(Parser, Debug)]
#[command(name = "voxverify")]
#[command(about = "Enroll and verify speakers against a vector store")]
struct Params {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a mono WAV recording as a new sample for a speaker.
    Enroll {
        #[arg(short = 's', long = "speaker")]
        speaker_id: String,

        #[arg(short = 'a', long = "audio")]
        audio_path: PathBuf,
    },

    /// Verify a recording against a claimed speaker, or identify it when no claim is given.
    ///
    /// Exits with status 1 when the recording is rejected.
    Verify {
        #[arg(short = 'a', long = "audio")]
        audio_path: PathBuf,

        #[arg(short = 's', long = "claim")]
        claimed_speaker_id: Option<String>,
    },

    /// List enrolled speakers.
    Speakers {
        #[arg(long = "limit", default_value_t = 1000)]
        sample_limit: usize,
    },

    /// Delete a single enrolled sample.
    DeleteSample {
        #[arg(long = "id")]
        sample_id: String,
    },

    /// Delete a speaker and all of its samples.
    DeleteSpeaker {
        #[arg(short = 's', long = "speaker")]
        speaker_id: String,
    },

    /// Remove every enrolled sample from the collection.
    Clear,
}

fn main() -> Result<ExitCode> {
    voxverify::init_logging();
    let params = Params::parse();

    let config = params.config.resolve()?;
    let verifier = Verifier::connect(config).context("failed to initialize verifier")?;

    match params.command {
        Command::Enroll {
            speaker_id,
            audio_path,
        } => {
            let audio = verifier.audio_ingest().ingest_file(&audio_path)?;
            let receipt = verifier.enroll_audio(&speaker_id, &audio)?;
            print_json(&receipt)?;
        }
        Command::Verify {
            audio_path,
            claimed_speaker_id,
        } => {
            let audio = verifier.audio_ingest().ingest_file(&audio_path)?;
            let result = verifier.verify_audio(&audio, claimed_speaker_id.as_deref())?;
            print_json(&result)?;
            if !result.accept {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Speakers { sample_limit } => {
            print_json(&verifier.speakers(sample_limit)?)?;
        }
        Command::DeleteSample { sample_id } => {
            verifier.delete_sample(&sample_id)?;
        }
        Command::DeleteSpeaker { speaker_id } => {
            verifier.delete_speaker(&speaker_id)?;
        }
        Command::Clear => {
            verifier.clear()?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}
