use std::path::{Path, PathBuf};
use std::process::ExitCode;

use recast::ffmpeg::{CliTranscoder, TranscodeOptions};
use recast::probe;

const USAGE: &str = "\
usage: recast <command> [args]

commands:
  probe <file>                       print container metadata as JSON
  meta <file> <out>                  remux with refreshed metadata
  poster <file> <out> [time]         extract a poster frame (default 00:00:01)
  cut <file> <out> <start> <end>     stream-copy a time range

environment:
  RECAST_FFMPEG                      ffmpeg binary to use (default: ffmpeg)
";

enum CliError {
    Usage,
    Failed(recast::Error),
}

impl From<recast::Error> for CliError {
    fn from(err: recast::Error) -> CliError {
        CliError::Failed(err)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage) => {
            eprint!("{}", USAGE);
            ExitCode::from(2)
        }
        Err(CliError::Failed(err)) => {
            eprintln!("recast: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &[String]) -> Result<(), CliError> {
    match args {
        [cmd, file] if cmd == "probe" => {
            let description = probe::probe_file(Path::new(file)).await?;
            let json = serde_json::to_string_pretty(&description)
                .map_err(|err| recast::Error::InvalidConfig(err.to_string()))?;
            println!("{}", json);
            Ok(())
        }
        [cmd, file, out] if cmd == "meta" => {
            let result = transcoder().add_metadata(Path::new(file)).await?;
            write_out(out, &result.data).await
        }
        [cmd, file, out, rest @ ..] if cmd == "poster" && rest.len() <= 1 => {
            let time = rest.first().map(String::as_str).unwrap_or("00:00:01");
            let result = transcoder()
                .poster_frame(Path::new(file), time, false)
                .await?;
            write_out(out, &result.data).await
        }
        [cmd, file, out, start, end] if cmd == "cut" => {
            let start: f64 = start.parse().map_err(|_| CliError::Usage)?;
            let end: f64 = end.parse().map_err(|_| CliError::Usage)?;
            if end <= start {
                return Err(CliError::Usage);
            }

            let options = TranscodeOptions {
                time_range: Some((start, end)),
                copy_video: true,
                ..TranscodeOptions::default()
            };
            let result = transcoder().transform(Path::new(file), &options).await?;
            write_out(out, &result.data).await
        }
        _ => Err(CliError::Usage),
    }
}

fn transcoder() -> CliTranscoder {
    let binary = std::env::var("RECAST_FFMPEG").unwrap_or_else(|_| "ffmpeg".to_owned());
    CliTranscoder::new(PathBuf::from(binary))
}

async fn write_out(path: &str, data: &[u8]) -> Result<(), CliError> {
    tokio::fs::write(path, data)
        .await
        .map_err(|err| CliError::Failed(recast::Error::Io(err)))
}
