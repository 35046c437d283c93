//! Wrapper around an external `ffmpeg` binary for the operations the
//! in-process pipeline does not cover: stream-copy edits, metadata
//! remuxes, and poster-frame extraction.
//!
//! One conversion at a time; the busy gate is a mutex, not a hint, and
//! a second caller fails with [`Error::Busy`] immediately.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use bytes::Bytes;
use log::{debug, info};
use tokio::process::Command;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::probe::sniff_mime;
use crate::transform::CropRect;
use crate::Error;

/// Scale factors applied to the input width and height.
#[derive(Debug, Clone, Copy)]
pub struct ScaleFactors {
    pub width: f64,
    pub height: f64,
}

/// Options for a custom transform run, mirroring the upstream player's
/// command builder field for field.
#[derive(Debug, Clone, Default)]
pub struct TranscodeOptions {
    /// Seconds from the source: seek to `.0`, keep `.1 - .0`.
    pub time_range: Option<(f64, f64)>,
    pub scale: Option<ScaleFactors>,
    pub crop: Option<CropRect>,
    pub flip_horizontal: bool,
    pub frame_rate: Option<u32>,
    /// Stream-copy the video instead of re-encoding.
    pub copy_video: bool,
    /// Video bitrate in kbit/s.
    pub bitrate_kbps: Option<u32>,
    /// Output container extension; `mp4` when unset.
    pub format: Option<String>,
}

impl TranscodeOptions {
    /// Build the argument list for one run. The output file name is the
    /// caller's; the ordering here matters and follows the upstream
    /// command exactly.
    pub fn to_args(&self, input: &str, output: &str) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();

        if let Some((start, _)) = self.time_range {
            args.push("-ss".to_owned());
            args.push(format_seconds(start));
        }

        args.push("-i".to_owned());
        args.push(input.to_owned());

        if let Some((start, end)) = self.time_range {
            args.push("-t".to_owned());
            args.push(format_seconds(end - start));
        }

        if self.crop.is_some() || self.flip_horizontal || self.scale.is_some() {
            let mut filters: Vec<String> = Vec::new();

            if let Some(scale) = self.scale {
                filters.push(format!("scale=iw*{}:ih*{}", scale.width, scale.height));
            }
            if let Some(crop) = self.crop {
                filters.push(format!(
                    "crop={}:{}:{}:{}",
                    crop.width, crop.height, crop.x, crop.y
                ));
            }
            if self.flip_horizontal {
                filters.push("hflip".to_owned());
            }

            args.push("-vf".to_owned());
            args.push(filters.join(","));
        }

        if let Some(fps) = self.frame_rate {
            args.push("-r".to_owned());
            args.push(fps.to_string());
        }

        if self.copy_video {
            args.push("-c:v".to_owned());
            args.push("copy".to_owned());
        }

        // audio is always stream-copied
        args.push("-c:a".to_owned());
        args.push("copy".to_owned());

        if let Some(bitrate) = self.bitrate_kbps {
            args.push("-b:v".to_owned());
            args.push(format!("{}k", bitrate));
        }

        args.push(output.to_owned());
        args
    }

    fn output_name(&self) -> String {
        let ext = self.format.as_deref().unwrap_or("mp4");
        scratch_name(ext)
    }
}

/// The converted bytes plus the MIME type sniffed from them.
#[derive(Debug)]
pub struct TranscodeResult {
    pub mime: &'static str,
    pub data: Bytes,
}

pub struct CliTranscoder {
    binary: PathBuf,
    scratch_dir: PathBuf,
    busy: Mutex<()>,
}

impl CliTranscoder {
    pub fn new(binary: impl Into<PathBuf>) -> CliTranscoder {
        CliTranscoder {
            binary: binary.into(),
            scratch_dir: std::env::temp_dir(),
            busy: Mutex::new(()),
        }
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> CliTranscoder {
        self.scratch_dir = dir.into();
        self
    }

    /// Custom transform: clip, scale, crop, flip, re-rate, or
    /// stream-copy per `options`.
    pub async fn transform(
        &self,
        input: &Path,
        options: &TranscodeOptions,
    ) -> Result<TranscodeResult, Error> {
        let output = options.output_name();
        let args = options.to_args(&path_arg(input)?, &path_arg(&self.scratch_dir.join(&output))?);
        self.run(&args, &output).await
    }

    /// Rewrite the container with its metadata refreshed, streams
    /// untouched.
    pub async fn add_metadata(&self, input: &Path) -> Result<TranscodeResult, Error> {
        let ext = input
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let output = scratch_name(ext);

        let args = vec![
            "-i".to_owned(),
            path_arg(input)?,
            "-c".to_owned(),
            "copy".to_owned(),
            "-map".to_owned(),
            "0".to_owned(),
            path_arg(&self.scratch_dir.join(&output))?,
        ];
        self.run(&args, &output).await
    }

    /// Extract one frame as a small poster image, 100px wide.
    pub async fn poster_frame(
        &self,
        input: &Path,
        time: &str,
        flip_horizontal: bool,
    ) -> Result<TranscodeResult, Error> {
        let output = scratch_name("jpg");

        let mut scale = "scale=100:-1".to_owned();
        if flip_horizontal {
            scale.push_str(",hflip");
        }

        let args = vec![
            "-i".to_owned(),
            path_arg(input)?,
            "-ss".to_owned(),
            time.to_owned(),
            "-vf".to_owned(),
            scale,
            "-frames:v".to_owned(),
            "1".to_owned(),
            path_arg(&self.scratch_dir.join(&output))?,
        ];
        self.run(&args, &output).await
    }

    async fn run(&self, args: &[String], output_name: &str) -> Result<TranscodeResult, Error> {
        let _guard = self.busy.try_lock().map_err(|_| Error::Busy)?;

        debug!("{} {}", self.binary.display(), args.join(" "));

        let status = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await?;

        let output_path = self.scratch_dir.join(output_name);
        if !status.success() {
            let _ = tokio::fs::remove_file(&output_path).await;
            return Err(Error::ExternalProcessFailure { status });
        }

        let data = tokio::fs::read(&output_path).await?;
        tokio::fs::remove_file(&output_path).await?;

        info!("transcoder produced {} bytes", data.len());
        Ok(TranscodeResult {
            mime: sniff_mime(&data),
            data: Bytes::from(data),
        })
    }
}

/// Seconds formatted without a trailing `.0`, the way the upstream
/// player stringified them.
fn format_seconds(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn scratch_name(ext: &str) -> String {
    format!("{}.{}", Uuid::new_v4().simple(), ext)
}

fn path_arg(path: &Path) -> Result<String, Error> {
    path.to_str()
        .map(str::to_owned)
        .ok_or_else(|| Error::InvalidConfig(format!("path {:?} is not valid UTF-8", path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_transform_argument_order() {
        let options = TranscodeOptions {
            time_range: Some((2.0, 7.5)),
            scale: Some(ScaleFactors {
                width: 0.5,
                height: 0.5,
            }),
            crop: Some(CropRect {
                x: 10,
                y: 20,
                width: 640,
                height: 360,
            }),
            flip_horizontal: true,
            frame_rate: Some(24),
            copy_video: false,
            bitrate_kbps: Some(1500),
            format: None,
        };

        let args = options.to_args("in.mp4", "out.mp4");
        assert_eq!(
            args,
            vec![
                "-ss", "2", "-i", "in.mp4", "-t", "5.5", "-vf",
                "scale=iw*0.5:ih*0.5,crop=640:360:10:20,hflip", "-r", "24", "-c:a", "copy",
                "-b:v", "1500k", "out.mp4",
            ]
        );
    }

    #[test]
    fn copy_run_skips_filters() {
        let options = TranscodeOptions {
            copy_video: true,
            ..TranscodeOptions::default()
        };

        let args = options.to_args("in.mp4", "out.mp4");
        assert_eq!(
            args,
            vec!["-i", "in.mp4", "-c:v", "copy", "-c:a", "copy", "out.mp4"]
        );
    }

    #[test]
    fn scratch_names_are_unique() {
        let a = scratch_name("mp4");
        let b = scratch_name("mp4");
        assert_ne!(a, b);
        assert!(a.ends_with(".mp4"));
    }
}
