// Transcode Argument Builder
// Pure mapping from (input, output target, hardware profile, fallback flag)
// to the ffmpeg argv for on-demand streaming and archival re-encodes.
// No I/O happens here; every branch is unit-testable.

use std::path::Path;

use crate::services::hwaccel::{HardwareProfile, HwBackend};

/// Target height for streamed video; width follows the aspect ratio
const STREAM_HEIGHT: u32 = 720;

/// Fragment duration for the live pipe target, in microseconds.
/// Small fragments let playback start almost immediately.
const STREAM_FRAG_DURATION_US: u32 = 500_000;

const AUDIO_CODEC: &str = "aac";
const AUDIO_BITRATE: &str = "128k";
const AUDIO_SAMPLE_RATE: &str = "44100";

/// Where the encoded output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputTarget<'a> {
    /// Live pipe to stdout, consumed by an HTTP response body
    Stream,
    /// Write to a file on disk
    File(&'a Path),
}

/// Build the argv for an on-demand 720p streaming transcode.
///
/// The first argument pair is always `-i <input>` and the final argument is
/// always the output target. A hardware profile is honored unless
/// `force_software` is set (the fallback attempt after a hardware failure).
pub fn stream_args(
    input: &Path,
    target: OutputTarget<'_>,
    profile: Option<&HardwareProfile>,
    force_software: bool,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-i".into(), input.to_string_lossy().into_owned()];

    let hw = profile.filter(|_| !force_software);
    push_video_flags(&mut args, hw, true);

    // Audio is always normalized to a format every client can play
    args.push("-c:a".into());
    args.push(AUDIO_CODEC.into());
    args.push("-b:a".into());
    args.push(AUDIO_BITRATE.into());
    args.push("-ar".into());
    args.push(AUDIO_SAMPLE_RATE.into());
    args.push("-ac".into());
    args.push("2".into());

    match target {
        OutputTarget::Stream => {
            // Fragmented mp4 so playback can begin while we are still encoding
            args.push("-movflags".into());
            args.push("frag_keyframe+empty_moov+default_base_moof".into());
            args.push("-frag_duration".into());
            args.push(STREAM_FRAG_DURATION_US.to_string());
            args.push("-f".into());
            args.push("mp4".into());
        }
        OutputTarget::File(_) => {
            args.push("-movflags".into());
            args.push("+faststart+frag_keyframe+empty_moov".into());
            args.push("-f".into());
            args.push("mp4".into());
        }
    }

    args.push("-avoid_negative_ts".into());
    args.push("make_zero".into());

    match target {
        OutputTarget::Stream => args.push("pipe:1".into()),
        OutputTarget::File(path) => {
            args.push("-y".into());
            args.push(path.to_string_lossy().into_owned());
        }
    }

    args
}

/// Build the argv for a full archival re-encode into Matroska.
///
/// Maps every input stream, stream-copies audio and subtitles, and re-encodes
/// video only. No downscale: archival output keeps the source resolution.
pub fn archive_args(
    input: &Path,
    output: &Path,
    profile: Option<&HardwareProfile>,
    force_software: bool,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-i".into(), input.to_string_lossy().into_owned()];

    args.push("-map".into());
    args.push("0".into());

    let hw = profile.filter(|_| !force_software);
    push_video_flags(&mut args, hw, false);

    args.push("-c:a".into());
    args.push("copy".into());
    args.push("-c:s".into());
    args.push("copy".into());

    args.push("-f".into());
    args.push("matroska".into());
    args.push("-avoid_negative_ts".into());
    args.push("make_zero".into());

    args.push("-y".into());
    args.push(output.to_string_lossy().into_owned());

    args
}

/// Append the encoder selection, per-backend quality flags, and the video
/// filter chain. `scale` controls whether the 720p downscale is applied.
fn push_video_flags(args: &mut Vec<String>, hw: Option<&HardwareProfile>, scale: bool) {
    match hw {
        Some(profile) => match profile.backend {
            HwBackend::Vaapi => {
                if let Some(device) = &profile.hwaccel_device {
                    args.push("-vaapi_device".into());
                    args.push(device.clone());
                }
                args.push("-c:v".into());
                args.push(profile.encoder.clone());
                args.push("-qp".into());
                args.push("23".into());
                // Frames must be uploaded to the GPU surface ahead of any
                // vaapi filter, so the format/hwupload pair leads the chain
                let upload = format!(
                    "format={},hwupload",
                    profile.pixel_format.as_deref().unwrap_or("nv12")
                );
                args.push("-vf".into());
                if scale {
                    args.push(format!("{upload},scale_vaapi=w=-2:h={STREAM_HEIGHT}"));
                } else {
                    args.push(upload);
                }
            }
            HwBackend::Nvenc => {
                args.push("-c:v".into());
                args.push(profile.encoder.clone());
                args.push("-preset".into());
                args.push("p4".into());
                args.push("-b:v".into());
                args.push("3000k".into());
                args.push("-maxrate".into());
                args.push("3500k".into());
                args.push("-bufsize".into());
                args.push("6000k".into());
                args.push("-profile:v".into());
                args.push("high".into());
                args.push("-level".into());
                args.push("4.1".into());
                push_software_scale(args, scale);
            }
            HwBackend::Qsv => {
                args.push("-c:v".into());
                args.push(profile.encoder.clone());
                args.push("-preset".into());
                args.push("fast".into());
                args.push("-b:v".into());
                args.push("3000k".into());
                args.push("-maxrate".into());
                args.push("3500k".into());
                push_software_scale(args, scale);
            }
            HwBackend::VideoToolbox => {
                args.push("-c:v".into());
                args.push(profile.encoder.clone());
                args.push("-b:v".into());
                args.push("3000k".into());
                args.push("-profile:v".into());
                args.push("high".into());
                push_software_scale(args, scale);
            }
            HwBackend::Amf => {
                args.push("-c:v".into());
                args.push(profile.encoder.clone());
                args.push("-quality".into());
                args.push("balanced".into());
                args.push("-b:v".into());
                args.push("3000k".into());
                push_software_scale(args, scale);
            }
        },
        None => {
            args.push("-c:v".into());
            args.push("libx264".into());
            args.push("-preset".into());
            args.push("veryfast".into());
            args.push("-crf".into());
            args.push("23".into());
            args.push("-profile:v".into());
            args.push("high".into());
            args.push("-level".into());
            args.push("4.1".into());
            push_software_scale(args, scale);
        }
    }
}

fn push_software_scale(args: &mut Vec<String>, scale: bool) {
    if scale {
        args.push("-vf".into());
        args.push(format!("scale=-2:{STREAM_HEIGHT}"));
    }
}
