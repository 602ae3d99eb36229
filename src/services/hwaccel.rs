// Hardware Acceleration Detection Service
// OBS-style encoder probing - candidates are validated by actually running a
// tiny test encode rather than trusting FFmpeg compilation flags, so only
// encode paths that work on this host are ever selected.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;
use tokio::sync::OnceCell;

/// Hardware acceleration backend, in probe priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HwBackend {
    Vaapi,
    Nvenc,
    Qsv,
    VideoToolbox,
    Amf,
}

impl HwBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            HwBackend::Vaapi => "vaapi",
            HwBackend::Nvenc => "nvenc",
            HwBackend::Qsv => "qsv",
            HwBackend::VideoToolbox => "videotoolbox",
            HwBackend::Amf => "amf",
        }
    }
}

/// One validated hardware encode path. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareProfile {
    pub backend: HwBackend,

    /// FFmpeg encoder name (e.g. "h264_vaapi")
    pub encoder: String,

    /// FFmpeg hwaccel name, when the backend uses one for decode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hwaccel: Option<String>,

    /// Device node for backends that need one (VAAPI render node)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hwaccel_device: Option<String>,

    /// Pixel format frames must be uploaded in before reaching the encoder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pixel_format: Option<String>,
}

/// Probe candidate: names to look for in the ffmpeg listings plus the
/// profile constructed when its test encode succeeds
struct Candidate {
    backend: HwBackend,
    encoder: &'static str,
    hwaccel: &'static str,
    device: Option<&'static str>,
    pixel_format: Option<&'static str>,
}

/// Fixed priority order: first candidate whose test encode exits 0 wins
const CANDIDATES: &[Candidate] = &[
    Candidate {
        backend: HwBackend::Vaapi,
        encoder: "h264_vaapi",
        hwaccel: "vaapi",
        device: Some("/dev/dri/renderD128"),
        pixel_format: Some("nv12"),
    },
    Candidate {
        backend: HwBackend::Nvenc,
        encoder: "h264_nvenc",
        hwaccel: "cuda",
        device: None,
        pixel_format: None,
    },
    Candidate {
        backend: HwBackend::Qsv,
        encoder: "h264_qsv",
        hwaccel: "qsv",
        device: None,
        pixel_format: None,
    },
    Candidate {
        backend: HwBackend::VideoToolbox,
        encoder: "h264_videotoolbox",
        hwaccel: "videotoolbox",
        device: None,
        pixel_format: None,
    },
    Candidate {
        backend: HwBackend::Amf,
        encoder: "h264_amf",
        hwaccel: "d3d11va",
        device: None,
        pixel_format: None,
    },
];

/// Detects the best working hardware encode path on this host.
///
/// The probe runs at most once per process, lazily, on first need; concurrent
/// first callers all await the same in-flight probe and observe the same
/// result. Injected into dependents rather than held as ambient state.
pub struct HwAccelDetector {
    ffmpeg_path: String,
    cache: OnceCell<Option<HardwareProfile>>,
}

impl HwAccelDetector {
    pub fn new(ffmpeg_path: String) -> Self {
        Self {
            ffmpeg_path,
            cache: OnceCell::new(),
        }
    }

    /// Build a detector whose cache is already resolved. Used by callers that
    /// need to pin the outcome without probing hardware (tests, overrides).
    pub fn with_profile(ffmpeg_path: String, profile: Option<HardwareProfile>) -> Self {
        let cache = OnceCell::new();
        let _ = cache.set(profile);
        Self { ffmpeg_path, cache }
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }

    /// Whether the encoder binary is present at all. Cheap, checked before
    /// every spawn; a missing binary is fatal for hardware and software alike.
    pub fn encoder_installed(&self) -> bool {
        Path::new(&self.ffmpeg_path).exists()
    }

    /// Detect the available hardware encode path, memoized for the life of
    /// the process. `None` means software-only.
    pub async fn detect(&self) -> Option<HardwareProfile> {
        self.cache
            .get_or_init(|| async {
                log::info!("Probing hardware encode paths...");
                let profile = self.probe().await;
                match &profile {
                    Some(p) => log::info!("Hardware probe complete: using {} ({})", p.backend.as_str(), p.encoder),
                    None => log::info!("Hardware probe complete: no working backend, software only"),
                }
                profile
            })
            .await
            .clone()
    }

    async fn probe(&self) -> Option<HardwareProfile> {
        let encoders = match self.run_ffmpeg(&["-hide_banner", "-encoders"]).await {
            Some(output) => output,
            None => {
                log::warn!("FFmpeg unavailable at {:?}, skipping hardware probe", self.ffmpeg_path);
                return None;
            }
        };
        let hwaccels = self.run_ffmpeg(&["-hide_banner", "-hwaccels"]).await?;

        for candidate in CANDIDATES {
            if !encoders.contains(candidate.encoder) || !hwaccels.contains(candidate.hwaccel) {
                log::debug!("  {}: not compiled into FFmpeg", candidate.backend.as_str());
                continue;
            }

            log::debug!("  {}: testing encoder initialization...", candidate.backend.as_str());
            if self.test_encode(candidate).await {
                log::info!("  {}: test encode succeeded", candidate.backend.as_str());
                return Some(HardwareProfile {
                    backend: candidate.backend,
                    encoder: candidate.encoder.to_string(),
                    hwaccel: Some(candidate.hwaccel.to_string()),
                    hwaccel_device: candidate.device.map(str::to_string),
                    pixel_format: candidate.pixel_format.map(str::to_string),
                });
            }
            log::debug!("  {}: hardware/driver not available", candidate.backend.as_str());
        }

        None
    }

    /// Run a minimal one-second synthetic encode through the candidate's
    /// encoder. Exit status decides; any failure just advances the probe.
    async fn test_encode(&self, candidate: &Candidate) -> bool {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            "color=black:s=128x128:r=30:d=1".into(),
        ];

        match candidate.backend {
            HwBackend::Vaapi => {
                if let Some(device) = candidate.device {
                    args.push("-vaapi_device".into());
                    args.push(device.into());
                }
                args.push("-vf".into());
                args.push("format=nv12,hwupload".into());
            }
            // Other backends accept system-memory frames directly
            _ => {
                args.push("-vf".into());
                args.push("format=nv12".into());
            }
        }

        args.push("-c:v".into());
        args.push(candidate.encoder.into());
        args.push("-f".into());
        args.push("null".into());
        args.push("-".into());

        match Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(e) => {
                log::debug!("  {}: test encode failed to run: {e}", candidate.backend.as_str());
                false
            }
        }
    }

    /// Run FFmpeg with given args and return combined stdout+stderr
    /// (FFmpeg writes its listings to stdout but banners to stderr)
    async fn run_ffmpeg(&self, args: &[&str]) -> Option<String> {
        let output = Command::new(&self.ffmpeg_path)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .ok()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Some(format!("{stdout}{stderr}"))
    }
}

/// Resolve the ffmpeg binary: an explicit settings path wins when it exists,
/// otherwise fall back to PATH discovery. `None` means not installed.
pub fn resolve_ffmpeg_path(custom: Option<&str>) -> Option<std::path::PathBuf> {
    if let Some(path) = custom.filter(|p| !p.is_empty()) {
        let candidate = Path::new(path);
        if candidate.exists() {
            log::info!("Using custom FFmpeg path from settings: {path}");
            return Some(candidate.to_path_buf());
        }
        log::warn!("Configured FFmpeg path {path:?} does not exist, falling back to PATH");
    }
    which::which("ffmpeg").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fake_profile() -> HardwareProfile {
        HardwareProfile {
            backend: HwBackend::Vaapi,
            encoder: "h264_vaapi".to_string(),
            hwaccel: Some("vaapi".to_string()),
            hwaccel_device: Some("/dev/dri/renderD128".to_string()),
            pixel_format: Some("nv12".to_string()),
        }
    }

    #[tokio::test]
    async fn test_detect_with_missing_binary_is_software_only() {
        let detector = HwAccelDetector::new("/nonexistent/ffmpeg".to_string());
        assert!(!detector.encoder_installed());
        assert_eq!(detector.detect().await, None);
    }

    #[tokio::test]
    async fn test_preset_profile_is_returned_without_probing() {
        let detector =
            HwAccelDetector::with_profile("/nonexistent/ffmpeg".to_string(), Some(fake_profile()));
        assert_eq!(detector.detect().await, Some(fake_profile()));
    }

    #[tokio::test]
    async fn test_concurrent_callers_observe_one_result() {
        // The binary does not exist, so each probe attempt would resolve to
        // None; the point is that every concurrent caller gets the same
        // answer from a single initialization.
        let detector = Arc::new(HwAccelDetector::new("/nonexistent/ffmpeg".to_string()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let detector = detector.clone();
            handles.push(tokio::spawn(async move { detector.detect().await }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), None);
        }
    }
}
