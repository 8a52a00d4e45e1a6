//! FFmpeg argument building and executable resolution.

use std::path::{Path, PathBuf};

use v4w_models::{Encoding, VideoSettings};

use crate::error::{MediaError, MediaResult};

/// Name of the transcoder binary.
pub const TRANSCODER_BINARY: &str = "ffmpeg";

/// Builds the argument vector for one output encoding.
///
/// The destination path is not part of the result; the process runner
/// appends it as the final argument.
pub trait ArgumentBuilder: Send + Sync {
    fn build(&self, input: &Path, encoding: Encoding, settings: &VideoSettings) -> Vec<String>;
}

/// Builder for transcoder commands.
#[derive(Debug, Clone)]
pub struct TranscodeCommand {
    /// Input file path
    input: PathBuf,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl TranscodeCommand {
    /// Create a new command for `input`.
    pub fn new(input: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Drop all audio streams.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Scale to `width`, keeping the aspect ratio with an even height.
    pub fn scale_width(self, width: u32) -> Self {
        self.output_arg("-vf").output_arg(format!("scale={}:-2", width))
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-vcodec").output_arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments, without the destination.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        // Global flags
        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push("-loglevel".to_string());
        args.push(self.log_level.clone());

        // Input file
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        // Output args
        args.extend(self.output_args.clone());

        args
    }
}

/// Default argument builder mapping the preference set to FFmpeg flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegArgumentBuilder;

impl ArgumentBuilder for FfmpegArgumentBuilder {
    fn build(&self, input: &Path, encoding: Encoding, settings: &VideoSettings) -> Vec<String> {
        let mut cmd = TranscodeCommand::new(input);

        if settings.remove_audio {
            cmd = cmd.no_audio();
        }
        if let Some(width) = settings.scale_width.filter(|w| *w > 0) {
            cmd = cmd.scale_width(width);
        }

        let crf = settings.compression_level.crf(encoding);
        cmd = match encoding {
            Encoding::Mp4 => cmd.video_codec("libx264").crf(crf),
            Encoding::Webm => cmd
                .video_codec("libvpx-vp9")
                .crf(crf)
                .output_args(["-b:v", "0", "-deadline", "good", "-cpu-used", "5"]),
        };

        cmd.build_args()
    }
}

/// Resolves the transcoder executable for the host.
///
/// Lookup order: explicit path, `<resource_dir>/ffmpeg-<arch>`,
/// `<resource_dir>/ffmpeg`, then `ffmpeg` on `PATH`.
#[derive(Debug, Clone)]
pub struct TranscoderLocator {
    explicit_path: Option<PathBuf>,
    resource_dir: Option<PathBuf>,
    search_path: bool,
}

impl Default for TranscoderLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscoderLocator {
    pub fn new() -> Self {
        Self {
            explicit_path: None,
            resource_dir: None,
            search_path: true,
        }
    }

    /// Use this executable and nothing else.
    pub fn with_explicit_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_path = Some(path.into());
        self
    }

    /// Look for bundled binaries in `dir`.
    pub fn with_resource_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resource_dir = Some(dir.into());
        self
    }

    /// Do not fall back to `PATH`.
    pub fn without_path_search(mut self) -> Self {
        self.search_path = false;
        self
    }

    /// Resolve for the architecture this binary was built for.
    pub fn resolve(&self) -> MediaResult<PathBuf> {
        self.resolve_for_arch(std::env::consts::ARCH)
    }

    pub fn resolve_for_arch(&self, arch: &str) -> MediaResult<PathBuf> {
        if let Some(path) = &self.explicit_path {
            if path.is_file() {
                return Ok(path.clone());
            }
            return Err(MediaError::transcoder_not_found(format!(
                "configured path {} does not exist",
                path.display()
            )));
        }

        if let Some(dir) = &self.resource_dir {
            let candidates = [
                dir.join(format!("{}-{}", TRANSCODER_BINARY, arch)),
                dir.join(TRANSCODER_BINARY),
            ];
            if let Some(found) = candidates.into_iter().find(|c| c.is_file()) {
                return Ok(found);
            }
        }

        if self.search_path {
            return which::which(TRANSCODER_BINARY)
                .map_err(|_| MediaError::transcoder_not_found("ffmpeg not found in PATH"));
        }

        Err(MediaError::transcoder_not_found(format!(
            "no {} binary for {}",
            TRANSCODER_BINARY, arch
        )))
    }
}
