//! Command builder: structured options to an engine argument list.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Thread ceiling passed to every invocation. Fixed rather than derived from
/// the host's core count to bound per-worker resource usage.
pub const THREAD_CAP: u32 = 8;

/// Largest single allocation the engine may make (1 GiB).
pub const MAX_ALLOC_BYTES: u64 = 1 << 30;

/// Output presets recognised by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputPreset {
    /// VP8 video with Vorbis audio.
    Mp4,
    /// VP9 video with Opus audio.
    Webm,
    /// LAME MP3 at 192 kbit/s.
    Mp3,
    /// Opus at 128 kbit/s.
    Opus,
    /// Copy all streams without re-encoding.
    StreamCopy,
}

impl OutputPreset {
    /// Resolve a format name. Names match exactly; unknown, differently
    /// cased or missing names map to stream copy.
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some("mp4") => OutputPreset::Mp4,
            Some("webm") => OutputPreset::Webm,
            Some("mp3") => OutputPreset::Mp3,
            Some("opus") => OutputPreset::Opus,
            _ => OutputPreset::StreamCopy,
        }
    }

    /// Codec arguments for this preset.
    pub fn codec_args(&self) -> &'static [&'static str] {
        match self {
            OutputPreset::Mp4 => &["-c:v", "libvpx", "-c:a", "libvorbis"],
            OutputPreset::Webm => &["-c:v", "libvpx-vp9", "-c:a", "libopus"],
            OutputPreset::Mp3 => &["-c:a", "libmp3lame", "-b:a", "192k"],
            OutputPreset::Opus => &["-c:a", "libopus", "-b:a", "128k"],
            OutputPreset::StreamCopy => &["-c", "copy"],
        }
    }
}

impl fmt::Display for OutputPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputPreset::Mp4 => "mp4",
            OutputPreset::Webm => "webm",
            OutputPreset::Mp3 => "mp3",
            OutputPreset::Opus => "opus",
            OutputPreset::StreamCopy => "copy",
        };
        f.write_str(name)
    }
}

/// Caller options for one processing call.
///
/// Values are passed through to the engine unchecked; numbers are accepted
/// wherever a string is expected. Empty strings and a numeric zero count as
/// unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessOptions {
    /// Preset name selecting the codec arguments.
    #[serde(deserialize_with = "string_or_number")]
    pub format: Option<String>,
    /// Video bitrate, e.g. `1000k`.
    #[serde(deserialize_with = "string_or_number")]
    pub video_bitrate: Option<String>,
    /// Audio bitrate, e.g. `128k`.
    #[serde(deserialize_with = "string_or_number")]
    pub audio_bitrate: Option<String>,
    /// Frame size, e.g. `1280x720`.
    #[serde(deserialize_with = "string_or_number")]
    pub resolution: Option<String>,
    /// Frame rate.
    #[serde(deserialize_with = "string_or_number")]
    pub fps: Option<String>,
}

impl ProcessOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the preset name.
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Set the video bitrate.
    pub fn with_video_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.video_bitrate = Some(bitrate.into());
        self
    }

    /// Set the audio bitrate.
    pub fn with_audio_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.audio_bitrate = Some(bitrate.into());
        self
    }

    /// Set the frame size.
    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    /// Set the frame rate.
    pub fn with_fps(mut self, fps: impl Into<String>) -> Self {
        self.fps = Some(fps.into());
        self
    }

    /// Preset selected by [`format`](Self::format).
    pub fn preset(&self) -> OutputPreset {
        OutputPreset::from_name(self.format.as_deref())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Integer(i64),
        Float(f64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => None,
        Some(Raw::Text(s)) if s.is_empty() => None,
        Some(Raw::Text(s)) => Some(s),
        Some(Raw::Integer(0)) => None,
        Some(Raw::Integer(n)) => Some(n.to_string()),
        Some(Raw::Float(n)) if n == 0.0 || n.is_nan() => None,
        Some(Raw::Float(n)) => Some(n.to_string()),
    })
}

/// Builds engine argument lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandBuilder;

impl CommandBuilder {
    /// Create a builder.
    pub fn new() -> Self {
        Self
    }

    /// Build the argument list for one conversion. The output path is always
    /// the last argument.
    pub fn build(&self, input_path: &str, output_path: &str, options: &ProcessOptions) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-i".into(),
            input_path.into(),
            "-threads".into(),
            THREAD_CAP.to_string(),
            "-max_alloc".into(),
            MAX_ALLOC_BYTES.to_string(),
        ];

        args.extend(options.preset().codec_args().iter().map(|s| s.to_string()));

        let overrides = [
            ("-b:v", &options.video_bitrate),
            ("-b:a", &options.audio_bitrate),
            ("-s", &options.resolution),
            ("-r", &options.fps),
        ];
        for (flag, value) in overrides {
            if let Some(value) = value {
                args.push(flag.to_string());
                args.push(value.clone());
            }
        }

        args.push(output_path.into());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(options: &ProcessOptions) -> Vec<String> {
        CommandBuilder::new().build("/temp/input-1", "/temp/output-2.webm", options)
    }

    fn contains_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_prefix_is_fixed() {
        let args = build(&ProcessOptions::new());
        assert_eq!(
            &args[..6],
            &["-i", "/temp/input-1", "-threads", "8", "-max_alloc", "1073741824"]
        );
    }

    #[test]
    fn test_known_presets() {
        let cases = [
            ("mp4", vec![("-c:v", "libvpx"), ("-c:a", "libvorbis")]),
            ("webm", vec![("-c:v", "libvpx-vp9"), ("-c:a", "libopus")]),
            ("mp3", vec![("-c:a", "libmp3lame"), ("-b:a", "192k")]),
            ("opus", vec![("-c:a", "libopus"), ("-b:a", "128k")]),
        ];

        for (format, pairs) in cases {
            let args = build(&ProcessOptions::new().with_format(format));
            assert_eq!(args.last().unwrap(), "/temp/output-2.webm", "format {format}");
            for (flag, value) in pairs {
                assert!(contains_pair(&args, flag, value), "{format}: missing {flag} {value}");
            }
            assert!(!contains_pair(&args, "-c", "copy"));
        }
    }

    #[test]
    fn test_unknown_format_copies_streams() {
        for options in [ProcessOptions::new().with_format("avi"), ProcessOptions::new()] {
            let args = build(&options);
            assert!(contains_pair(&args, "-c", "copy"));
            assert!(!args.iter().any(|a| a == "-c:v" || a == "-c:a"));
            assert_eq!(args.last().unwrap(), "/temp/output-2.webm");
        }
    }

    #[test]
    fn test_format_name_matches_exactly() {
        assert_eq!(OutputPreset::from_name(Some("webm")), OutputPreset::Webm);
        assert_eq!(OutputPreset::from_name(Some("WebM")), OutputPreset::StreamCopy);
        assert_eq!(OutputPreset::from_name(Some(" mp3 ")), OutputPreset::StreamCopy);

        let args = build(&ProcessOptions::new().with_format("WebM"));
        assert!(contains_pair(&args, "-c", "copy"));
    }

    #[test]
    fn test_overrides_appended_in_order() {
        let options = ProcessOptions::new()
            .with_format("webm")
            .with_video_bitrate("1000k")
            .with_audio_bitrate("128k")
            .with_resolution("1280x720")
            .with_fps("30");
        let args = build(&options);

        assert_eq!(
            &args[args.len() - 9..],
            &[
                "-b:v", "1000k", "-b:a", "128k", "-s", "1280x720", "-r", "30",
                "/temp/output-2.webm"
            ]
        );
    }

    #[test]
    fn test_values_are_not_validated() {
        let args = build(&ProcessOptions::new().with_resolution("banana"));
        assert!(contains_pair(&args, "-s", "banana"));
    }

    #[test]
    fn test_options_accept_numbers() {
        let options: ProcessOptions = serde_json::from_str(
            r#"{"format":"webm","videoBitrate":"1000k","fps":30,"audioBitrate":null}"#,
        )
        .unwrap();
        assert_eq!(options.fps.as_deref(), Some("30"));
        assert_eq!(options.video_bitrate.as_deref(), Some("1000k"));
        assert_eq!(options.audio_bitrate, None);
        assert_eq!(options.resolution, None);
        assert_eq!(options.preset(), OutputPreset::Webm);
    }

    #[test]
    fn test_zero_numbers_are_unset() {
        let options: ProcessOptions =
            serde_json::from_str(r#"{"fps":0,"videoBitrate":0,"audioBitrate":0.0,"resolution":""}"#)
                .unwrap();
        assert_eq!(options, ProcessOptions::new());

        let args = build(&options);
        assert!(!args.iter().any(|a| a == "-r" || a == "-b:v" || a == "-b:a" || a == "-s"));
    }
}
