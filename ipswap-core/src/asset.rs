//! Asset loading: turns an image file of unknown encoding into an [`ImagePayload`]
//! the transformation service accepts.
//!
//! The format is decided by magic-number sniffing, never by the file extension.
//! PNG and JPEG pass through. WebP goes through an [`ImageConverter`]; when the host
//! has no converter the original bytes are sent labelled as PNG. Anything else is
//! sent as `application/octet-stream`.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::contract::{AssetError, ImageConverter, ImagePayload};

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = b"\xff\xd8\xff";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
    Gif,
    Unknown,
}

impl ImageKind {
    /// Classifies a buffer by its leading bytes.
    pub fn sniff(head: &[u8]) -> Self {
        if head.starts_with(JPEG_MAGIC) {
            ImageKind::Jpeg
        } else if head.starts_with(PNG_MAGIC) {
            ImageKind::Png
        } else if head.len() >= 12 && head.starts_with(b"RIFF") && &head[8..12] == b"WEBP" {
            ImageKind::Webp
        } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
            ImageKind::Gif
        } else {
            ImageKind::Unknown
        }
    }
}

/// Loads images into payloads, converting through the injected converter when needed.
#[derive(Clone)]
pub struct AssetLoader {
    converter: Arc<dyn ImageConverter>,
}

impl AssetLoader {
    pub fn new(converter: Arc<dyn ImageConverter>) -> Self {
        Self { converter }
    }

    /// A loader backed by whichever command-line converter is on `PATH`.
    pub fn with_system_converter() -> Self {
        Self::new(Arc::new(CommandConverter::discover()))
    }

    pub fn load(&self, path: &Path) -> Result<ImagePayload, AssetError> {
        let data = std::fs::read(path).map_err(|source| AssetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let kind = ImageKind::sniff(&data);
        debug!(path = %path.display(), ?kind, size = data.len(), "Sniffed image format");

        let payload = match kind {
            ImageKind::Png => ImagePayload::new("image/png", data),
            ImageKind::Jpeg => ImagePayload::new("image/jpeg", data),
            ImageKind::Webp => match self.converter.to_png(path)? {
                Some(png) => {
                    info!(path = %path.display(), size = png.len(), "Converted WebP input to PNG");
                    ImagePayload::new("image/png", png)
                }
                None => {
                    warn!(
                        path = %path.display(),
                        "No image converter available, sending WebP bytes labelled as PNG"
                    );
                    ImagePayload::new("image/png", data)
                }
            },
            ImageKind::Gif | ImageKind::Unknown => {
                ImagePayload::new("application/octet-stream", data)
            }
        };
        Ok(payload)
    }
}

/// Which external program performs the conversion, and how it is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterTool {
    /// macOS `sips -s format png <in> --out <out>`
    Sips,
    /// ImageMagick `magick <in> <out>`
    Magick,
}

impl ConverterTool {
    const CANDIDATES: [ConverterTool; 2] = [ConverterTool::Sips, ConverterTool::Magick];

    fn program(&self) -> &'static str {
        match self {
            ConverterTool::Sips => "sips",
            ConverterTool::Magick => "magick",
        }
    }

    fn command(&self, binary: &Path, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(binary);
        match self {
            ConverterTool::Sips => {
                cmd.args(["-s", "format", "png"]).arg(input).arg("--out").arg(output);
            }
            ConverterTool::Magick => {
                cmd.arg(input).arg(output);
            }
        }
        cmd
    }
}

/// Shells out to a platform conversion utility found on `PATH`.
///
/// Every conversion runs in its own temporary directory, removed when the call returns
/// whether or not the tool succeeded.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    tool: Option<(ConverterTool, PathBuf)>,
}

impl CommandConverter {
    pub fn discover() -> Self {
        let tool = ConverterTool::CANDIDATES
            .iter()
            .find_map(|tool| find_on_path(tool.program()).map(|bin| (*tool, bin)));
        match &tool {
            Some((t, bin)) => {
                info!(tool = t.program(), path = %bin.display(), "Found image converter")
            }
            None => warn!("No image converter (sips, magick) found on PATH"),
        }
        Self { tool }
    }

    /// A converter that reports no capability, forcing the degraded path.
    pub fn unavailable() -> Self {
        Self { tool: None }
    }
}

impl ImageConverter for CommandConverter {
    fn to_png(&self, source: &Path) -> Result<Option<Vec<u8>>, AssetError> {
        let Some((tool, binary)) = &self.tool else {
            return Ok(None);
        };
        let conversion_error = |detail: String| AssetError::Conversion {
            path: source.to_path_buf(),
            program: tool.program().to_string(),
            detail,
        };

        let workdir = tempfile::tempdir().map_err(|e| conversion_error(e.to_string()))?;
        let out = workdir.path().join("converted.png");

        let output = tool
            .command(binary, source, &out)
            .output()
            .map_err(|e| {
                error!(error = ?e, program = tool.program(), "Failed to launch image converter");
                conversion_error(e.to_string())
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(
                status = ?output.status,
                stderr = %stderr,
                "Image converter exited with non-zero code"
            );
            return Err(conversion_error(format!("{}: {}", output.status, stderr)));
        }

        let png = std::fs::read(&out).map_err(|e| conversion_error(e.to_string()))?;
        Ok(Some(png))
    }
}

fn find_on_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockImageConverter;
    use std::fs;
    use tempfile::tempdir;

    const PNG_BYTES: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
    const WEBP_BYTES: &[u8] = b"RIFF\x10\x00\x00\x00WEBPVP8 ";

    #[test]
    fn sniffs_by_magic_number() {
        assert_eq!(ImageKind::sniff(PNG_BYTES), ImageKind::Png);
        assert_eq!(ImageKind::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), ImageKind::Jpeg);
        assert_eq!(ImageKind::sniff(WEBP_BYTES), ImageKind::Webp);
        assert_eq!(ImageKind::sniff(b"GIF89a...."), ImageKind::Gif);
        assert_eq!(ImageKind::sniff(b"BM\x00\x00"), ImageKind::Unknown);
        assert_eq!(ImageKind::sniff(b""), ImageKind::Unknown);
        assert_eq!(ImageKind::sniff(b"RIFF1234"), ImageKind::Unknown);
    }

    #[test]
    fn png_bytes_named_jpg_are_still_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mislabelled.jpg");
        fs::write(&path, PNG_BYTES).unwrap();

        let mut converter = MockImageConverter::new();
        converter.expect_to_png().never();
        let loader = AssetLoader::new(Arc::new(converter));

        let payload = loader.load(&path).unwrap();
        assert_eq!(payload.mime(), "image/png");
        assert_eq!(payload.data(), PNG_BYTES);
    }

    #[test]
    fn webp_is_converted_when_a_converter_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.webp");
        fs::write(&path, WEBP_BYTES).unwrap();

        let mut converter = MockImageConverter::new();
        converter
            .expect_to_png()
            .times(1)
            .returning(|_| Ok(Some(PNG_BYTES.to_vec())));
        let loader = AssetLoader::new(Arc::new(converter));

        let payload = loader.load(&path).unwrap();
        assert_eq!(payload.mime(), "image/png");
        assert_eq!(payload.data(), PNG_BYTES);
    }

    #[test]
    fn webp_degrades_to_original_bytes_without_converter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.webp");
        fs::write(&path, WEBP_BYTES).unwrap();

        let loader = AssetLoader::new(Arc::new(CommandConverter::unavailable()));
        let payload = loader.load(&path).unwrap();
        assert_eq!(payload.mime(), "image/png");
        assert_eq!(payload.data(), WEBP_BYTES);
    }

    #[test]
    fn unknown_format_is_opaque() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.png");
        fs::write(&path, b"not really an image").unwrap();

        let loader = AssetLoader::new(Arc::new(CommandConverter::unavailable()));
        let payload = loader.load(&path).unwrap();
        assert_eq!(payload.mime(), "application/octet-stream");
    }

    #[test]
    fn failing_converter_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.webp");
        fs::write(&path, WEBP_BYTES).unwrap();

        let mut converter = MockImageConverter::new();
        converter.expect_to_png().returning(|p| {
            Err(AssetError::Conversion {
                path: p.to_path_buf(),
                program: "sips".into(),
                detail: "exit status: 1".into(),
            })
        });
        let loader = AssetLoader::new(Arc::new(converter));
        assert!(matches!(loader.load(&path), Err(AssetError::Conversion { .. })));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let loader = AssetLoader::new(Arc::new(CommandConverter::unavailable()));
        let err = loader.load(Path::new("/definitely/not/here.png")).unwrap_err();
        assert!(matches!(err, AssetError::Read { .. }));
    }
}
