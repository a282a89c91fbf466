use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fluxgen_contracts::{GenerationMetadata, GenerationParams, OutputFormat, PARAMETERS_KEY};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use reqwest::blocking::Client as HttpClient;

use crate::config::EngineConfig;
use crate::error::GenerationError;
use crate::provider::{error_chain_text, ProviderOutput};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const MAX_NAME_ATTEMPTS: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBytes {
    pub status: u16,
    pub bytes: Vec<u8>,
}

/// Plain HTTP GET. Any status is returned; only transport failures error.
pub trait ImageFetcher: Send + Sync {
    fn get(&self, url: &str) -> Result<FetchedBytes>;
}

pub struct ReqwestFetcher {
    http: HttpClient,
}

impl ReqwestFetcher {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.http_timeout)
            .build()
            .context("failed to build download HTTP client")?;
        Ok(Self { http })
    }
}

impl ImageFetcher for ReqwestFetcher {
    fn get(&self, url: &str) -> Result<FetchedBytes> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("failed downloading image ({url})"))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .context("failed reading image bytes")?
            .to_vec();
        Ok(FetchedBytes { status, bytes })
    }
}

/// A saved image and the parameters embedded in it.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedArtifact {
    pub path: PathBuf,
    pub metadata: GenerationMetadata,
    /// The exact JSON text stored under the `parameters` key.
    pub metadata_json: String,
    pub content: Vec<u8>,
}

/// Encoded image bytes ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedImage {
    pub metadata: GenerationMetadata,
    pub metadata_json: String,
    pub format: OutputFormat,
    pub content: Vec<u8>,
}

pub struct ArtifactFinalizer {
    output_dir: PathBuf,
    fetcher: Box<dyn ImageFetcher>,
}

impl ArtifactFinalizer {
    pub fn new(output_dir: impl Into<PathBuf>, fetcher: impl ImageFetcher + 'static) -> Self {
        Self {
            output_dir: output_dir.into(),
            fetcher: Box::new(fetcher),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn finalize(
        &self,
        output: &ProviderOutput,
        params: &GenerationParams,
    ) -> Result<GeneratedArtifact, GenerationError> {
        let bytes = self.download(output)?;
        let rendered = render_artifact(&bytes, params)?;
        self.persist(rendered)
    }

    pub fn download(&self, output: &ProviderOutput) -> Result<Vec<u8>, GenerationError> {
        let url = output
            .primary_url()
            .ok_or(GenerationError::ProviderEmptyOutput)?;
        let fetched = self
            .fetcher
            .get(url)
            .map_err(|err| GenerationError::Download(error_chain_text(&err, 512)))?;
        if !(200..300).contains(&fetched.status) {
            return Err(GenerationError::Download(format!(
                "Failed to download the image. Status code: {}",
                fetched.status
            )));
        }
        tracing::debug!(bytes = fetched.bytes.len(), "downloaded image");
        Ok(fetched.bytes)
    }

    pub fn persist(&self, rendered: RenderedImage) -> Result<GeneratedArtifact, GenerationError> {
        let stamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        self.persist_at(&stamp, rendered)
    }

    /// Writes `image_<stamp>.<ext>` under the output directory.
    ///
    /// Two artifacts finishing within the same second share a stamp; the
    /// later one gets a `_2`, `_3`, ... suffix instead of overwriting.
    pub fn persist_at(
        &self,
        stamp: &str,
        rendered: RenderedImage,
    ) -> Result<GeneratedArtifact, GenerationError> {
        fs::create_dir_all(&self.output_dir).map_err(|err| {
            GenerationError::Unknown(format!(
                "failed to create {}: {err}",
                self.output_dir.display()
            ))
        })?;
        let ext = rendered.format.extension();
        let (path, mut file) = create_unique(&self.output_dir, stamp, ext)
            .map_err(|err| GenerationError::Unknown(error_chain_text(&err, 512)))?;
        file.write_all(&rendered.content)
            .and_then(|_| file.flush())
            .map_err(|err| {
                GenerationError::Unknown(format!("failed to write {}: {err}", path.display()))
            })?;

        Ok(GeneratedArtifact {
            path,
            metadata: rendered.metadata,
            metadata_json: rendered.metadata_json,
            content: rendered.content,
        })
    }
}

/// Decodes the downloaded image and re-encodes it for the requested format,
/// embedding the generation parameters where the format allows.
pub fn render_artifact(
    bytes: &[u8],
    params: &GenerationParams,
) -> Result<RenderedImage, GenerationError> {
    let metadata = GenerationMetadata::from(params);
    let metadata_json = metadata
        .to_json()
        .map_err(|err| GenerationError::MetadataEmbed(err.to_string()))?;
    let image = image::load_from_memory(bytes)
        .map_err(|err| GenerationError::MetadataEmbed(format!("cannot decode image: {err}")))?;

    let content = if params.output_format.embeds_png_metadata() {
        let source_is_png = matches!(image::guess_format(bytes), Ok(ImageFormat::Png));
        let image = png_compatible(image, source_is_png);
        encode_png_with_text(&image, PARAMETERS_KEY, &metadata_json)
            .map_err(|err| GenerationError::MetadataEmbed(error_chain_text(&err, 512)))?
    } else {
        encode_jpeg(&image, params.output_quality)
            .map_err(|err| GenerationError::MetadataEmbed(error_chain_text(&err, 512)))?
    };

    Ok(RenderedImage {
        metadata,
        metadata_json,
        format: params.output_format,
        content,
    })
}

/// Reads the `parameters` chunk back from a saved PNG. Returns `None` for
/// files that are not PNG or carry no such chunk.
pub fn read_embedded_metadata(path: &Path) -> Result<Option<GenerationMetadata>> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    read_metadata_from_bytes(&bytes)
}

pub fn read_metadata_from_bytes(bytes: &[u8]) -> Result<Option<GenerationMetadata>> {
    if !matches!(image::guess_format(bytes), Ok(ImageFormat::Png)) {
        return Ok(None);
    }
    let reader = png::Decoder::new(Cursor::new(bytes))
        .read_info()
        .context("failed reading PNG header")?;
    let info = reader.info();

    let mut text = info
        .uncompressed_latin1_text
        .iter()
        .find(|chunk| chunk.keyword == PARAMETERS_KEY)
        .map(|chunk| chunk.text.clone());
    if text.is_none() {
        if let Some(chunk) = info
            .compressed_latin1_text
            .iter()
            .find(|chunk| chunk.keyword == PARAMETERS_KEY)
        {
            text = Some(chunk.get_text().context("failed inflating zTXt chunk")?);
        }
    }
    if text.is_none() {
        if let Some(chunk) = info
            .utf8_text
            .iter()
            .find(|chunk| chunk.keyword == PARAMETERS_KEY)
        {
            text = Some(chunk.get_text().context("failed reading iTXt chunk")?);
        }
    }

    match text {
        Some(raw) => Ok(Some(
            GenerationMetadata::from_json(&raw).context("invalid parameters metadata")?,
        )),
        None => Ok(None),
    }
}

/// 8-bit grey, grey+alpha, RGB and RGBA PNGs keep their layout; everything
/// else becomes RGBA8.
fn png_compatible(image: DynamicImage, source_is_png: bool) -> DynamicImage {
    if !source_is_png {
        return DynamicImage::ImageRgba8(image.to_rgba8());
    }
    match image {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => image,
        other => DynamicImage::ImageRgba8(other.to_rgba8()),
    }
}

fn encode_png_with_text(image: &DynamicImage, keyword: &str, text: &str) -> Result<Vec<u8>> {
    let color = match image {
        DynamicImage::ImageLuma8(_) => png::ColorType::Grayscale,
        DynamicImage::ImageLumaA8(_) => png::ColorType::GrayscaleAlpha,
        DynamicImage::ImageRgb8(_) => png::ColorType::Rgb,
        _ => png::ColorType::Rgba,
    };
    let rgba;
    let data = if color == png::ColorType::Rgba {
        rgba = image.to_rgba8();
        rgba.as_raw().as_slice()
    } else {
        image.as_bytes()
    };

    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, image.width(), image.height());
        encoder.set_color(color);
        encoder.set_depth(png::BitDepth::Eight);
        if is_latin1(text) {
            encoder
                .add_text_chunk(keyword.to_string(), text.to_string())
                .context("failed adding tEXt chunk")?;
        } else {
            encoder
                .add_itxt_chunk(keyword.to_string(), text.to_string())
                .context("failed adding iTXt chunk")?;
        }
        let mut writer = encoder.write_header().context("failed writing PNG header")?;
        writer
            .write_image_data(data)
            .context("failed writing PNG image data")?;
        writer.finish().context("failed finishing PNG stream")?;
    }
    Ok(out)
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
    encoder
        .encode_image(&DynamicImage::ImageRgb8(rgb))
        .context("failed encoding JPEG")?;
    Ok(bytes)
}

fn is_latin1(text: &str) -> bool {
    text.chars().all(|ch| u32::from(ch) <= 0xFF)
}

fn create_unique(dir: &Path, stamp: &str, ext: &str) -> Result<(PathBuf, File)> {
    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let name = if attempt == 1 {
            format!("image_{stamp}.{ext}")
        } else {
            format!("image_{stamp}_{attempt}.{ext}")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("failed to create {}", path.display()))
            }
        }
    }
    anyhow::bail!(
        "no free file name for image_{stamp}.{ext} after {MAX_NAME_ATTEMPTS} attempts"
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use anyhow::anyhow;
    use fluxgen_contracts::{AspectRatio, GenerationParams, OutputFormat};
    use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgba, RgbaImage};

    use super::{
        read_embedded_metadata, read_metadata_from_bytes, render_artifact, ArtifactFinalizer,
        FetchedBytes, ImageFetcher,
    };
    use crate::error::GenerationError;
    use crate::provider::ProviderOutput;

    pub(crate) const IMAGE_URL: &str = "https://replicate.delivery/pbxt/out-0.png";

    /// Serves canned responses by URL and counts requests.
    #[derive(Clone, Default)]
    pub(crate) struct StaticFetcher {
        responses: HashMap<String, (u16, Vec<u8>)>,
        pub(crate) calls: Arc<AtomicUsize>,
    }

    impl StaticFetcher {
        pub(crate) fn serving(url: &str, status: u16, bytes: Vec<u8>) -> Self {
            let mut fetcher = Self::default();
            fetcher.responses.insert(url.to_string(), (status, bytes));
            fetcher
        }
    }

    impl ImageFetcher for StaticFetcher {
        fn get(&self, url: &str) -> anyhow::Result<FetchedBytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (status, bytes) = self
                .responses
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow!("connection refused ({url})"))?;
            Ok(FetchedBytes { status, bytes })
        }
    }

    pub(crate) fn encoded(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        image
            .write_to(&mut cursor, format)
            .unwrap_or_else(|err| panic!("failed to encode test image: {err}"));
        cursor.into_inner()
    }

    pub(crate) fn sample_png() -> Vec<u8> {
        let image = RgbaImage::from_pixel(24, 16, Rgba([200, 40, 90, 128]));
        encoded(DynamicImage::ImageRgba8(image), ImageFormat::Png)
    }

    fn params(format: OutputFormat) -> GenerationParams {
        GenerationParams {
            prompt: "a paper boat on a puddle".to_string(),
            model: "black-forest-labs/flux-1.1-pro".to_string(),
            seed: 42,
            steps: 25,
            guidance: 3.0,
            aspect_ratio: AspectRatio::Square,
            width: 1024,
            height: 1024,
            safety_tolerance: 2,
            interval: 2.0,
            raw: false,
            output_format: format,
            output_quality: 80,
            prompt_upsampling: false,
        }
    }

    fn finalizer(dir: &std::path::Path, fetcher: StaticFetcher) -> ArtifactFinalizer {
        ArtifactFinalizer::new(dir.join("generated_images"), fetcher)
    }

    #[test]
    fn png_artifact_round_trips_its_metadata() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let finalizer = finalizer(
            temp.path(),
            StaticFetcher::serving(IMAGE_URL, 200, sample_png()),
        );
        let params = params(OutputFormat::Png);
        let artifact =
            finalizer.finalize(&ProviderOutput::Url(IMAGE_URL.to_string()), &params)?;

        assert!(artifact.path.starts_with(finalizer.output_dir()));
        let name = artifact
            .path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or_default()
            .to_string();
        assert!(name.starts_with("image_") && name.ends_with(".png"), "{name}");
        assert_eq!(name.len(), "image_20240101_120000.png".len());

        let restored = read_embedded_metadata(&artifact.path)?;
        assert_eq!(restored.as_ref(), Some(&artifact.metadata));
        let raw: serde_json::Value = serde_json::from_str(&artifact.metadata_json)?;
        assert_eq!(raw["model"], "black-forest-labs/flux-1.1-pro");
        assert_eq!(raw["seed"], 42);
        assert_eq!(std::fs::read(&artifact.path)?, artifact.content);
        Ok(())
    }

    #[test]
    fn webp_request_writes_png_stream_with_metadata() -> anyhow::Result<()> {
        let rendered = render_artifact(&sample_png(), &params(OutputFormat::Webp))?;
        assert!(matches!(
            image::guess_format(&rendered.content),
            Ok(ImageFormat::Png)
        ));
        assert!(read_metadata_from_bytes(&rendered.content)?.is_some());
        Ok(())
    }

    #[test]
    fn jpg_request_drops_alpha_and_has_no_text_chunk() -> anyhow::Result<()> {
        let rendered = render_artifact(&sample_png(), &params(OutputFormat::Jpg))?;
        assert_eq!(&rendered.content[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&rendered.content)?;
        assert!(!decoded.color().has_alpha());
        assert_eq!(read_metadata_from_bytes(&rendered.content)?, None);
        Ok(())
    }

    #[test]
    fn grayscale_png_keeps_its_color_type() -> anyhow::Result<()> {
        let gray = GrayImage::from_pixel(8, 8, Luma([77]));
        let bytes = encoded(DynamicImage::ImageLuma8(gray), ImageFormat::Png);
        let rendered = render_artifact(&bytes, &params(OutputFormat::Png))?;
        let decoded = image::load_from_memory(&rendered.content)?;
        assert_eq!(decoded.color(), image::ColorType::L8);
        Ok(())
    }

    #[test]
    fn non_png_source_is_converted_to_rgba() -> anyhow::Result<()> {
        let rgb = image::RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30]));
        let bytes = encoded(DynamicImage::ImageRgb8(rgb), ImageFormat::Jpeg);
        let rendered = render_artifact(&bytes, &params(OutputFormat::Png))?;
        let decoded = image::load_from_memory(&rendered.content)?;
        assert_eq!(decoded.color(), image::ColorType::Rgba8);
        Ok(())
    }

    #[test]
    fn non_latin1_prompt_is_stored_as_itxt() -> anyhow::Result<()> {
        let mut params = params(OutputFormat::Png);
        params.prompt = "夕焼けの富士山 🌄".to_string();
        let rendered = render_artifact(&sample_png(), &params)?;
        let restored = read_metadata_from_bytes(&rendered.content)?;
        assert_eq!(
            restored.map(|metadata| metadata.prompt),
            Some("夕焼けの富士山 🌄".to_string())
        );
        Ok(())
    }

    #[test]
    fn error_status_is_a_download_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let finalizer = finalizer(temp.path(), StaticFetcher::serving(IMAGE_URL, 404, Vec::new()));
        let err = finalizer
            .finalize(
                &ProviderOutput::Url(IMAGE_URL.to_string()),
                &params(OutputFormat::Png),
            )
            .err();
        match err {
            Some(GenerationError::Download(message)) => {
                assert_eq!(message, "Failed to download the image. Status code: 404")
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!finalizer.output_dir().exists());
        Ok(())
    }

    #[test]
    fn transport_failure_is_a_download_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let finalizer = finalizer(temp.path(), StaticFetcher::default());
        let err = finalizer
            .download(&ProviderOutput::Url("https://unreachable.test/x.png".to_string()))
            .err();
        match err {
            Some(GenerationError::Download(message)) => {
                assert!(message.contains("connection refused"), "{message}")
            }
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn undecodable_bytes_are_a_metadata_error() {
        let err = render_artifact(b"<html>not an image</html>", &params(OutputFormat::Png)).err();
        assert!(matches!(err, Some(GenerationError::MetadataEmbed(_))));
    }

    #[test]
    fn same_second_artifacts_get_distinct_names() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let finalizer = finalizer(temp.path(), StaticFetcher::default());
        let rendered = render_artifact(&sample_png(), &params(OutputFormat::Png))?;

        let first = finalizer.persist_at("20240101_120000", rendered.clone())?;
        let second = finalizer.persist_at("20240101_120000", rendered)?;
        assert_eq!(
            first.path.file_name().and_then(|name| name.to_str()),
            Some("image_20240101_120000.png")
        );
        assert_eq!(
            second.path.file_name().and_then(|name| name.to_str()),
            Some("image_20240101_120000_2.png")
        );
        assert_eq!(std::fs::read(&first.path)?, first.content);
        Ok(())
    }
}
