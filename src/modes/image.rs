//! Image generation, editing and analysis.

use crate::audio::codec::{decode_base64, encode_base64};
use crate::config::YukiConfig;
use crate::error::{Result, YukiError};
use crate::modes::client::{
    GenerateContentRequest, GenerationConfig, GenerativeClient, ImageConfig, Part,
};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Fixed instruction sent with every analysis request.
pub const ANALYZE_PROMPT: &str =
    "Analyze this image in detail. What do you see? If it's anime-related, identify the style or characters.";

/// Reply used when analysis returns no text.
pub const EMPTY_ANALYSIS: &str = "I see many wonderful things, but my processing missed the details.";

/// Output resolution for generated images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageSize {
    #[default]
    OneK,
    TwoK,
    FourK,
}

impl ImageSize {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneK => "1K",
            Self::TwoK => "2K",
            Self::FourK => "4K",
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageSize {
    type Err = YukiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "1K" => Ok(Self::OneK),
            "2K" => Ok(Self::TwoK),
            "4K" => Ok(Self::FourK),
            other => Err(YukiError::Config(format!(
                "unknown image size '{other}' (expected 1K, 2K or 4K)"
            ))),
        }
    }
}

/// An image supplied by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl ImageInput {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }

    /// Read an image file, inferring its MIME type from the extension.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or
    /// [`YukiError::Config`] for an unsupported extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let mime_type = match ext.as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "webp" => "image/webp",
            "gif" => "image/gif",
            "heic" => "image/heic",
            "heif" => "image/heif",
            _ => {
                return Err(YukiError::Config(format!(
                    "unsupported image type: {}",
                    path.display()
                )));
            }
        };
        Ok(Self::new(std::fs::read(path)?, mime_type))
    }

    fn to_part(&self) -> Part {
        Part::inline(&self.mime_type, encode_base64(&self.data))
    }
}

/// An image returned by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResult {
    /// Base64 image payload.
    pub data: String,
    pub mime_type: String,
    /// The prompt that produced it.
    pub prompt: String,
}

impl ImageResult {
    /// `data:` URL suitable for embedding.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Decoded image bytes.
    ///
    /// # Errors
    ///
    /// Returns [`YukiError::Decode`] if the payload is not valid base64.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        decode_base64(&self.data)
    }

    /// Write the decoded image to `path`.
    ///
    /// # Errors
    ///
    /// Returns a decode or I/O error.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.bytes()?)?;
        Ok(())
    }
}

/// Image generation, editing and analysis requests.
#[derive(Debug, Clone)]
pub struct ImageMode {
    client: GenerativeClient,
    image_model: String,
    edit_model: String,
    analyze_model: String,
    analyze_instruction: String,
}

impl ImageMode {
    pub fn new(client: GenerativeClient, config: &YukiConfig) -> Self {
        Self {
            client,
            image_model: config.backend.image_model.clone(),
            edit_model: config.backend.edit_model.clone(),
            analyze_model: config.backend.analyze_model.clone(),
            analyze_instruction: config.persona.analyze_instruction.clone(),
        }
    }

    /// Generate a square image from `prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`YukiError::Backend`] when the response carries no image.
    pub async fn generate(&self, prompt: &str, size: ImageSize) -> Result<ImageResult> {
        let mut request = GenerateContentRequest::user(vec![Part::text(prompt)]);
        request.generation_config = Some(GenerationConfig {
            image_config: Some(ImageConfig {
                aspect_ratio: "1:1".to_owned(),
                image_size: size.as_str().to_owned(),
            }),
            ..GenerationConfig::default()
        });

        let response = self.client.generate_content(&self.image_model, &request).await?;
        let image = response.first_inline_data().ok_or_else(|| {
            YukiError::Backend("No image was generated. Please try a different prompt.".into())
        })?;
        info!(%size, "image generated");
        Ok(ImageResult {
            data: image.data.clone(),
            mime_type: mime_or_png(&image.mime_type),
            prompt: prompt.to_owned(),
        })
    }

    /// Apply the instruction in `prompt` to `image`.
    ///
    /// # Errors
    ///
    /// Returns [`YukiError::Backend`] when the response carries no image.
    pub async fn edit(&self, image: &ImageInput, prompt: &str) -> Result<ImageResult> {
        let request = GenerateContentRequest::user(vec![image.to_part(), Part::text(prompt)]);
        let response = self.client.generate_content(&self.edit_model, &request).await?;
        let edited = response
            .first_inline_data()
            .ok_or_else(|| YukiError::Backend("no edited image was returned".into()))?;
        info!("image edited");
        Ok(ImageResult {
            data: edited.data.clone(),
            mime_type: mime_or_png(&edited.mime_type),
            prompt: prompt.to_owned(),
        })
    }

    /// Describe `image`.
    ///
    /// # Errors
    ///
    /// Returns the backend or credential error of the request.
    pub async fn analyze(&self, image: &ImageInput) -> Result<String> {
        let request = GenerateContentRequest::user(vec![image.to_part(), Part::text(ANALYZE_PROMPT)])
            .with_system_instruction(&self.analyze_instruction);
        let response = self.client.generate_content(&self.analyze_model, &request).await?;
        Ok(response.text().unwrap_or_else(|| EMPTY_ANALYSIS.to_owned()))
    }
}

fn mime_or_png(mime_type: &str) -> String {
    if mime_type.is_empty() {
        "image/png".to_owned()
    } else {
        mime_type.to_owned()
    }
}
