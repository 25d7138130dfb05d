use std::sync::Arc;
use std::time::Duration;

use image::{ColorType, RgbImage};
use once_cell::sync::Lazy;
use reqwest::{Client, ClientBuilder};
use url::Url;

use crate::model::{CaptionModel, ModelError};
use crate::scraper::USER_AGENT;

pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);

static CLIENT: Lazy<Client> = Lazy::new(|| {
    ClientBuilder::new()
        .user_agent(USER_AGENT)
        .timeout(DOWNLOAD_TIMEOUT)
        .pool_max_idle_per_host(10)
        .build()
        .expect("Failed to build HTTP client")
});

/// A downloaded image together with the caption the model produced for it.
#[derive(Debug, Clone)]
pub struct CaptionedImage {
    pub image: RgbImage,
    pub caption: String,
    pub source_url: Url,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptionError {
    #[error("invalid image URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("{0}")]
    Download(#[from] reqwest::Error),

    #[error("cannot identify image file: {0}")]
    Decode(#[from] image::ImageError),

    #[error("{0}")]
    Inference(#[from] ModelError),

    #[error("captioning worker stopped: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl CaptionError {
    /// Short machine-readable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            CaptionError::InvalidUrl(_) => "invalid_url",
            CaptionError::Download(_) => "download",
            CaptionError::Decode(_) => "decode",
            CaptionError::Inference(_) | CaptionError::Worker(_) => "inference",
        }
    }

    /// The text shown in place of a caption.
    pub fn user_message(&self) -> String {
        format!("Error: {}", self)
    }
}

/// Downloads `image_url`, decodes it to RGB and asks `model` to describe it.
pub async fn caption_image(
    model: &Arc<dyn CaptionModel>,
    image_url: &str,
) -> Result<CaptionedImage, CaptionError> {
    let source_url = Url::parse(image_url.trim())?;

    tracing::debug!(url = %source_url, "downloading image");
    let bytes = download(&source_url).await?;
    let image = decode_rgb(&bytes)?;

    let model = Arc::clone(model);
    let (caption, image) = tokio::task::spawn_blocking(move || {
        let caption = model.caption(&image);
        (caption, image)
    })
    .await?;
    let caption = caption?;
    tracing::debug!(url = %source_url, %caption, "caption generated");

    Ok(CaptionedImage {
        image,
        caption,
        source_url,
    })
}

async fn download(url: &Url) -> Result<Vec<u8>, reqwest::Error> {
    let response = CLIENT.get(url.as_str()).send().await?;
    tracing::debug!(%url, status = %response.status(), "image response");
    let bytes = response.error_for_status()?.bytes().await?;
    Ok(bytes.to_vec())
}

fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    tracing::debug!(
        width = decoded.width(),
        height = decoded.height(),
        color = ?decoded.color(),
        "image loaded"
    );
    if decoded.color() != ColorType::Rgb8 {
        tracing::debug!("converted to RGB");
    }
    Ok(decoded.into_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use image::{DynamicImage, ImageFormat, RgbaImage};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct SizeModel;

    impl CaptionModel for SizeModel {
        fn caption(&self, image: &RgbImage) -> Result<String, ModelError> {
            Ok(format!("a picture {}x{}", image.width(), image.height()))
        }
    }

    struct BrokenModel;

    impl CaptionModel for BrokenModel {
        fn caption(&self, _image: &RgbImage) -> Result<String, ModelError> {
            Err(ModelError::Tokenizer("vocabulary missing".into()))
        }
    }

    fn rgba_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 128]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    async fn serve(route: &str, response: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(response)
            .mount(&server)
            .await;
        server
    }

    fn model(model: impl CaptionModel + 'static) -> Arc<dyn CaptionModel> {
        Arc::new(model)
    }

    #[tokio::test]
    async fn captions_a_downloaded_image_at_its_own_size() {
        let server = serve("/cat.png", ResponseTemplate::new(200).set_body_bytes(rgba_png(64, 48))).await;
        let url = format!("{}/cat.png", server.uri());

        let captioned = caption_image(&model(SizeModel), &url).await.unwrap();

        assert_eq!(captioned.caption, "a picture 64x48");
        assert_eq!(captioned.image.dimensions(), (64, 48));
        assert_eq!(captioned.source_url.as_str(), url);
    }

    #[tokio::test]
    async fn missing_image_is_a_download_failure() {
        let server = serve("/cat.png", ResponseTemplate::new(404)).await;

        let err = caption_image(&model(SizeModel), &format!("{}/cat.png", server.uri()))
            .await
            .unwrap_err();

        assert_eq!(err.reason(), "download");
        assert!(err.user_message().starts_with("Error:"));
    }

    #[tokio::test]
    async fn refused_connection_is_a_download_failure() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();

        let err = caption_image(&model(SizeModel), &format!("http://{addr}/cat.png"))
            .await
            .unwrap_err();

        assert_eq!(err.reason(), "download");
        assert!(matches!(&err, CaptionError::Download(e) if e.is_connect()), "{err:?}");
        assert!(err.user_message().starts_with("Error: "));
    }

    #[tokio::test]
    async fn non_image_body_is_a_decode_failure() {
        let server = serve(
            "/cat.png",
            ResponseTemplate::new(200).set_body_string("<html>not an image</html>"),
        )
        .await;

        let err = caption_image(&model(SizeModel), &format!("{}/cat.png", server.uri()))
            .await
            .unwrap_err();

        assert_eq!(err.reason(), "decode");
    }

    #[tokio::test]
    async fn model_failure_is_an_inference_failure() {
        let server = serve("/cat.png", ResponseTemplate::new(200).set_body_bytes(rgba_png(4, 4))).await;

        let err = caption_image(&model(BrokenModel), &format!("{}/cat.png", server.uri()))
            .await
            .unwrap_err();

        assert_eq!(err.reason(), "inference");
        assert_eq!(err.user_message(), "Error: tokenizer error: vocabulary missing");
    }

    #[tokio::test]
    async fn malformed_url_never_hits_the_network() {
        let err = caption_image(&model(SizeModel), "::not-a-url.png").await.unwrap_err();
        assert_eq!(err.reason(), "invalid_url");
    }
}
