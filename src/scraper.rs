use reqwest::{Client, ClientBuilder};
use scraper::{ElementRef, Html, Selector};
use once_cell::sync::Lazy;
use url::Url;
use crate::error::Result;

/// Browser-like agent; several image hosts reject unknown clients.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

pub const MAX_CANDIDATES: usize = 10;

const IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp", ".tiff", ".tif",
];

// Lazy-loading attributes, checked in order after `src`.
const SOURCE_ATTRIBUTES: &[&str] = &["src", "data-src", "data-original"];

// Page fetches carry no timeout; only image downloads are bounded.
static CLIENT: Lazy<Client> = Lazy::new(|| {
    ClientBuilder::new()
        .user_agent(USER_AGENT)
        .pool_max_idle_per_host(10)
        .build()
        .expect("Failed to build HTTP client")
});

static IMG_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("img").expect("Failed to parse img selector")
});

/// True when `input` names an image file directly, judged by its extension alone.
pub fn is_image_url(input: &str) -> bool {
    let lowered = input.trim().to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext))
}

pub async fn fetch_html(url: &Url) -> Result<String> {
    let response = CLIENT.get(url.as_str()).send().await?;
    tracing::debug!(%url, status = %response.status(), "fetched page");
    let html = response.text().await?;
    Ok(html)
}

/// Fetches `page_url` and returns the first [`MAX_CANDIDATES`] raster image URLs on it.
pub async fn discover_images(page_url: &str) -> Result<Vec<Url>> {
    let base = Url::parse(page_url.trim())?;
    let html = fetch_html(&base).await?;
    Ok(extract_image_urls(&html, &base))
}

/// Collects `<img>` sources in document order, resolved against `base`.
///
/// SVGs and inline `data:` URIs are skipped, and the result is capped at
/// [`MAX_CANDIDATES`].
pub fn extract_image_urls(html: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);

    let found: Vec<Url> = document
        .select(&IMG_SELECTOR)
        .filter_map(image_source)
        .filter(|src| !is_inline_data(src))
        .filter_map(|src| base.join(src).ok())
        .filter(|url| !is_vector_graphic(url))
        .collect();

    tracing::info!(count = found.len(), page = %base, "found images");

    found.into_iter().take(MAX_CANDIDATES).collect()
}

fn image_source(element: ElementRef<'_>) -> Option<&str> {
    let img = element.value();
    SOURCE_ATTRIBUTES
        .iter()
        .filter_map(|attr| img.attr(attr))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

fn is_inline_data(src: &str) -> bool {
    src.get(..5).is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
}

fn is_vector_graphic(url: &Url) -> bool {
    url.path().to_ascii_lowercase().ends_with(".svg")
}
