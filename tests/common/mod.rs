#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use web_image_captioner::model::{CaptionModel, ModelError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Stands in for BLIP: describes the image by its size.
pub struct SizeModel;

impl CaptionModel for SizeModel {
    fn caption(&self, image: &RgbImage) -> Result<String, ModelError> {
        Ok(format!("a {}x{} picture", image.width(), image.height()))
    }
}

pub fn stub_model() -> Arc<dyn CaptionModel> {
    Arc::new(SizeModel)
}

/// An address nothing listens on: bound once, then released.
pub fn closed_addr() -> std::net::SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    encode(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        width,
        height,
        image::Rgba([200, 40, 40, 255]),
    )), ImageFormat::Png)
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    encode(DynamicImage::ImageRgb8(RgbImage::from_pixel(
        width,
        height,
        image::Rgb([40, 200, 40]),
    )), ImageFormat::Jpeg)
}

fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
    bytes
}

pub async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

pub fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!("<html><body>{body}</body></html>"),
        "text/html; charset=utf-8",
    )
}

pub fn image(bytes: Vec<u8>, mime: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(bytes, mime)
}

/// A page with three images where the middle one is missing upstream.
pub async fn gallery_with_one_broken_image() -> MockServer {
    let server = MockServer::start().await;
    mount(
        &server,
        "/gallery",
        html(r#"
            <img src="/img/first.png">
            <img data-src="/img/missing.jpg">
            <img src="/img/third.jpg">
            <img src="/img/logo.svg">
        "#),
    )
    .await;
    mount(&server, "/img/first.png", image(png(32, 24), "image/png")).await;
    mount(&server, "/img/missing.jpg", ResponseTemplate::new(404)).await;
    mount(&server, "/img/third.jpg", image(jpeg(16, 16), "image/jpeg")).await;
    server
}
