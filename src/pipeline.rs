use std::sync::Arc;

use serde::Serialize;

use crate::captioner::caption_image;
use crate::model::CaptionModel;
use crate::scraper::{discover_images, is_image_url};
use crate::session::Session;

pub const NO_IMAGES_MESSAGE: &str = "No valid images found on this website. Try a news site or blog.";

/// What the viewer should display after an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewState {
    pub caption: String,
    pub status: String,
    pub show_image: bool,
    pub show_navigation: bool,
}

impl ViewState {
    fn message(caption: impl Into<String>) -> Self {
        Self {
            caption: caption.into(),
            status: String::new(),
            show_image: false,
            show_navigation: false,
        }
    }

    fn viewing(session: &Session) -> Self {
        match session.current() {
            Some(entry) => Self {
                caption: entry.caption.clone(),
                status: session.status().unwrap_or_default(),
                show_image: true,
                show_navigation: session.len() > 1,
            },
            None => Self::message(String::new()),
        }
    }
}

/// A fresh session and the view that goes with it.
#[derive(Debug)]
pub struct Outcome {
    pub session: Session,
    pub view: ViewState,
}

impl Outcome {
    fn message(caption: impl Into<String>) -> Self {
        Self {
            session: Session::default(),
            view: ViewState::message(caption),
        }
    }

    fn viewing(session: Session) -> Self {
        let view = ViewState::viewing(&session);
        Self { session, view }
    }
}

/// Captions whatever `input` points at: one image, or the images on a page.
///
/// Always starts a new session; failures end up as messages in the view.
pub async fn process_url_input(model: &Arc<dyn CaptionModel>, input: &str) -> Outcome {
    let input = input.trim();

    if is_image_url(input) {
        return match caption_image(model, input).await {
            Ok(entry) => Outcome::viewing(Session::new(vec![entry])),
            Err(err) => {
                tracing::warn!(url = input, reason = err.reason(), error = %err, "captioning failed");
                Outcome::message(err.user_message())
            }
        };
    }

    let candidates = match discover_images(input).await {
        Ok(candidates) => candidates,
        Err(err) => {
            tracing::warn!(url = input, error = %err, "image discovery failed");
            Vec::new()
        }
    };

    if candidates.is_empty() {
        return Outcome::message(NO_IMAGES_MESSAGE);
    }

    let mut captioned = Vec::with_capacity(candidates.len());
    for (i, candidate) in candidates.iter().enumerate() {
        tracing::info!(n = i + 1, url = %candidate, "processing image");
        match caption_image(model, candidate.as_str()).await {
            Ok(entry) => captioned.push(entry),
            Err(err) => {
                tracing::warn!(url = %candidate, reason = err.reason(), error = %err, "skipping image");
            }
        }
    }

    if captioned.is_empty() {
        return Outcome::message(format!(
            "Found {} images but couldn't process any.",
            candidates.len()
        ));
    }

    Outcome::viewing(Session::new(captioned))
}
