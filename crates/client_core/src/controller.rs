use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Utc;
use shared::{
    domain::{AspectRatio, ChatMessage, GenerationSettings, HistoryItem, Resolution},
    protocol::{ChatTurn, GenerateRequest, ReferenceImage},
};
use tracing::{info, warn};

use crate::{
    gate::{AccessGate, DenyReason, GateDecision},
    generation::{GenerationError, ThumbnailGenerator},
    media::{decode_image, MediaError},
    session::Session,
    youtube::{ThumbnailFetcher, YoutubeError},
};

pub const DEFAULT_PROMPT: &str =
    "Create a viral YouTube thumbnail based on the provided style and subject.";
pub const SUCCESS_REPLY: &str = "Here is your new viral cover design!";
pub const AUTH_FAILURE_NOTICE: &str = "Authentication failed. Please select a valid API Key.";

/// Latest image per aspect ratio.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageCache {
    landscape: Option<String>,
    portrait: Option<String>,
    square: Option<String>,
}

impl ImageCache {
    pub fn get(&self, ratio: AspectRatio) -> Option<&str> {
        self.slot(ratio).as_deref()
    }

    pub fn put(&mut self, ratio: AspectRatio, image: String) {
        *self.slot_mut(ratio) = Some(image);
    }

    fn slot(&self, ratio: AspectRatio) -> &Option<String> {
        match ratio {
            AspectRatio::Landscape => &self.landscape,
            AspectRatio::Portrait => &self.portrait,
            AspectRatio::Square => &self.square,
        }
    }

    fn slot_mut(&mut self, ratio: AspectRatio) -> &mut Option<String> {
        match ratio {
            AspectRatio::Landscape => &mut self.landscape,
            AspectRatio::Portrait => &mut self.portrait,
            AspectRatio::Square => &mut self.square,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Generating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modal {
    GuestLimit,
    Referral,
}

#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub settings: GenerationSettings,
    pub style_reference: Option<ReferenceImage>,
    pub subject_reference: Option<ReferenceImage>,
    pub images: ImageCache,
    pub messages: Vec<ChatMessage>,
    /// Newest first.
    pub history: Vec<HistoryItem>,
    pub phase: Phase,
    pub error: Option<String>,
    pub modal: Option<Modal>,
    /// Set after the upstream rejected our credentials.
    pub needs_reauth: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Generated { history_id: String },
    Denied(DenyReason),
    Failed(GenerationError),
    /// Empty message text; nothing happened.
    Ignored,
}

pub struct AppController {
    state: ViewState,
    session: Session,
    gate: AccessGate,
    generator: Arc<dyn ThumbnailGenerator>,
}

impl AppController {
    pub fn new(gate: AccessGate, generator: Arc<dyn ThumbnailGenerator>, session: Session) -> Self {
        Self {
            state: ViewState::default(),
            session,
            gate,
            generator,
        }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub fn set_style_reference(&mut self, reference: Option<ReferenceImage>) {
        self.state.style_reference = reference;
    }

    pub fn set_subject_reference(&mut self, reference: Option<ReferenceImage>) {
        self.state.subject_reference = reference;
    }

    pub async fn load_style_from_youtube(
        &mut self,
        fetcher: &ThumbnailFetcher,
        link: &str,
    ) -> Result<(), YoutubeError> {
        match fetcher.fetch_style_reference(link).await {
            Ok(reference) => {
                self.state.style_reference = Some(reference);
                self.state.error = None;
                Ok(())
            }
            Err(err) => {
                self.state.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub fn set_aspect_ratio(&mut self, ratio: AspectRatio) {
        self.state.settings.aspect_ratio = ratio;
    }

    pub fn set_resolution(&mut self, resolution: Resolution) {
        self.state.settings.resolution = resolution;
    }

    /// The image shown for the current aspect ratio.
    pub fn current_image(&self) -> Option<&str> {
        self.state.images.get(self.state.settings.aspect_ratio)
    }

    pub fn dismiss_modal(&mut self) {
        self.state.modal = None;
    }

    pub fn acknowledge_reauth(&mut self) {
        self.state.needs_reauth = false;
        self.state.error = None;
    }

    /// Starts from the default instruction. Returns `None` when no reference
    /// image has been provided yet.
    pub async fn generate_initial(&mut self) -> Option<SendOutcome> {
        if self.state.style_reference.is_none() && self.state.subject_reference.is_none() {
            return None;
        }
        Some(self.send_message(DEFAULT_PROMPT).await)
    }

    pub async fn send_message(&mut self, text: &str) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SendOutcome::Ignored;
        }

        let chat_history: Vec<ChatTurn> = self.state.messages.iter().map(ChatTurn::from).collect();
        self.state.messages.push(ChatMessage::user(text));
        self.state.phase = Phase::Generating;
        self.state.error = None;

        if let GateDecision::Deny(reason) = self.gate.admit(&mut self.session).await {
            info!(reason = reason.as_str(), "generation blocked");
            self.state.phase = Phase::Idle;
            self.state.modal = Some(match reason {
                DenyReason::GuestLimitReached => Modal::GuestLimit,
                DenyReason::InsufficientCredits => Modal::Referral,
            });
            return SendOutcome::Denied(reason);
        }

        let settings = self.state.settings;
        let request = GenerateRequest {
            prompt: text.to_string(),
            reference_images: self.reference_images(),
            aspect_ratio: settings.aspect_ratio,
            resolution: settings.resolution,
            chat_history,
        };

        let result = self.generator.generate(&request).await;
        self.state.phase = Phase::Idle;
        match result {
            Ok(image) => {
                self.state.messages.push(ChatMessage::model(SUCCESS_REPLY));
                self.state.images.put(settings.aspect_ratio, image.clone());
                let item = HistoryItem::new(image, text, settings);
                let history_id = item.id.clone();
                self.state.history.insert(0, item);
                SendOutcome::Generated { history_id }
            }
            Err(err) if err.requires_reauth() => {
                warn!(error = %err, "generation rejected credentials");
                self.state.messages.clear();
                self.state.needs_reauth = true;
                self.state.error = Some(AUTH_FAILURE_NOTICE.to_string());
                SendOutcome::Failed(err)
            }
            Err(err) => {
                warn!(kind = ?err.kind, error = %err, "generation failed");
                self.state
                    .messages
                    .push(ChatMessage::model_error(format!("Error: {}", err.message)));
                self.state.error = Some(err.message.clone());
                SendOutcome::Failed(err)
            }
        }
    }

    /// Style first, then subject.
    fn reference_images(&self) -> Vec<ReferenceImage> {
        [&self.state.style_reference, &self.state.subject_reference]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// Shows a past generation again, restoring the settings it was made with.
    pub fn select_history(&mut self, id: &str) -> bool {
        let Some(item) = self.state.history.iter().find(|item| item.id == id) else {
            return false;
        };
        let (image, settings) = (item.image.clone(), item.settings);
        self.state.images.put(settings.aspect_ratio, image);
        self.state.settings = settings;
        true
    }

    /// Writes the current image as `viral-cover-<ratio>-<millis>.png` into `dir`.
    pub async fn save_current_image(&self, dir: &Path) -> Result<Option<PathBuf>, MediaError> {
        let Some(image) = self.current_image() else {
            return Ok(None);
        };
        let bytes = decode_image(image)?;
        let file_name = format!(
            "viral-cover-{}-{}.png",
            self.state.settings.aspect_ratio.file_label(),
            Utc::now().timestamp_millis()
        );
        let path = dir.join(file_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| MediaError::Write {
                path: path.clone(),
                source,
            })?;
        info!(path = %path.display(), "saved thumbnail");
        Ok(Some(path))
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
