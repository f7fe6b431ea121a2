//! Per-recipient message composition: rendered body plus QR ticket, packaged
//! as a multipart body ready for the transport.
use anyhow::{Context, Result};
use image::RgbaImage;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::config;
use crate::model::{Recipient, TicketCode};
use crate::render::{RenderError, TemplateRenderer};
use crate::ticket::{self, ImageError};

/// Content-ID of the inline ticket; templates reference it as `cid:ticket`.
pub const TICKET_CONTENT_ID: &str = "ticket";

static IMAGE_PNG: Lazy<ContentType> =
    Lazy::new(|| ContentType::parse("image/png").expect("valid image/png content type"));

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// File attached verbatim to every message.
#[derive(Debug, Clone)]
pub struct StaticAttachment {
    pub filename: String,
    pub content_type: ContentType,
    pub bytes: Vec<u8>,
}

impl StaticAttachment {
    pub fn load(attachment: &config::Attachment) -> Result<Self> {
        let bytes = std::fs::read(&attachment.path)
            .with_context(|| format!("failed to read attachment {}", attachment.path))?;
        let content_type = ContentType::parse(&attachment.content_type)
            .with_context(|| format!("invalid content type {}", attachment.content_type))?;
        Ok(Self {
            filename: attachment.filename.clone(),
            content_type,
            bytes,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ComposeSettings {
    pub subject: String,
    /// Every template variable mapped to a table column.
    pub mapped_fields: Vec<String>,
    /// Variable -> leading characters dropped before rendering.
    pub trim_prefix: BTreeMap<String, usize>,
    pub attachment_prefix: String,
    pub attachments: Vec<StaticAttachment>,
    pub archive_dir: Option<PathBuf>,
}

/// Composed message for one recipient.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub subject: String,
    pub html: String,
    pub ticket_png: Vec<u8>,
    pub ticket_filename: String,
    pub body: MultiPart,
}

#[derive(Debug)]
pub struct ArtifactComposer {
    renderer: TemplateRenderer,
    background: RgbaImage,
    settings: ComposeSettings,
}

impl ArtifactComposer {
    pub fn new(renderer: TemplateRenderer, background: RgbaImage, settings: ComposeSettings) -> Self {
        Self {
            renderer,
            background,
            settings,
        }
    }

    /// Load template, background and static attachments named in `message`.
    pub fn from_config(message: &config::Message) -> Result<Self> {
        let renderer = TemplateRenderer::load(Path::new(&message.template))?;
        let background = ticket::load_background(Path::new(&message.background))?;
        let attachments = message
            .attachments
            .iter()
            .map(StaticAttachment::load)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(
            renderer,
            background,
            ComposeSettings {
                subject: message.subject.clone(),
                mapped_fields: message.fields.keys().cloned().collect(),
                trim_prefix: message.trim_prefix.clone(),
                attachment_prefix: message.attachment_prefix.clone(),
                attachments,
                archive_dir: message.archive_dir.as_ref().map(PathBuf::from),
            },
        ))
    }

    /// Give every mapped variable the recipient lacks an empty value, so a
    /// row created with only a name and an email still renders.
    pub fn fill_missing_fields(&self, recipient: &mut Recipient) {
        for var in &self.settings.mapped_fields {
            recipient.fields.entry(var.clone()).or_default();
        }
    }

    /// Render, draw and package the message for `recipient`. Touches no shared
    /// file: the ticket only exists in memory unless archiving is enabled.
    pub fn compose(&self, recipient: &Recipient, code: &TicketCode) -> Result<Artifact, ComposeError> {
        let html = self.renderer.render(&self.context(recipient))?;
        let ticket_png = ticket::render_ticket(&self.background, code.as_str())?;
        if let Some(dir) = &self.settings.archive_dir {
            let path = ticket::archive_ticket(dir, code.as_str(), &ticket_png)?;
            debug!(email = %recipient.email, path = %path.display(), "ticket archived");
        }

        let ticket_filename = self.ticket_filename(recipient, code);
        let body = self.package(&html, &ticket_png, &ticket_filename);
        Ok(Artifact {
            subject: self.settings.subject.clone(),
            html,
            ticket_png,
            ticket_filename,
            body,
        })
    }

    fn context(&self, recipient: &Recipient) -> BTreeMap<String, String> {
        let mut fields = recipient.fields.clone();
        for (var, skip) in &self.settings.trim_prefix {
            if let Some(value) = fields.get_mut(var) {
                *value = value.chars().skip(*skip).collect();
            }
        }
        fields
    }

    fn ticket_filename(&self, recipient: &Recipient, code: &TicketCode) -> String {
        let name = recipient.name.trim();
        let label = if name.is_empty() { code.as_str() } else { name };
        format!("{}_{}.png", self.settings.attachment_prefix, label)
    }

    fn package(&self, html: &str, png: &[u8], filename: &str) -> MultiPart {
        let inline = Attachment::new_inline(TICKET_CONTENT_ID.to_string())
            .body(png.to_vec(), IMAGE_PNG.clone());
        let related = MultiPart::related()
            .singlepart(SinglePart::html(html.to_string()))
            .singlepart(inline);
        let download = Attachment::new(filename.to_string()).body(png.to_vec(), IMAGE_PNG.clone());

        let mut body = MultiPart::mixed().multipart(related).singlepart(download);
        for extra in &self.settings.attachments {
            body = body.singlepart(
                Attachment::new(extra.filename.clone())
                    .body(extra.bytes.clone(), extra.content_type.clone()),
            );
        }
        body
    }
}
