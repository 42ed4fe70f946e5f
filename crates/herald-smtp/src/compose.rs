// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Message composition: HTML body, plain-text fallback and inline upload images.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use herald_jobs::OutgoingMessage;
use lettre::message::{header, Mailbox, MultiPart, SinglePart};
use lettre::Message;
use regex::Regex;
use tracing::debug;

use crate::SmtpError;

/// Plain-text alternative shipped with every message.
pub const PLAIN_FALLBACK: &str = "Please enable HTML to view this email.";

static UPLOAD_IMG_REGEX: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r#"<img[^>]+src=["'](uploads/[^"']+)["']"#).unwrap());

/// Distinct `uploads/...` image sources in document order.
pub fn upload_references(html: &str) -> Vec<String> {
	let mut seen = HashSet::new();
	UPLOAD_IMG_REGEX
		.captures_iter(html)
		.filter_map(|captures| captures.get(1))
		.map(|m| m.as_str().to_string())
		.filter(|reference| seen.insert(reference.clone()))
		.collect()
}

/// `img_` followed by the file name up to its first dot.
pub fn content_id_for(reference: &str) -> String {
	let name = file_name(reference);
	let stem = name.split('.').next().unwrap_or(name);
	format!("img_{stem}")
}

/// MIME type by extension; anything unknown is sent as PNG.
pub fn image_content_type(name: &str) -> &'static str {
	let extension = Path::new(name)
		.extension()
		.and_then(|ext| ext.to_str())
		.map(str::to_ascii_lowercase);
	match extension.as_deref() {
		Some("jpg") | Some("jpeg") => "image/jpeg",
		Some("gif") => "image/gif",
		_ => "image/png",
	}
}

fn file_name(reference: &str) -> &str {
	reference.rsplit('/').next().unwrap_or(reference)
}

/// Build the message `sender` sends to `message.recipient`.
///
/// Image sources pointing into `uploads/` whose file exists in `uploads_dir`
/// are rewritten to `cid:` references and attached inline; the body then
/// becomes `multipart/related` around the text/HTML alternative. Sources
/// without a matching file are left untouched. The sender is added as Bcc.
pub async fn compose(
	sender: &Mailbox,
	message: &OutgoingMessage,
	uploads_dir: &Path,
) -> Result<Message, SmtpError> {
	let to: Mailbox = message
		.recipient
		.parse()
		.map_err(|e| SmtpError::Address(format!("{}: {e}", message.recipient)))?;

	let mut html = message.html_body.clone();
	let mut inline_parts = Vec::new();
	for reference in upload_references(&message.html_body) {
		let name = file_name(&reference);
		if name.is_empty() || name == "." || name == ".." {
			continue;
		}

		let path = uploads_dir.join(name);
		let bytes = match tokio::fs::read(&path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!(path = %path.display(), "referenced upload missing, leaving source as is");
				continue;
			}
			Err(e) => {
				return Err(SmtpError::Send(format!(
					"failed to read inline image {}: {e}",
					path.display()
				)))
			}
		};

		let content_id = content_id_for(&reference);
		html = html.replace(&reference, &format!("cid:{content_id}"));
		inline_parts.push(inline_image(name, &content_id, bytes)?);
	}

	let alternative = MultiPart::alternative()
		.singlepart(SinglePart::plain(PLAIN_FALLBACK.to_string()))
		.singlepart(SinglePart::html(html));

	let body = if inline_parts.is_empty() {
		alternative
	} else {
		inline_parts
			.into_iter()
			.fold(MultiPart::related().multipart(alternative), |related, part| {
				related.singlepart(part)
			})
	};

	Message::builder()
		.from(sender.clone())
		.to(to)
		.bcc(sender.clone())
		.subject(message.subject.as_str())
		.multipart(body)
		.map_err(|e| SmtpError::Send(format!("failed to build message: {e}")))
}

fn inline_image(name: &str, content_id: &str, bytes: Vec<u8>) -> Result<SinglePart, SmtpError> {
	let content_type = header::ContentType::parse(image_content_type(name))
		.map_err(|e| SmtpError::Config(format!("invalid image content type: {e}")))?;

	Ok(SinglePart::builder()
		.header(content_type)
		.header(header::ContentDisposition::inline_with_name(name))
		.header(header::ContentId::from(format!("<{content_id}>")))
		.body(bytes))
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use tempfile::TempDir;

	fn sender() -> Mailbox {
		"sales@example.com".parse().unwrap()
	}

	fn outgoing(html: &str) -> OutgoingMessage {
		OutgoingMessage {
			recipient: "lead@example.org".to_string(),
			subject: "Autumn offer".to_string(),
			html_body: html.to_string(),
		}
	}

	fn rendered(message: &Message) -> String {
		String::from_utf8_lossy(&message.formatted()).into_owned()
	}

	mod references {
		use super::*;

		#[test]
		fn finds_upload_sources_once_each() {
			let html = r#"<p><img alt="x" src="uploads/logo.png"></p>
<img src='uploads/team.photo.jpg' width="10">
<img src="https://cdn.example.com/remote.png">
<img src="uploads/logo.png">"#;
			assert_eq!(
				upload_references(html),
				vec!["uploads/logo.png", "uploads/team.photo.jpg"]
			);
		}

		#[test]
		fn content_id_uses_stem_before_first_dot() {
			assert_eq!(content_id_for("uploads/logo.png"), "img_logo");
			assert_eq!(content_id_for("uploads/team.photo.jpg"), "img_team");
			assert_eq!(content_id_for("uploads/nested/banner"), "img_banner");
		}

		#[test]
		fn content_type_by_extension() {
			assert_eq!(image_content_type("a.PNG"), "image/png");
			assert_eq!(image_content_type("a.jpg"), "image/jpeg");
			assert_eq!(image_content_type("a.JPEG"), "image/jpeg");
			assert_eq!(image_content_type("a.gif"), "image/gif");
			assert_eq!(image_content_type("a.webp"), "image/png");
			assert_eq!(image_content_type("noext"), "image/png");
		}
	}

	mod composition {
		use super::*;

		#[tokio::test]
		async fn plain_message_has_fallback_and_bcc_to_sender() {
			let dir = TempDir::new().unwrap();
			let message = compose(&sender(), &outgoing("<p>Hello</p>"), dir.path())
				.await
				.unwrap();

			let text = rendered(&message);
			assert!(text.contains("Subject: Autumn offer"));
			assert!(text.contains("multipart/alternative"));
			assert!(!text.contains("multipart/related"));
			assert!(text.contains(PLAIN_FALLBACK));
			assert!(text.contains("<p>Hello</p>"));

			let envelope: Vec<String> = message
				.envelope()
				.to()
				.iter()
				.map(|address| address.to_string())
				.collect();
			assert!(envelope.contains(&"lead@example.org".to_string()));
			assert!(envelope.contains(&"sales@example.com".to_string()));
		}

		#[tokio::test]
		async fn existing_upload_is_attached_inline() {
			let dir = TempDir::new().unwrap();
			std::fs::write(dir.path().join("logo.png"), [0x89, b'P', b'N', b'G']).unwrap();

			let message = compose(
				&sender(),
				&outgoing(r#"<img src="uploads/logo.png"><img src="uploads/logo.png">"#),
				dir.path(),
			)
			.await
			.unwrap();

			let text = rendered(&message);
			assert!(text.contains("multipart/related"));
			assert!(text.contains("Content-ID: <img_logo>"));
			assert!(text.contains("image/png"));
			assert!(text.contains("cid:img_logo"));
			assert!(!text.contains("uploads/logo.png"));
			assert_eq!(text.matches("Content-ID: <img_logo>").count(), 1);
		}

		#[tokio::test]
		async fn missing_upload_is_left_untouched() {
			let dir = TempDir::new().unwrap();
			let message = compose(
				&sender(),
				&outgoing(r#"<img src="uploads/missing.gif">"#),
				dir.path(),
			)
			.await
			.unwrap();

			let text = rendered(&message);
			assert!(text.contains("uploads/missing.gif"));
			assert!(!text.contains("multipart/related"));
			assert!(!text.contains("cid:"));
		}

		#[tokio::test]
		async fn invalid_recipient_is_an_address_error() {
			let dir = TempDir::new().unwrap();
			let mut message = outgoing("<p>x</p>");
			message.recipient = "not an address".to_string();

			let err = compose(&sender(), &message, dir.path()).await.unwrap_err();
			assert!(matches!(err, SmtpError::Address(_)));
		}
	}

	proptest! {
		#[test]
		fn content_id_is_a_bare_token(name in "[a-z0-9_.-]{1,24}", dir in "[a-z]{1,8}") {
			let content_id = content_id_for(&format!("uploads/{dir}/{name}"));
			prop_assert!(content_id.starts_with("img_"));
			prop_assert!(!content_id.contains('/'));
			prop_assert!(!content_id.contains('.'));
		}
	}
}
