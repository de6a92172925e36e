//! Chat delivery boundary.
//!
//! The pipeline never talks to a chat platform directly; it drives this trait
//! and awaits only where it needs a message id to edit later. The CLI binary
//! ships a local backend that styles messages to the terminal and copies
//! artifacts to an output directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::Result;

/// Chat conversation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Identifier of a sent message, used for later edits/deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageId(pub i64);

/// User identity; sessions and merge queues are keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(pub u64);

/// One selectable option in an inline keyboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    /// Text shown on the button
    pub label: String,

    /// Encoded callback payload returned when the button is pressed
    pub data: String,
}

impl Choice {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Operations the pipeline needs from the chat platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatDelivery: Send + Sync {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageId>;

    async fn edit_text(&self, chat: ChatId, message: MessageId, text: &str) -> Result<()>;

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<()>;

    /// Send a message with an inline keyboard of selectable choices.
    async fn send_choices(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: &[Vec<Choice>],
    ) -> Result<MessageId>;

    async fn send_audio<'a>(&self, chat: ChatId, path: &Path, caption: Option<&'a str>) -> Result<()>;

    async fn send_photo<'a>(&self, chat: ChatId, path: &Path, caption: Option<&'a str>) -> Result<()>;

    async fn send_video<'a>(&self, chat: ChatId, path: &Path, caption: Option<&'a str>) -> Result<()>;

    /// Resolve a platform file id to a downloadable URL (or local path for
    /// the CLI backend).
    async fn file_link(&self, file_id: &str) -> Result<String>;
}

/// Terminal-and-filesystem delivery backend used by the CLI binary.
///
/// Messages are styled to stdout; media artifacts are copied into `out_dir`;
/// file ids are passed through unchanged (they are local paths or URLs in CLI
/// use).
pub struct LocalDelivery {
    out_dir: PathBuf,
    next_message_id: AtomicI64,
}

impl LocalDelivery {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            next_message_id: AtomicI64::new(1),
        }
    }

    fn next_id(&self) -> MessageId {
        MessageId(self.next_message_id.fetch_add(1, Ordering::Relaxed))
    }

    fn keep(&self, path: &Path, kind: &str, caption: Option<&str>) -> Result<()> {
        fs_err::create_dir_all(&self.out_dir)?;
        let name = path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Artifact has no file name: {}", path.display()))?;
        let dest = self.out_dir.join(name);
        fs_err::copy(path, &dest)?;
        println!(
            "{} {} -> {}",
            console::style(kind).green().bold(),
            caption.unwrap_or(""),
            dest.display()
        );
        Ok(())
    }
}

#[async_trait]
impl ChatDelivery for LocalDelivery {
    async fn send_text(&self, _chat: ChatId, text: &str) -> Result<MessageId> {
        println!("{}", text);
        Ok(self.next_id())
    }

    async fn edit_text(&self, _chat: ChatId, _message: MessageId, text: &str) -> Result<()> {
        println!("{}", text);
        Ok(())
    }

    async fn delete_message(&self, _chat: ChatId, _message: MessageId) -> Result<()> {
        Ok(())
    }

    async fn send_choices(
        &self,
        _chat: ChatId,
        text: &str,
        keyboard: &[Vec<Choice>],
    ) -> Result<MessageId> {
        println!("{}", text);
        for row in keyboard {
            let labels: Vec<&str> = row.iter().map(|c| c.label.as_str()).collect();
            println!("  [{}]", labels.join("] ["));
        }
        Ok(self.next_id())
    }

    async fn send_audio<'a>(&self, _chat: ChatId, path: &Path, caption: Option<&'a str>) -> Result<()> {
        self.keep(path, "audio", caption)
    }

    async fn send_photo<'a>(&self, _chat: ChatId, path: &Path, caption: Option<&'a str>) -> Result<()> {
        self.keep(path, "photo", caption)
    }

    async fn send_video<'a>(&self, _chat: ChatId, path: &Path, caption: Option<&'a str>) -> Result<()> {
        self.keep(path, "video", caption)
    }

    async fn file_link(&self, file_id: &str) -> Result<String> {
        Ok(file_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_delivery_copies_artifacts() {
        let scratch = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let artifact = scratch.path().join("song.mp3");
        std::fs::write(&artifact, b"mp3-bytes").unwrap();

        let delivery = LocalDelivery::new(out.path());
        delivery
            .send_audio(ChatId(0), &artifact, Some("done"))
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(out.path().join("song.mp3")).unwrap(),
            b"mp3-bytes"
        );
    }

    #[tokio::test]
    async fn test_local_delivery_message_ids_increase() {
        let out = tempfile::tempdir().unwrap();
        let delivery = LocalDelivery::new(out.path());
        let a = delivery.send_text(ChatId(0), "one").await.unwrap();
        let b = delivery.send_text(ChatId(0), "two").await.unwrap();
        assert!(b.0 > a.0);
    }
}
