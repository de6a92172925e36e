//! Request orchestration.
//!
//! Every inbound interaction runs as its own task through one of the handlers
//! here: download → transform → size guard → deliver → cleanup, strictly in
//! that order within a request. Handlers catch their own errors and render
//! them as user-facing status messages; nothing here crashes the process.

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::acquire::Downloader;
use crate::config::Config;
use crate::delivery::{ChatDelivery, ChatId, MessageId, UserId};
use crate::dispatch::{self, Inbound};
use crate::guard::SizeGuard;
use crate::merge::MergeQueues;
use crate::session::offsets::{self, CallbackAction};
use crate::session::{AudioSource, ConfirmOutcome, CutPlan, TrimReply, TrimSessions, TrimState};
use crate::shortvideo::{AuthorInfo, PostKind, ResolvedPost, ShortVideoClient};
use crate::tempfiles::TempTracker;
use crate::transcribe::Transcriber;
use crate::transform::{ProgressReporter, Transcoder};
use crate::{timecode, utils, PipelineError, Result};

const HELP_TEXT: &str = "🎵 Send a video or YouTube link to convert to MP3\n\
    🎬 /video <url> — Download video\n\
    🎵 /mp3 <url> — Download MP3\n\
    🧠 /transcribe — Reply to audio to transcribe\n\
    🔊 /cut start=00:30 end=01:20 — Trim audio\n\
    🎧 /search <song name> — Find & download music\n\n\
    You can also just send a song name to search directly.";

/// Owns the collaborators and runs every request flow.
pub struct MediaPipeline {
    downloader: Downloader,
    transcoder: Transcoder,
    guard: SizeGuard,
    sessions: TrimSessions,
    merge_queues: MergeQueues,
    transcriber: Option<Transcriber>,
    short_video: Option<ShortVideoClient>,
    delivery: Arc<dyn ChatDelivery>,
    work_dir: PathBuf,
    progress_interval: Duration,
    _scratch: Option<tempfile::TempDir>,
}

impl MediaPipeline {
    pub fn new(config: &Config, delivery: Arc<dyn ChatDelivery>) -> Result<Self> {
        let (work_dir, scratch) = match &config.app.work_dir {
            Some(dir) => {
                fs_err::create_dir_all(dir)?;
                (dir.clone(), None)
            }
            None => {
                let scratch =
                    tempfile::TempDir::new().context("Failed to create working directory")?;
                (scratch.path().to_path_buf(), Some(scratch))
            }
        };

        let downloader = Downloader::new(
            config.tools.yt_dlp_path.clone(),
            config.tools.ffmpeg_path.clone(),
            work_dir.clone(),
            config.tools.cookies_path.clone(),
            Duration::from_secs(config.limits.acquisition_timeout_secs),
        );
        let transcoder = Transcoder::new(
            config.tools.ffmpeg_path.clone(),
            config.tools.ffprobe_path.clone(),
        );

        Ok(Self {
            downloader,
            transcoder,
            guard: SizeGuard::new(config.limits.max_upload_bytes, config.limits.max_source_secs),
            sessions: TrimSessions::new(),
            merge_queues: MergeQueues::new(),
            transcriber: Transcriber::from_config(&config.transcription),
            short_video: ShortVideoClient::from_config(&config.short_video),
            delivery,
            work_dir,
            progress_interval: Duration::from_secs(config.limits.progress_interval_secs),
            _scratch: scratch,
        })
    }

    /// Route free text: commands, platform URLs, or a music search.
    pub async fn handle_text(
        &self,
        chat: ChatId,
        user: UserId,
        text: &str,
        reply_audio: Option<AudioSource>,
    ) {
        // A bare time token while a trim session is active is the custom
        // offset the session asked for, not a search.
        if is_time_token(text) && self.sessions.state_of(user).await.is_some() {
            self.handle_time_token(chat, user, text).await;
            return;
        }

        match dispatch::classify_text(text) {
            Inbound::Command { name, args } => match name.as_str() {
                "start" => self.say(chat, HELP_TEXT).await,
                "mp3" | "video" => {
                    if args.is_empty() {
                        self.say(chat, "Usage: /mp3 <url>").await;
                    } else {
                        self.handle_url(chat, &args).await;
                    }
                }
                "search" => {
                    if args.is_empty() {
                        self.say(chat, "Usage: /search <song name>").await;
                    } else {
                        self.handle_search(chat, &args).await;
                    }
                }
                "cut" => self.handle_cut_command(chat, user, &args, reply_audio).await,
                "merge" => self.handle_merge(chat, user).await,
                "transcribe" | "voice2text" => match reply_audio {
                    Some(audio) => self.handle_transcribe(chat, &audio.file_ref).await,
                    None => {
                        self.say(chat, "Reply to an audio/voice message with /transcribe")
                            .await
                    }
                },
                _ => self.say(chat, "❓ Unknown command. Send /start for help.").await,
            },
            Inbound::DownloadUrl(url) => self.handle_url(chat, &url).await,
            Inbound::ShortVideoUrl(url) => self.handle_short_video(chat, &url).await,
            Inbound::TooShort => {
                self.say(chat, "❗ Please send a valid YouTube URL or use a command.")
                    .await
            }
            Inbound::SearchQuery(query) => self.handle_search(chat, &query).await,
        }
    }

    /// Download a URL as mp3 and deliver every produced artifact.
    pub async fn handle_url(&self, chat: ChatId, url: &str) {
        let Ok(status) = self
            .delivery
            .send_text(chat, "⏳ Downloading and converting...")
            .await
        else {
            return;
        };

        if let Err(e) = self.run_url(chat, status, url).await {
            tracing::warn!("URL request failed: {:#}", e);
            self.edit_or_log(chat, status, &format!("❌ {}", e)).await;
        }
    }

    async fn run_url(&self, chat: ChatId, status: MessageId, url: &str) -> Result<()> {
        utils::validate_and_normalize_url(url)?;

        // Duration is checked before any download time is spent.
        let info = self.downloader.probe(url).await?;
        if let Some(duration) = info.duration_secs {
            self.guard.check_source_duration(duration)?;
        }

        let files = self.downloader.download_audio(url).await?;
        let tracker = TempTracker::new();
        for file in &files {
            tracker.register(file);
        }

        self.edit_or_log(chat, status, &format!("✅ {} MP3(s) ready!", files.len()))
            .await;

        for file in &files {
            let deliverable = self.ensure_deliverable(file, &tracker).await?;
            self.delivery.send_audio(chat, &deliverable, None).await?;
        }

        tracker.release_all();
        Ok(())
    }

    /// Search for one track and run the download flow on the hit.
    pub async fn handle_search(&self, chat: ChatId, query: &str) {
        let Ok(status) = self
            .delivery
            .send_text(chat, "⏳ Searching on YouTube...")
            .await
        else {
            return;
        };

        match self.run_search(chat, status, query).await {
            Ok(true) => {
                let _ = self.delivery.delete_message(chat, status).await;
            }
            Ok(false) => self.edit_or_log(chat, status, "❌ No results found.").await,
            Err(e) => {
                tracing::warn!("Search request failed: {:#}", e);
                self.edit_or_log(chat, status, &format!("❌ Error: {}", e)).await;
            }
        }
    }

    async fn run_search(&self, chat: ChatId, status: MessageId, query: &str) -> Result<bool> {
        let Some(hit) = self.downloader.search(query).await? else {
            return Ok(false);
        };

        self.say(chat, &hit.message).await;
        if let Some(duration) = hit.duration_secs {
            self.guard.check_source_duration(duration)?;
        }

        self.edit_or_log(chat, status, "🎵 Converting to MP3...").await;

        let files = self.downloader.download_audio(&hit.url).await?;
        let tracker = TempTracker::new();
        for file in &files {
            tracker.register(file);
        }

        let Some(first) = files.first() else {
            return Err(PipelineError::NoArtifactProduced.into());
        };
        let deliverable = self.ensure_deliverable(first, &tracker).await?;
        self.delivery.send_audio(chat, &deliverable, None).await?;

        tracker.release_all();
        Ok(true)
    }

    /// Convert an uploaded video to mp3 and deliver it.
    pub async fn handle_video(&self, chat: ChatId, file_id: &str) {
        let Ok(status) = self
            .delivery
            .send_text(chat, "⏳ Processing your video...")
            .await
        else {
            return;
        };

        if let Err(e) = self.run_video(chat, status, file_id).await {
            tracing::warn!("Video request failed: {:#}", e);
            self.edit_or_log(chat, status, &format!("❌ {}", e)).await;
        }
    }

    async fn run_video(&self, chat: ChatId, status: MessageId, file_id: &str) -> Result<()> {
        let tracker = TempTracker::new();

        let link = self.delivery.file_link(file_id).await?;
        let video_path = self.work_dir.join(utils::unique_filename("video", "mp4"));
        tracker.register(&video_path);
        utils::fetch_to_file(&link, &video_path).await?;

        let reporter = self.progress_editor(chat, status, "⏳ Converting...");
        let audio_path = self
            .transcoder
            .extract_audio(&video_path, Some(&reporter))
            .await?;
        tracker.register(&audio_path);

        let deliverable = self.ensure_deliverable(&audio_path, &tracker).await?;
        self.edit_or_log(chat, status, "✅ Conversion complete!").await;
        self.delivery.send_audio(chat, &deliverable, None).await?;

        tracker.release_all();
        Ok(())
    }

    /// Queue an uploaded audio for a later merge.
    pub async fn handle_audio_message(&self, chat: ChatId, user: UserId, file_id: &str) {
        let count = self.merge_queues.enqueue(user, file_id).await;
        self.say(
            chat,
            &format!("✅ Audio added to merge list. ({} so far)", count),
        )
        .await;
    }

    /// Merge everything the user queued into one file.
    pub async fn handle_merge(&self, chat: ChatId, user: UserId) {
        let refs = match self.merge_queues.take_for_merge(user).await {
            Ok(refs) => refs,
            Err(e)
                if matches!(
                    e.downcast_ref::<PipelineError>(),
                    Some(PipelineError::InsufficientInputs)
                ) =>
            {
                self.say(chat, "❗ Please send at least two audio files before merging.")
                    .await;
                return;
            }
            Err(e) => {
                self.say(chat, &format!("❌ Error: {}", e)).await;
                return;
            }
        };

        self.say(chat, &format!("⏳ Merging {} audios...", refs.len()))
            .await;

        if let Err(e) = self.run_merge(chat, &refs).await {
            tracing::warn!("Merge request failed: {:#}", e);
            self.say(chat, &format!("❌ Failed to merge: {}", e)).await;
        }
    }

    async fn run_merge(&self, chat: ChatId, refs: &[String]) -> Result<()> {
        let tracker = TempTracker::new();

        let mut inputs = Vec::with_capacity(refs.len());
        for file_ref in refs {
            let link = self.delivery.file_link(file_ref).await?;
            let path = self.work_dir.join(utils::unique_filename("part", "mp3"));
            tracker.register(&path);
            utils::fetch_to_file(&link, &path).await?;
            inputs.push(path);
        }

        let merged = self.transcoder.merge(&inputs, &self.work_dir).await?;
        tracker.register(&merged);

        let deliverable = self.ensure_deliverable(&merged, &tracker).await?;
        self.delivery
            .send_audio(chat, &deliverable, Some("✅ Merged audio file."))
            .await?;

        tracker.release_all();
        Ok(())
    }

    /// `/cut` entry point: explicit `start=`/`end=` arguments run the cut
    /// directly; a bare `/cut` on a reply-to-audio starts an interactive
    /// session.
    pub async fn handle_cut_command(
        &self,
        chat: ChatId,
        user: UserId,
        args: &str,
        reply_audio: Option<AudioSource>,
    ) {
        let Some(source) = reply_audio else {
            self.say(chat, "Reply to an audio message with /cut").await;
            return;
        };

        let (start, end) = dispatch::parse_cut_args(args);
        if start.is_none() && end.is_none() {
            self.begin_cut(chat, user, source).await;
            return;
        }

        let Ok(status) = self
            .delivery
            .send_text(chat, "⏳ Processing audio cut...")
            .await
        else {
            return;
        };

        match self
            .run_direct_cut(chat, status, &source, start.as_deref(), end.as_deref())
            .await
        {
            Ok(()) => self.edit_or_log(chat, status, "✅ Audio cut complete!").await,
            Err(e) => {
                tracing::warn!("Direct cut failed: {:#}", e);
                self.edit_or_log(chat, status, &format!("❌ Failed to cut audio: {}", e))
                    .await;
            }
        }
    }

    async fn run_direct_cut(
        &self,
        chat: ChatId,
        status: MessageId,
        source: &AudioSource,
        start_token: Option<&str>,
        end_token: Option<&str>,
    ) -> Result<()> {
        let tracker = TempTracker::new();

        let link = self.delivery.file_link(&source.file_ref).await?;
        let input = self.work_dir.join(utils::unique_filename("cut-src", "mp3"));
        tracker.register(&input);
        utils::fetch_to_file(&link, &input).await?;

        let duration = self.transcoder.probe_duration(&input).await?.floor() as u64;
        let start_secs = start_token.map(timecode::parse).unwrap_or(0);
        let end_secs = end_token.map(timecode::parse);

        if start_secs >= duration {
            anyhow::bail!(
                "Start time ({}) is beyond audio duration ({}s)",
                timecode::format(start_secs),
                duration
            );
        }
        if let Some(end) = end_secs {
            if end > duration {
                anyhow::bail!(
                    "End time ({}) is beyond audio duration ({}s)",
                    timecode::format(end),
                    duration
                );
            }
        }

        let reporter = self.progress_editor(chat, status, "⏳ Cutting...");
        let output = self
            .transcoder
            .trim(&input, start_secs, end_secs, Some(&reporter))
            .await?;
        tracker.register(&output);

        let deliverable = self.ensure_deliverable(&output, &tracker).await?;
        self.delivery.send_audio(chat, &deliverable, None).await?;

        tracker.release_all();
        Ok(())
    }

    /// Start (or restart) an interactive trim session for the user.
    pub async fn begin_cut(&self, chat: ChatId, user: UserId, source: AudioSource) {
        let reply = self.sessions.begin(user, source).await;
        self.render_trim_reply(chat, reply).await;
    }

    /// Drive the trim state machine from a decoded callback payload. Foreign
    /// payloads are ignored.
    pub async fn handle_callback(&self, chat: ChatId, user: UserId, data: &str) {
        let Some(action) = CallbackAction::decode(data) else {
            tracing::debug!("Ignoring unknown callback payload: {}", data);
            return;
        };

        let result = match action {
            CallbackAction::SelectStart(secs) => {
                self.sessions.select_start(user, secs).await.map(Some)
            }
            CallbackAction::SelectEnd(secs) => self.sessions.select_end(user, secs).await.map(Some),
            CallbackAction::StartCustom => {
                self.say(chat, "Send the start time as text, like 01:30.").await;
                Ok(None)
            }
            CallbackAction::EndCustom => {
                self.say(chat, "Send the end time as text, like 02:45.").await;
                Ok(None)
            }
            CallbackAction::Cancel => self.sessions.cancel(user).await.map(Some),
            CallbackAction::Confirm => {
                self.execute_confirm(chat, user).await;
                Ok(None)
            }
        };

        match result {
            Ok(Some(reply)) => self.render_trim_reply(chat, reply).await,
            Ok(None) => {}
            Err(e) => self.say(chat, &format!("❌ {}", e)).await,
        }
    }

    /// A bare time token typed after the custom-entry escape.
    pub async fn handle_time_token(&self, chat: ChatId, user: UserId, token: &str) {
        let secs = timecode::parse(token);
        let result = match self.sessions.state_of(user).await {
            Some(TrimState::AwaitingStart) => self.sessions.select_start(user, secs).await,
            Some(TrimState::AwaitingEnd) | Some(TrimState::ReadyToConfirm) => {
                self.sessions.select_end(user, secs).await
            }
            None => {
                self.say(chat, "No active cut session. Reply to an audio with /cut.")
                    .await;
                return;
            }
        };

        match result {
            Ok(reply) => self.render_trim_reply(chat, reply).await,
            Err(e) => self.say(chat, &format!("❌ {}", e)).await,
        }
    }

    /// Validate the session, run the cut, and finish the session either way:
    /// completed on success, cancelled on any failure (no retry).
    pub async fn execute_confirm(&self, chat: ChatId, user: UserId) {
        let outcome = match self.sessions.confirm(user).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.say(chat, &format!("❌ {}", e)).await;
                return;
            }
        };

        let plan = match outcome {
            ConfirmOutcome::Plan(plan) => plan,
            ConfirmOutcome::StartRequired => {
                self.say(chat, "❗ Pick a start time first.").await;
                return;
            }
            ConfirmOutcome::EndRequired => {
                self.say(chat, "❗ Pick an end time first.").await;
                return;
            }
        };

        let Ok(status) = self
            .delivery
            .send_text(chat, "⏳ Processing audio cut...")
            .await
        else {
            return;
        };

        match self.run_cut(chat, status, &plan).await {
            Ok(()) => {
                if let Err(e) = self.sessions.complete(user).await {
                    tracing::warn!("Session vanished before completion: {}", e);
                }
                self.edit_or_log(chat, status, "✅ Audio cut complete!").await;
            }
            Err(e) => {
                tracing::warn!("Confirmed cut failed: {:#}", e);
                let _ = self.sessions.cancel(user).await;
                self.edit_or_log(chat, status, &format!("❌ Failed to cut audio: {}", e))
                    .await;
            }
        }
    }

    async fn run_cut(&self, chat: ChatId, status: MessageId, plan: &CutPlan) -> Result<()> {
        let tracker = TempTracker::new();

        let link = self.delivery.file_link(&plan.source.file_ref).await?;
        let input = self.work_dir.join(utils::unique_filename("cut-src", "mp3"));
        tracker.register(&input);
        utils::fetch_to_file(&link, &input).await?;

        let reporter = self.progress_editor(chat, status, "⏳ Cutting...");
        let output = self
            .transcoder
            .trim(&input, plan.start_secs, Some(plan.end_secs), Some(&reporter))
            .await?;
        tracker.register(&output);

        let deliverable = self.ensure_deliverable(&output, &tracker).await?;
        self.delivery.send_audio(chat, &deliverable, None).await?;

        tracker.release_all();
        Ok(())
    }

    /// Transcribe a referenced audio/voice file and reply with the text.
    pub async fn handle_transcribe(&self, chat: ChatId, file_id: &str) {
        let Some(transcriber) = &self.transcriber else {
            self.say(chat, "❗ Transcription is not configured.").await;
            return;
        };

        match self.run_transcribe(transcriber, file_id).await {
            Ok(text) => {
                self.say(chat, &format!("📝 Transcription:\n{}", text)).await;
            }
            Err(e) => {
                tracing::warn!("Transcription failed: {:#}", e);
                self.say(chat, &format!("❌ Error during transcription: {}", e))
                    .await;
            }
        }
    }

    async fn run_transcribe(&self, transcriber: &Transcriber, file_id: &str) -> Result<String> {
        let tracker = TempTracker::new();

        let link = self.delivery.file_link(file_id).await?;
        let path = self.work_dir.join(utils::unique_filename("voice", "mp3"));
        tracker.register(&path);
        utils::fetch_to_file(&link, &path).await?;

        let text = transcriber.transcribe(&path).await?;
        tracker.release_all();
        Ok(text)
    }

    /// Resolve a short-form-video URL and deliver its video or photos.
    pub async fn handle_short_video(&self, chat: ChatId, url: &str) {
        let Some(client) = &self.short_video else {
            self.say(chat, "❗ Short-video lookup is not configured.").await;
            return;
        };

        let resolved = client.resolve_short_url(url).await;
        let is_photo = matches!(resolved.post, Some((PostKind::Photo, _)));
        let fetching = format!(
            "⏳ Fetching TikTok {}...",
            if is_photo { "photo" } else { "video" }
        );
        let Ok(status) = self.delivery.send_text(chat, &fetching).await else {
            return;
        };

        match self.run_short_video(chat, client, &resolved).await {
            Ok(()) => {
                let _ = self.delivery.delete_message(chat, status).await;
            }
            Err(e) => {
                tracing::warn!("Short-video request failed: {:#}", e);
                self.edit_or_log(chat, status, &format!("❌ Error: {}", e)).await;
            }
        }
    }

    async fn run_short_video(
        &self,
        chat: ChatId,
        client: &ShortVideoClient,
        resolved: &ResolvedPost,
    ) -> Result<()> {
        let tracker = TempTracker::new();
        let author = client.fetch_author(&resolved.final_url).await?;

        match &resolved.post {
            Some((PostKind::Photo, post_id)) => {
                let photos = client.fetch_photos(post_id).await?;
                if photos.is_empty() {
                    self.send_cover_photo(chat, client, &author, &tracker).await?;
                } else {
                    for url in &photos {
                        self.send_short_photo(chat, client, url, &author, &tracker)
                            .await?;
                    }
                }
            }
            _ => match client.fetch_video(&resolved.final_url).await? {
                Some(play_url) => {
                    let path = self.work_dir.join(utils::unique_filename("tiktok", "mp4"));
                    tracker.register(&path);
                    client.download_media(&play_url, &path).await?;

                    let mut caption = format!("🎥 TikTok Video by @{}", author.nick);
                    if let Some(description) = &author.description {
                        caption.push('\n');
                        caption.push_str(description);
                    }
                    self.delivery.send_video(chat, &path, Some(&caption)).await?;
                }
                None => {
                    // No playable video; fall back to the post cover.
                    self.send_cover_photo(chat, client, &author, &tracker).await?;
                }
            },
        }

        tracker.release_all();
        Ok(())
    }

    async fn send_cover_photo(
        &self,
        chat: ChatId,
        client: &ShortVideoClient,
        author: &AuthorInfo,
        tracker: &TempTracker,
    ) -> Result<()> {
        let Some(cover) = &author.cover_url else {
            anyhow::bail!("Post has no downloadable media");
        };
        self.send_short_photo(chat, client, cover, author, tracker).await
    }

    async fn send_short_photo(
        &self,
        chat: ChatId,
        client: &ShortVideoClient,
        url: &str,
        author: &AuthorInfo,
        tracker: &TempTracker,
    ) -> Result<()> {
        let path = self.work_dir.join(utils::unique_filename("tiktok", "jpg"));
        tracker.register(&path);
        client.download_media(url, &path).await?;
        self.delivery
            .send_photo(
                chat,
                &path,
                Some(&format!("📸 TikTok Photo by @{}", author.nick)),
            )
            .await
    }

    /// Check the artifact against the upload ceiling, compressing once when
    /// it is over. A post-compression failure deletes both artifacts before
    /// the error is returned.
    async fn ensure_deliverable(&self, path: &Path, tracker: &TempTracker) -> Result<PathBuf> {
        match self.guard.check_upload_size(path) {
            Ok(_) => Ok(path.to_path_buf()),
            Err(e) if is_too_large(&e) => {
                tracing::info!("Artifact over the upload ceiling, compressing: {}", path.display());
                let compressed = self.transcoder.compress(path, 128, 2, 44100, None).await?;
                tracker.register(&compressed);

                match self.guard.check_upload_size(&compressed) {
                    Ok(_) => Ok(compressed),
                    Err(e) => {
                        let _ = fs_err::remove_file(path);
                        let _ = fs_err::remove_file(&compressed);
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn render_trim_reply(&self, chat: ChatId, reply: TrimReply) {
        match reply {
            TrimReply::PickStart { duration_secs } => {
                let keyboard = offsets::start_keyboard(duration_secs);
                if let Err(e) = self
                    .delivery
                    .send_choices(chat, "🔊 Pick the start time for the cut:", &keyboard)
                    .await
                {
                    tracing::warn!("Failed to send choices: {}", e);
                }
            }
            TrimReply::PickEnd {
                duration_secs,
                start_secs,
            } => {
                let keyboard = offsets::end_keyboard(duration_secs, start_secs);
                let text = format!(
                    "Start set to {}. Pick the end time:",
                    timecode::format(start_secs)
                );
                if let Err(e) = self.delivery.send_choices(chat, &text, &keyboard).await {
                    tracing::warn!("Failed to send choices: {}", e);
                }
            }
            TrimReply::ReadyToConfirm {
                duration_secs,
                start_secs,
                end_secs,
            } => {
                let keyboard = offsets::end_keyboard(duration_secs, start_secs);
                let text = format!(
                    "✂️ Cut from {} to {}? Press Done to confirm, or pick a different end:",
                    timecode::format(start_secs),
                    timecode::format(end_secs)
                );
                if let Err(e) = self.delivery.send_choices(chat, &text, &keyboard).await {
                    tracing::warn!("Failed to send choices: {}", e);
                }
            }
            TrimReply::Cancelled => self.say(chat, "❎ Cut cancelled.").await,
        }
    }

    /// Throttled progress callback that edits the status message.
    fn progress_editor(&self, chat: ChatId, message: MessageId, prefix: &str) -> ProgressReporter {
        let delivery = self.delivery.clone();
        let prefix = prefix.to_string();
        ProgressReporter::new(self.progress_interval, move |percent| {
            let delivery = delivery.clone();
            let text = format!("{} {:.0}%", prefix, percent);
            tokio::spawn(async move {
                let _ = delivery.edit_text(chat, message, &text).await;
            });
        })
    }

    async fn say(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.delivery.send_text(chat, text).await {
            tracing::warn!("Failed to send message: {}", e);
        }
    }

    async fn edit_or_log(&self, chat: ChatId, message: MessageId, text: &str) {
        if let Err(e) = self.delivery.edit_text(chat, message, text).await {
            tracing::warn!("Failed to edit status message: {}", e);
        }
    }
}

fn is_too_large(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::RequestTooLarge(_))
    )
}

fn is_time_token(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty() && text.chars().all(|c| c.is_ascii_digit() || c == ':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::MockChatDelivery;

    const CHAT: ChatId = ChatId(10);
    const USER: UserId = UserId(42);

    fn pipeline_with(mock: MockChatDelivery) -> MediaPipeline {
        MediaPipeline::new(&Config::default(), Arc::new(mock)).unwrap()
    }

    #[tokio::test]
    async fn test_audio_messages_accumulate_in_the_merge_queue() {
        let mut mock = MockChatDelivery::new();
        mock.expect_send_text()
            .withf(|_, text| text.contains("(1 so far)"))
            .times(1)
            .returning(|_, _| Ok(MessageId(1)));
        mock.expect_send_text()
            .withf(|_, text| text.contains("(2 so far)"))
            .times(1)
            .returning(|_, _| Ok(MessageId(2)));

        let pipeline = pipeline_with(mock);
        pipeline.handle_audio_message(CHAT, USER, "file-a").await;
        pipeline.handle_audio_message(CHAT, USER, "file-b").await;
        assert_eq!(pipeline.merge_queues.len(USER).await, 2);
    }

    #[tokio::test]
    async fn test_merge_below_two_items_reports_and_keeps_queue() {
        let mut mock = MockChatDelivery::new();
        mock.expect_send_text()
            .withf(|_, text| text.contains("(1 so far)"))
            .times(1)
            .returning(|_, _| Ok(MessageId(1)));
        mock.expect_send_text()
            .withf(|_, text| text.contains("at least two"))
            .times(1)
            .returning(|_, _| Ok(MessageId(2)));

        let pipeline = pipeline_with(mock);
        pipeline.handle_audio_message(CHAT, USER, "file-a").await;
        pipeline.handle_merge(CHAT, USER).await;
        assert_eq!(pipeline.merge_queues.len(USER).await, 1);
    }

    #[tokio::test]
    async fn test_confirm_without_session_reports_not_found() {
        let mut mock = MockChatDelivery::new();
        mock.expect_send_text()
            .withf(|_, text| text.contains("No active trim session"))
            .times(1)
            .returning(|_, _| Ok(MessageId(1)));

        let pipeline = pipeline_with(mock);
        pipeline.execute_confirm(CHAT, USER).await;
    }

    #[tokio::test]
    async fn test_confirm_before_end_is_an_explicit_disposition() {
        let mut mock = MockChatDelivery::new();
        mock.expect_send_choices().returning(|_, _, _| Ok(MessageId(1)));
        mock.expect_send_text()
            .withf(|_, text| text.contains("Pick a start time first"))
            .times(1)
            .returning(|_, _| Ok(MessageId(2)));

        let pipeline = pipeline_with(mock);
        pipeline
            .begin_cut(
                CHAT,
                USER,
                AudioSource {
                    file_ref: "file-a".to_string(),
                    duration_secs: 120,
                },
            )
            .await;
        pipeline.execute_confirm(CHAT, USER).await;
        assert_eq!(
            pipeline.sessions.state_of(USER).await,
            Some(TrimState::AwaitingStart)
        );
    }

    #[tokio::test]
    async fn test_failed_confirmation_cancels_the_session() {
        let mut mock = MockChatDelivery::new();
        mock.expect_send_choices().returning(|_, _, _| Ok(MessageId(1)));
        mock.expect_send_text()
            .withf(|_, text| text.contains("Processing audio cut"))
            .times(1)
            .returning(|_, _| Ok(MessageId(2)));
        mock.expect_file_link()
            .returning(|_| Ok("/nonexistent/source-audio.mp3".to_string()));
        mock.expect_edit_text()
            .withf(|_, _, text| text.contains("Failed to cut audio"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let pipeline = pipeline_with(mock);
        pipeline
            .begin_cut(
                CHAT,
                USER,
                AudioSource {
                    file_ref: "file-a".to_string(),
                    duration_secs: 300,
                },
            )
            .await;
        pipeline.sessions.select_start(USER, 0).await.unwrap();
        pipeline.sessions.select_end(USER, 30).await.unwrap();

        pipeline.execute_confirm(CHAT, USER).await;

        // The fetch failed, so the session was cancelled, not retried.
        assert_eq!(pipeline.sessions.state_of(USER).await, None);
    }

    #[tokio::test]
    async fn test_unknown_callback_payloads_are_ignored() {
        // No expectations set: any delivery call would panic the mock.
        let pipeline = pipeline_with(MockChatDelivery::new());
        pipeline.handle_callback(CHAT, USER, "something:else").await;
    }

    #[tokio::test]
    async fn test_cut_without_reply_audio_asks_for_one() {
        let mut mock = MockChatDelivery::new();
        mock.expect_send_text()
            .withf(|_, text| text.contains("Reply to an audio message"))
            .times(1)
            .returning(|_, _| Ok(MessageId(1)));

        let pipeline = pipeline_with(mock);
        pipeline
            .handle_cut_command(CHAT, USER, "start=00:30", None)
            .await;
    }

    #[test]
    fn test_is_time_token() {
        assert!(is_time_token("01:30"));
        assert!(is_time_token("45"));
        assert!(is_time_token("1:02:03"));
        assert!(!is_time_token("rick astley"));
        assert!(!is_time_token(""));
        assert!(!is_time_token("/cut"));
    }
}
