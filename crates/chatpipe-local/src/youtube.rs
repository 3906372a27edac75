//! YouTube transcripts.
//!
//! Caption tracks are enumerated with `yt-dlp -J` (it already tracks YouTube's moving
//! target); the chosen track's WebVTT is downloaded through the regular fetch backend.

use crate::PipelineConfig;
use chatpipe_core::{
    Error, FetchBackend, FetchRequest, Result, TranscriptSegment, TranscriptService,
    TranscriptTrack,
};
use regex::Regex;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};

pub const NO_VIDEO_ID: &str = "Please provide a valid YouTube URL or video ID";

static VIDEO_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/)([a-zA-Z0-9_-]{11})")
        .expect("video url regex is valid")
});
static VIDEO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{11}$").expect("video id regex is valid"));
static VTT_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("vtt tag regex is valid"));

/// Video id from a watch/short/embed URL anywhere in `input`, or `input` itself when it
/// is a bare 11-character id.
pub fn extract_video_id(input: &str) -> Option<String> {
    if let Some(c) = VIDEO_URL_RE.captures(input) {
        return c.get(1).map(|m| m.as_str().to_string());
    }
    VIDEO_ID_RE.find(input).map(|m| m.as_str().to_string())
}

/// English first (`en`, then any `en-*`), otherwise whatever the service listed first.
pub fn pick_track(tracks: &[TranscriptTrack]) -> Option<&TranscriptTrack> {
    tracks
        .iter()
        .find(|t| t.language_code.eq_ignore_ascii_case("en"))
        .or_else(|| {
            tracks
                .iter()
                .find(|t| t.language_code.to_ascii_lowercase().starts_with("en-"))
        })
        .or_else(|| tracks.first())
}

/// Transcript text for the video referenced by `input`.
///
/// Never fails: a missing id or any service error comes back as a message string.
pub async fn transcript_text(service: &dyn TranscriptService, input: &str) -> String {
    let Some(video_id) = extract_video_id(input) else {
        return NO_VIDEO_ID.to_string();
    };
    match fetch_transcript(service, &video_id).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(video_id = %video_id, error = %e, "transcript unavailable");
            format!("Error getting transcript: {e}")
        }
    }
}

async fn fetch_transcript(service: &dyn TranscriptService, video_id: &str) -> Result<String> {
    let tracks = service.list_tracks(video_id).await?;
    let track = pick_track(&tracks)
        .ok_or_else(|| Error::Transcript(format!("no transcripts available for {video_id}")))?;
    tracing::debug!(video_id, lang = %track.language_code, generated = track.is_generated, "using caption track");
    let segments = service.fetch_segments(video_id, track).await?;
    Ok(segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" "))
}

/// Caption tracks listed in a `yt-dlp -J` info document: manual subtitles first, then
/// automatic captions. Only tracks offering a WebVTT rendition are kept.
pub fn tracks_from_info(info: &serde_json::Value) -> Vec<TranscriptTrack> {
    let mut out = Vec::new();
    for (key, is_generated) in [("subtitles", false), ("automatic_captions", true)] {
        let Some(langs) = info.get(key).and_then(|v| v.as_object()) else {
            continue;
        };
        for (code, formats) in langs {
            if code == "live_chat" {
                continue;
            }
            let Some(formats) = formats.as_array() else {
                continue;
            };
            let Some(vtt) = formats
                .iter()
                .find(|f| f.get("ext").and_then(|e| e.as_str()) == Some("vtt"))
            else {
                continue;
            };
            let Some(url) = vtt.get("url").and_then(|u| u.as_str()) else {
                continue;
            };
            out.push(TranscriptTrack {
                language_code: code.clone(),
                language: vtt
                    .get("name")
                    .and_then(|n| n.as_str())
                    .map(|s| s.to_string()),
                is_generated,
                source_url: Some(url.to_string()),
            });
        }
    }
    out
}

fn parse_timestamp(s: &str) -> Option<f64> {
    let s = s.trim().replace(',', ".");
    let mut secs = 0.0;
    for part in s.split(':') {
        secs = secs * 60.0 + part.parse::<f64>().ok()?;
    }
    Some(secs)
}

/// WebVTT cues as segments. Inline tags are stripped and a cue repeating the previous
/// cue's text (rolling auto-captions) is dropped.
pub fn parse_vtt(vtt: &str) -> Vec<TranscriptSegment> {
    let mut out: Vec<TranscriptSegment> = Vec::new();
    let mut lines = vtt.lines().peekable();
    while let Some(line) = lines.next() {
        let Some((from, rest)) = line.split_once("-->") else {
            continue;
        };
        let to = rest.split_whitespace().next().unwrap_or("");
        let (Some(start), Some(end)) = (parse_timestamp(from), parse_timestamp(to)) else {
            continue;
        };

        let mut words: Vec<String> = Vec::new();
        while let Some(text) = lines.peek() {
            if text.trim().is_empty() {
                break;
            }
            let cleaned = VTT_TAG_RE.replace_all(text, "");
            let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
            if !cleaned.is_empty() {
                words.push(cleaned);
            }
            lines.next();
        }
        let text = words.join(" ");
        if text.is_empty() || out.last().map(|s| s.text == text).unwrap_or(false) {
            continue;
        }
        out.push(TranscriptSegment {
            text,
            start,
            duration: (end - start).max(0.0),
        });
    }
    out
}

/// [`TranscriptService`] backed by a local `yt-dlp` binary.
pub struct YtDlpTranscripts {
    fetcher: Arc<dyn FetchBackend>,
    cfg: PipelineConfig,
}

impl YtDlpTranscripts {
    pub fn new(fetcher: Arc<dyn FetchBackend>, cfg: PipelineConfig) -> Self {
        Self { fetcher, cfg }
    }

    async fn probe(&self, video_id: &str) -> Result<serde_json::Value> {
        let mut cmd = tokio::process::Command::new(&self.cfg.ytdlp_bin);
        cmd.arg("-J")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg(format!("https://www.youtube.com/watch?v={video_id}"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let out = tokio::time::timeout(self.cfg.timeout, cmd.output())
            .await
            .map_err(|_| Error::Transcript("yt-dlp timed out".to_string()))?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::Transcript(format!("{} not found", self.cfg.ytdlp_bin))
                } else {
                    Error::Transcript(format!("yt-dlp failed to start: {e}"))
                }
            })?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("non-zero exit");
            return Err(Error::Transcript(reason.trim().to_string()));
        }
        serde_json::from_slice(&out.stdout)
            .map_err(|e| Error::Transcript(format!("unreadable yt-dlp output: {e}")))
    }
}

#[async_trait::async_trait]
impl TranscriptService for YtDlpTranscripts {
    async fn list_tracks(&self, video_id: &str) -> Result<Vec<TranscriptTrack>> {
        let info = self.probe(video_id).await?;
        Ok(tracks_from_info(&info))
    }

    async fn fetch_segments(
        &self,
        video_id: &str,
        track: &TranscriptTrack,
    ) -> Result<Vec<TranscriptSegment>> {
        let url = match &track.source_url {
            Some(u) => u.clone(),
            None => {
                // Track came from elsewhere; look it up again.
                tracks_from_info(&self.probe(video_id).await?)
                    .into_iter()
                    .find(|t| {
                        t.language_code == track.language_code
                            && t.is_generated == track.is_generated
                    })
                    .and_then(|t| t.source_url)
                    .ok_or_else(|| {
                        Error::Transcript(format!("no {} track", track.language_code))
                    })?
            }
        };
        let req = FetchRequest::get(url)
            .with_timeout(self.cfg.timeout)
            .with_header("User-Agent", self.cfg.user_agent.as_str());
        let resp = self.fetcher.fetch(&req).await?.error_for_status()?;
        Ok(parse_vtt(&resp.text_lossy()))
    }
}
