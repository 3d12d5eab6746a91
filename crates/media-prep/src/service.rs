//! The preprocess service behind `POST /api/video_preprocess`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use webreel_common::{EngineConfig, WebreelError, WebreelResult, Workspace};
use webreel_model::AudioDescriptor;
use webreel_runtime::{PayloadBuilder, VideoConfig};

use crate::download::DownloadCache;
use crate::probe;
use crate::transcode;

/// Result of one preprocess call: the packed payload for the page and
/// the audio descriptor for the host mixer, when audio survived.
#[derive(Debug)]
pub struct ProcessedMedia {
    pub payload: Vec<u8>,
    pub audio: Option<AudioDescriptor>,
}

/// Host-side downloader + transcoder.
pub struct Preprocessor {
    cache: DownloadCache,
    processes: Arc<Semaphore>,
    demux_timeout: Duration,
    retry_delay: Duration,
    next_audio_id: AtomicU64,
}

impl Preprocessor {
    pub fn new(workspace: &Workspace, config: &EngineConfig) -> Self {
        Self {
            cache: DownloadCache::new(workspace.preprocessor_dir(), config.num_downloads),
            processes: Arc::new(Semaphore::new(config.num_processes.max(1))),
            demux_timeout: Duration::from_millis(config.timeouts.demux_ms),
            retry_delay: Duration::from_millis(1000),
            next_audio_id: AtomicU64::new(1),
        }
    }

    /// Serve one VideoConfig. `Ok(None)` means the media is skippable
    /// (the origin rejected it with a 4xx).
    pub async fn process(&self, config: &VideoConfig) -> WebreelResult<Option<ProcessedMedia>> {
        config.validate()?;

        let Some(main_path) = self
            .cache
            .fetch(
                &config.url,
                source_extension(&config.url),
                config.ignore_cache,
                config.retry_fetchs,
                self.retry_delay,
            )
            .await?
        else {
            return Ok(None);
        };

        let main_probe = probe::probe(&main_path).await?;

        let _permit = self
            .processes
            .acquire()
            .await
            .map_err(|_| WebreelError::preprocess("process semaphore closed"))?;

        // Downstream demuxing needs an MP4-compatible input, so WebM
        // main tracks are transcoded to H.264.
        let mp4_path = if main_probe.is_webm() {
            let out = self.cache.derived_path(&config.url, "_transcoded.mp4");
            if !out.exists() || config.ignore_cache {
                transcode::run_ffmpeg(
                    &transcode::h264_transcode_args(&main_path, &out),
                    self.demux_timeout,
                )
                .await?;
            }
            out
        } else {
            main_path.clone()
        };

        let mask_path = self.prepare_mask(config, &main_path, &main_probe).await?;

        let audio_path = if !config.muted && main_probe.has_audio {
            let out = self.cache.derived_path(&config.url, ".mp3");
            if !out.exists() || config.ignore_cache {
                transcode::run_ffmpeg(
                    &transcode::audio_demux_args(&main_path, &out),
                    self.demux_timeout,
                )
                .await?;
            }
            // The audio file's existence alone decides registration.
            out.exists().then_some(out)
        } else {
            None
        };

        let has_clip = config.seek_start.is_some() || config.seek_end.is_some();
        let (main_bytes, mask_bytes) = if has_clip {
            let seek_start = config.seek_start.unwrap_or(0.0);
            let main = transcode::run_ffmpeg_to_memory(
                &transcode::clip_args(&mp4_path, seek_start, config.seek_end),
                self.demux_timeout,
            )
            .await?;
            let mask = match &mask_path {
                Some(path) => Some(
                    transcode::run_ffmpeg_to_memory(
                        &transcode::clip_args(path, seek_start, config.seek_end),
                        self.demux_timeout,
                    )
                    .await?,
                ),
                None => None,
            };
            (main, mask)
        } else {
            let main = tokio::fs::read(&mp4_path).await?;
            let mask = match &mask_path {
                Some(path) => Some(tokio::fs::read(path).await?),
                None => None,
            };
            (main, mask)
        };

        let audio = audio_path.map(|path| {
            let id = self.next_audio_id.fetch_add(1, Ordering::Relaxed);
            config.audio_descriptor(id, path.display().to_string())
        });

        let mut builder = PayloadBuilder::new()
            .field("hasMask", mask_bytes.is_some())
            .field("hasAudio", audio.is_some())
            .field("hasClip", has_clip)
            .buffer("buffer", &main_bytes);
        if let Some(mask) = &mask_bytes {
            builder = builder.buffer("maskBuffer", mask);
        }

        tracing::info!(
            url = %config.url,
            main_bytes = main_bytes.len(),
            mask = mask_bytes.is_some(),
            audio = audio.is_some(),
            clip = has_clip,
            "media preprocessed"
        );

        Ok(Some(ProcessedMedia {
            payload: builder.finish(),
            audio,
        }))
    }

    /// Mask track: an explicit mask source wins; otherwise a
    /// transparent main track has its alpha plane extracted.
    async fn prepare_mask(
        &self,
        config: &VideoConfig,
        main_path: &std::path::Path,
        main_probe: &probe::MediaProbe,
    ) -> WebreelResult<Option<PathBuf>> {
        if let Some(mask_url) = &config.mask_url {
            let Some(downloaded) = self
                .cache
                .fetch(
                    mask_url,
                    source_extension(mask_url),
                    config.ignore_cache,
                    config.retry_fetchs,
                    self.retry_delay,
                )
                .await?
            else {
                return Ok(None);
            };
            let mask_probe = probe::probe(&downloaded).await?;
            let out = self.cache.derived_path(mask_url, "_mask.mp4");
            if !out.exists() || config.ignore_cache {
                let args = if mask_probe.has_alpha {
                    transcode::alpha_mask_args(&downloaded, &out)
                } else {
                    transcode::h264_transcode_args(&downloaded, &out)
                };
                transcode::run_ffmpeg(&args, self.demux_timeout).await?;
            }
            return Ok(Some(out));
        }

        if main_probe.has_alpha {
            let out = self.cache.derived_path(&config.url, "_mask.mp4");
            if !out.exists() || config.ignore_cache {
                transcode::run_ffmpeg(
                    &transcode::alpha_mask_args(main_path, &out),
                    self.demux_timeout,
                )
                .await?;
            }
            return Ok(Some(out));
        }

        Ok(None)
    }
}

/// Cache extension for a source URL, defaulting to mp4.
fn source_extension(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    for ext in ["webm", "mkv", "mp4"] {
        if path.to_ascii_lowercase().ends_with(&format!(".{ext}")) {
            return match ext {
                "webm" => "webm",
                "mkv" => "mkv",
                _ => "mp4",
            };
        }
    }
    "mp4"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_extension_strips_query_strings() {
        assert_eq!(source_extension("https://a.test/v.webm?sig=abc"), "webm");
        assert_eq!(source_extension("https://a.test/v.MKV"), "mkv");
        assert_eq!(source_extension("https://a.test/v.mp4"), "mp4");
        assert_eq!(source_extension("https://a.test/stream"), "mp4");
    }
}
