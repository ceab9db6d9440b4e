//! Transcription pipeline
//!
//! Single pass over the segment stream produced by a speech model: copy
//! segments and word timings into the result, accumulate the full text and
//! emit progress by processed audio duration.

use std::path::Path;
use std::time::Instant;

use clipsight_config::{Settings, TranscriptionConfig};
use clipsight_core::{
    Result, Segment, SpeechModel, TranscribeOptions, TranscribeRequest, TranscriptionResult,
    VadOptions, Word,
};

use crate::progress::{ProgressSender, TranscriptionProgress};
use crate::stt::SpeechModelManager;

pub struct TranscriptionService {
    config: TranscriptionConfig,
    model: SpeechModelManager,
}

impl TranscriptionService {
    pub fn new(settings: &Settings) -> Self {
        Self {
            config: settings.transcription.clone(),
            model: SpeechModelManager::new(settings.transcription.clone()),
        }
    }

    /// Service with an injected model, bypassing lazy loading.
    pub fn with_model(settings: &Settings, model: std::sync::Arc<dyn SpeechModel>) -> Self {
        Self {
            config: settings.transcription.clone(),
            model: SpeechModelManager::with_model(settings.transcription.clone(), model),
        }
    }

    fn options(&self) -> TranscribeOptions {
        TranscribeOptions {
            beam_size: self.config.beam_size,
            word_timestamps: true,
            vad: VadOptions {
                enabled: self.config.vad_filter,
                threshold: self.config.vad_threshold,
                min_speech_duration_ms: self.config.min_speech_duration_ms,
                min_silence_duration_ms: self.config.min_silence_duration_ms,
            },
        }
    }

    /// Run one transcription job.
    pub fn process(
        &self,
        request: &TranscribeRequest,
        progress: Option<&ProgressSender<TranscriptionProgress>>,
    ) -> Result<TranscriptionResult> {
        tracing::info!(video = %request.video_path, "Starting transcription");
        let start = Instant::now();

        let model = self.model.get()?;
        let stream = match model.transcribe(Path::new(&request.video_path), &self.options()) {
            Ok(stream) => stream,
            Err(e) if e.is_no_audio() => {
                tracing::warn!(video = %request.video_path, "No audio in video");
                return Ok(TranscriptionResult::empty());
            }
            Err(e) => return Err(e),
        };

        let total_duration = stream.info.duration;
        let mut segments: Vec<Segment> = Vec::new();
        let mut full_text = String::new();
        let mut processed_duration = 0.0_f64;

        for segment in stream.segments {
            let segment = match segment {
                Ok(segment) => segment,
                Err(e) if e.is_no_audio() => {
                    tracing::warn!(video = %request.video_path, "No audio in video");
                    return Ok(TranscriptionResult::empty());
                }
                Err(e) => return Err(e),
            };

            full_text.push_str(&segment.text);
            full_text.push(' ');

            segments.push(Segment {
                id: segment.id,
                start: segment.start,
                end: segment.end,
                text: segment.text.trim().to_string(),
                confidence: segment.avg_logprob,
                words: segment
                    .words
                    .into_iter()
                    .map(|word| Word {
                        start: word.start,
                        end: word.end,
                        word: word.word,
                        confidence: word.probability,
                    })
                    .collect(),
            });

            processed_duration += segments.last().map(|s| s.end - s.start).unwrap_or(0.0);
            if let Some(progress) = progress {
                if total_duration > 0.0 {
                    let percent =
                        (processed_duration / total_duration * 100.0).min(100.0) as u32;
                    progress.send(TranscriptionProgress {
                        progress: percent,
                        elapsed: format_time(processed_duration),
                    });
                }
            }
        }

        let processing_time = start.elapsed().as_secs_f64();
        if let Some(progress) = progress {
            progress.send_final(TranscriptionProgress {
                progress: 100,
                elapsed: format_time(processing_time),
            });
        }

        tracing::info!(
            video = %request.video_path,
            segments = segments.len(),
            seconds = format_args!("{processing_time:.1}"),
            "Transcription completed"
        );

        Ok(TranscriptionResult {
            text: full_text.trim().to_string(),
            segments,
            language: stream
                .info
                .language
                .unwrap_or_else(|| "unknown".to_string()),
            processing_time,
        })
    }
}

/// Seconds as MM:SS.
fn format_time(seconds: f64) -> String {
    let minutes = (seconds / 60.0) as u64;
    let secs = (seconds % 60.0) as u64;
    format!("{minutes:02}:{secs:02}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipsight_core::{Error, SpeechInfo, SpeechSegment, SpeechStream, SpeechWord};
    use std::sync::Arc;

    struct ScriptedModel {
        segments: Vec<SpeechSegment>,
        duration: f64,
        fail_with: Option<fn() -> Error>,
    }

    impl SpeechModel for ScriptedModel {
        fn transcribe(
            &self,
            _media_path: &Path,
            _options: &TranscribeOptions,
        ) -> Result<SpeechStream> {
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            Ok(SpeechStream {
                info: SpeechInfo {
                    language: Some("en".to_string()),
                    duration: self.duration,
                },
                segments: Box::new(self.segments.clone().into_iter().map(Ok)),
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn speech_segment(id: i64, start: f64, end: f64, text: &str) -> SpeechSegment {
        SpeechSegment {
            id,
            start,
            end,
            text: text.to_string(),
            avg_logprob: Some(-0.3),
            words: vec![SpeechWord {
                start,
                end: (start + end) / 2.0,
                word: text.split_whitespace().next().unwrap_or("").to_string(),
                probability: Some(0.9),
            }],
        }
    }

    fn service(model: ScriptedModel) -> TranscriptionService {
        TranscriptionService::with_model(&Settings::default(), Arc::new(model))
    }

    fn request() -> TranscribeRequest {
        TranscribeRequest {
            video_path: "/v/a.mp4".to_string(),
            json_file_path: "/tmp/out.json".to_string(),
            job_id: "job-1".to_string(),
        }
    }

    #[test]
    fn test_full_text_accumulates_and_trims() {
        let service = service(ScriptedModel {
            segments: vec![
                speech_segment(0, 0.0, 2.0, " hello world "),
                speech_segment(1, 2.0, 4.0, " again "),
            ],
            duration: 4.0,
            fail_with: None,
        });

        let result = service.process(&request(), None).unwrap();
        assert_eq!(result.text, "hello world   again");
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[0].text, "hello world");
        assert_eq!(result.language, "en");
    }

    #[test]
    fn test_word_spans_stay_within_segment_spans() {
        let service = service(ScriptedModel {
            segments: vec![speech_segment(0, 1.0, 3.0, "inside")],
            duration: 3.0,
            fail_with: None,
        });
        let result = service.process(&request(), None).unwrap();
        let segment = &result.segments[0];
        for word in &segment.words {
            assert!(segment.start <= word.start);
            assert!(word.start <= word.end);
            assert!(word.end <= segment.end);
        }
    }

    #[test]
    fn test_progress_monotonic_and_final_is_100() {
        let service = service(ScriptedModel {
            segments: vec![
                speech_segment(0, 0.0, 5.0, "a"),
                speech_segment(1, 5.0, 10.0, "b"),
            ],
            duration: 10.0,
            fail_with: None,
        });
        let (sender, mut rx) = ProgressSender::<TranscriptionProgress>::channel();

        std::thread::spawn(move || service.process(&request(), Some(&sender)).unwrap())
            .join()
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(events.len() >= 3);
        assert!(events.windows(2).all(|w| w[0].progress <= w[1].progress));
        assert_eq!(events.last().unwrap().progress, 100);
    }

    #[test]
    fn test_no_audio_sentinel_returns_empty_result() {
        let service = service(ScriptedModel {
            segments: Vec::new(),
            duration: 0.0,
            fail_with: Some(|| Error::Transcription("tuple index out of range".to_string())),
        });
        let result = service.process(&request(), None).unwrap();
        assert!(result.text.is_empty());
        assert_eq!(result.language, "N/A");
    }

    #[test]
    fn test_real_failures_propagate() {
        let service = service(ScriptedModel {
            segments: Vec::new(),
            duration: 0.0,
            fail_with: Some(|| Error::Transcription("backend exploded".to_string())),
        });
        assert!(service.process(&request(), None).is_err());
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "00:00");
        assert_eq!(format_time(75.4), "01:15");
        assert_eq!(format_time(600.0), "10:00");
    }
}
