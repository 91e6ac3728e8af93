//! Caption track retrieval.
//!
//! Captions are scraped from the watch page's player config rather than an
//! official endpoint: extract the `captionTracks` JSON block, pick a track
//! for the requested language, then fetch and parse the track XML. An empty
//! result means the video has no usable track for that language; errors are
//! reserved for retrieval failures.

use crate::error::{GranskaError, Result};
use crate::media::MediaRef;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// One timed caption line.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionFragment {
    pub text: String,
    pub start: f64,
    pub dur: f64,
}

/// Join fragments into a single transcript candidate.
pub fn join_fragments(fragments: &[CaptionFragment]) -> String {
    fragments
        .iter()
        .map(|f| f.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Source of caption fragments for remote media.
#[async_trait]
pub trait CaptionProvider: Send + Sync {
    /// Fetch caption fragments in `language`. Empty means no track exists
    /// for that language.
    async fn fetch(&self, media: &MediaRef, language: &str) -> Result<Vec<CaptionFragment>>;
}

/// Caption provider backed by the public YouTube watch page.
pub struct YoutubeCaptions {
    http: reqwest::Client,
}

impl YoutubeCaptions {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self { http }
    }
}

impl Default for YoutubeCaptions {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptionProvider for YoutubeCaptions {
    #[instrument(skip(self), fields(media = %media.id(), language))]
    async fn fetch(&self, media: &MediaRef, language: &str) -> Result<Vec<CaptionFragment>> {
        let page = self
            .http
            .get(media.watch_url())
            .header("accept-language", "en-US,en;q=0.9")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let tracks = match extract_caption_tracks(&page)? {
            Some(tracks) => tracks,
            None => {
                debug!("No caption tracks on watch page");
                return Ok(Vec::new());
            }
        };

        let track = match select_track(&tracks, language) {
            Some(track) => track,
            None => {
                debug!("No caption track for language {}", language);
                return Ok(Vec::new());
            }
        };

        let track_url = Url::parse(&track.base_url)
            .map_err(|e| GranskaError::Captions(format!("Bad caption track URL: {}", e)))?;

        let xml = self
            .http
            .get(track_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let fragments = parse_track_xml(&xml);
        debug!("Fetched {} caption fragments", fragments.len());
        Ok(fragments)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptionTrack {
    base_url: String,
    #[serde(default)]
    vss_id: String,
    #[serde(default)]
    language_code: String,
}

/// Pull the `captionTracks` array out of the watch page HTML. `None` when
/// the page carries no caption config at all.
fn extract_caption_tracks(page: &str) -> Result<Option<Vec<CaptionTrack>>> {
    static TRACKS: OnceLock<Regex> = OnceLock::new();
    let re = TRACKS.get_or_init(|| {
        Regex::new(r#""captionTracks":(\[.*?\])"#).expect("Invalid regex")
    });

    let Some(caps) = re.captures(page) else {
        return Ok(None);
    };

    let tracks: Vec<CaptionTrack> = serde_json::from_str(&caps[1])
        .map_err(|e| GranskaError::Captions(format!("Unparseable caption track list: {}", e)))?;
    Ok(Some(tracks))
}

/// Manually published tracks (".lang") win over auto-generated ones
/// ("a.lang"), then plain language-code match.
fn select_track<'a>(tracks: &'a [CaptionTrack], language: &str) -> Option<&'a CaptionTrack> {
    let manual = format!(".{}", language);
    let auto = format!("a.{}", language);

    tracks
        .iter()
        .find(|t| t.vss_id == manual)
        .or_else(|| tracks.iter().find(|t| t.vss_id == auto))
        .or_else(|| tracks.iter().find(|t| t.language_code == language))
}

/// Parse timedtext XML into fragments, dropping empty lines.
fn parse_track_xml(xml: &str) -> Vec<CaptionFragment> {
    static TEXT_NODE: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    let node_re = TEXT_NODE.get_or_init(|| {
        Regex::new(r#"(?s)<text start="([0-9.]+)"(?: dur="([0-9.]+)")?[^>]*>(.*?)</text>"#)
            .expect("Invalid regex")
    });
    let tag_re = TAG.get_or_init(|| Regex::new(r"<[^>]+>").expect("Invalid regex"));

    node_re
        .captures_iter(xml)
        .filter_map(|caps| {
            let start = caps[1].parse().ok()?;
            let dur = caps
                .get(2)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0.0);
            let raw = tag_re.replace_all(&caps[3], "");
            let text = decode_entities(&raw).trim().to_string();
            if text.is_empty() {
                None
            } else {
                Some(CaptionFragment { text, start, dur })
            }
        })
        .collect()
}

/// Decode the entities YouTube emits in timedtext payloads, including the
/// double-encoded form ("&amp;#39;").
fn decode_entities(text: &str) -> String {
    static NUMERIC: OnceLock<Regex> = OnceLock::new();
    let re = NUMERIC.get_or_init(|| Regex::new(r"&#(\d+);").expect("Invalid regex"));

    let text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'");

    re.replace_all(&text, |caps: &regex::Captures| {
        caps[1]
            .parse::<u32>()
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_SNIPPET: &str = r#"var ytInitialPlayerResponse = {"captions":{"playerCaptionsTracklistRenderer":{"captionTracks":[{"baseUrl":"https://www.youtube.com/api/timedtext?v=abc&lang=en","vssId":".en","languageCode":"en"},{"baseUrl":"https://www.youtube.com/api/timedtext?v=abc&lang=en&kind=asr","vssId":"a.en","languageCode":"en"},{"baseUrl":"https://www.youtube.com/api/timedtext?v=abc&lang=sv","vssId":".sv","languageCode":"sv"}]}}};"#;

    #[test]
    fn test_extract_caption_tracks() {
        let tracks = extract_caption_tracks(PAGE_SNIPPET).unwrap().unwrap();
        assert_eq!(tracks.len(), 3);
        assert_eq!(tracks[0].vss_id, ".en");
        // serde unescapes the & into a literal ampersand
        assert!(tracks[0].base_url.contains("v=abc&lang=en"));
    }

    #[test]
    fn test_extract_without_tracks() {
        assert!(extract_caption_tracks("<html>no captions here</html>")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_select_track_prefers_manual() {
        let tracks = extract_caption_tracks(PAGE_SNIPPET).unwrap().unwrap();
        assert_eq!(select_track(&tracks, "en").unwrap().vss_id, ".en");
        assert_eq!(select_track(&tracks, "sv").unwrap().vss_id, ".sv");
        assert!(select_track(&tracks, "de").is_none());
    }

    #[test]
    fn test_select_track_by_language_code() {
        let tracks = vec![CaptionTrack {
            base_url: "https://example.com/t".to_string(),
            vss_id: String::new(),
            language_code: "en".to_string(),
        }];
        assert!(select_track(&tracks, "en").is_some());
    }

    #[test]
    fn test_parse_track_xml() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?><transcript>
<text start="0.24" dur="3.2">Hello &amp; welcome</text>
<text start="3.44" dur="2.0"><b>it&amp;#39;s</b> a test</text>
<text start="5.44" dur="1.0">   </text>
<text start="6.44">no duration</text>
</transcript>"#;

        let fragments = parse_track_xml(xml);
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].text, "Hello & welcome");
        assert_eq!(fragments[0].start, 0.24);
        assert_eq!(fragments[0].dur, 3.2);
        assert_eq!(fragments[1].text, "it's a test");
        assert_eq!(fragments[2].text, "no duration");
        assert_eq!(fragments[2].dur, 0.0);
    }

    #[test]
    fn test_join_fragments() {
        let fragments = vec![
            CaptionFragment { text: "one".to_string(), start: 0.0, dur: 1.0 },
            CaptionFragment { text: "two".to_string(), start: 1.0, dur: 1.0 },
        ];
        assert_eq!(join_fragments(&fragments), "one two");
        assert_eq!(join_fragments(&[]), "");
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("a &amp; b"), "a & b");
        assert_eq!(decode_entities("&quot;hi&quot;"), "\"hi\"");
        assert_eq!(decode_entities("&#8211; dash"), "\u{2013} dash");
        assert_eq!(decode_entities("&amp;#39;"), "'");
    }
}
