//! HLS playlist rewriting: route playlists and segments through the local proxy and
//! record what the engine needs to know about them.
//!
//! Parsing is done with `m3u8-rs`; rewriting walks the raw text line by line so every
//! byte outside a URI survives unchanged. The k-th URI line of a media playlist maps to
//! the k-th parsed segment, the k-th URI line of a multivariant playlist to the k-th
//! non I-frame variant.

use m3u8_rs::{AlternativeMediaType, MasterPlaylist, MediaPlaylist, Playlist};

use crate::playback::PlaybackProvider;
use crate::protocol::{ByteRange, Segment, Stream, StreamType, UpdateStreamParams};
use crate::registry::{SegmentRepository, StreamRegistry, UpdateParamsStore};
use crate::urls::{self, UrlError};

const TAG_MEDIA: &str = "#EXT-X-MEDIA:";
const TAG_MAP: &str = "#EXT-X-MAP:";

#[derive(Debug, thiserror::Error)]
pub enum PlaylistError {
    #[error("unparseable playlist: {0}")]
    Parse(String),
    #[error(transparent)]
    Url(#[from] UrlError),
    #[error("playlist has {found} uri lines, parsed {expected} entries")]
    UriCount { expected: usize, found: usize },
    #[error("media sequence {0} leaves no room for the playlist's segments")]
    SequenceOverflow(u64),
}

/// Mutable state a parse reads and updates.
pub struct ParseContext<'a> {
    pub manifest_url: &'a str,
    pub server_port: u16,
    pub streams: &'a mut StreamRegistry,
    pub segments: &'a mut SegmentRepository,
    pub updates: &'a mut UpdateParamsStore,
    pub playback: &'a dyn PlaybackProvider,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RewriteKind {
    Multivariant {
        streams_added: usize,
    },
    Media {
        update: UpdateStreamParams,
        stream_added: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rewritten {
    pub body: String,
    pub kind: RewriteKind,
}

/// Parse `raw` and rewrite it for the proxy on `ctx.server_port`.
pub fn rewrite_playlist(ctx: &mut ParseContext<'_>, raw: &str) -> Result<Rewritten, PlaylistError> {
    let parsed = m3u8_rs::parse_playlist_res(raw.as_bytes())
        .map_err(|e| PlaylistError::Parse(format!("{:?}", e)))?;
    match parsed {
        Playlist::MasterPlaylist(master) => rewrite_multivariant(ctx, &master, raw),
        Playlist::MediaPlaylist(media) => rewrite_media(ctx, &media, raw),
    }
}

fn rewrite_multivariant(
    ctx: &mut ParseContext<'_>,
    master: &MasterPlaylist,
    raw: &str,
) -> Result<Rewritten, PlaylistError> {
    let manifest_url = ctx.manifest_url;
    let port = ctx.server_port;
    let mut staged = Vec::new();

    let mut variant_lines = Vec::new();
    for (index, variant) in master.variants.iter().filter(|v| !v.is_i_frame).enumerate() {
        let stream_url = urls::absolute_url(manifest_url, &variant.uri)?;
        variant_lines.push(urls::local_url(port, &urls::manifest_path(&stream_url)));
        staged.push(Stream {
            runtime_id: stream_url,
            stream_type: StreamType::Main,
            index: index as u32,
            master_manifest_url: Some(manifest_url.to_string()),
        });
    }

    let mut out = String::with_capacity(raw.len() * 2);
    let mut variants = variant_lines.into_iter();
    let mut found_uris = 0usize;
    let mut renditions = master.alternatives.iter();
    let mut audio_index = 0u32;

    for (content, ending) in lines(raw) {
        if content.starts_with('#') {
            let rewritten = if content.starts_with(TAG_MEDIA) {
                let rendition = renditions.next();
                let is_audio =
                    rendition.is_some_and(|r| matches!(r.media_type, AlternativeMediaType::Audio));
                replace_uri_attr(content, |uri| {
                    let abs = urls::absolute_url(manifest_url, uri)?;
                    if !is_audio {
                        return Ok(abs);
                    }
                    staged.push(Stream {
                        runtime_id: abs.clone(),
                        stream_type: StreamType::Secondary,
                        index: audio_index,
                        master_manifest_url: Some(manifest_url.to_string()),
                    });
                    audio_index += 1;
                    Ok(urls::local_url(port, &urls::manifest_path(&abs)))
                })?
            } else {
                replace_uri_attr(content, |uri| Ok(urls::absolute_url(manifest_url, uri)?))?
            };
            out.push_str(&rewritten);
        } else if content.trim().is_empty() {
            out.push_str(content);
        } else {
            found_uris += 1;
            match variants.next() {
                Some(line) => out.push_str(&line),
                None => {
                    return Err(PlaylistError::UriCount {
                        expected: found_uris - 1,
                        found: found_uris,
                    })
                }
            }
        }
        out.push_str(ending);
    }
    let remaining = variants.count();
    if remaining > 0 {
        return Err(PlaylistError::UriCount {
            expected: found_uris + remaining,
            found: found_uris,
        });
    }

    let streams_added = staged.len();
    for stream in staged {
        ctx.streams.add(stream);
    }
    Ok(Rewritten {
        body: out,
        kind: RewriteKind::Multivariant { streams_added },
    })
}

fn rewrite_media(
    ctx: &mut ParseContext<'_>,
    media: &MediaPlaylist,
    raw: &str,
) -> Result<Rewritten, PlaylistError> {
    let variant_url = ctx.manifest_url;
    let port = ctx.server_port;
    let is_live = !media.end_list;
    let media_sequence = media.media_sequence;
    let initial_start_time = if is_live {
        ctx.playback.absolute_playback_position()
    } else {
        0.0
    };

    // Nothing in ctx changes until the whole playlist has been rewritten.
    let mut runtime_ids = Vec::with_capacity(media.segments.len());
    let mut added = Vec::new();
    let mut prev_range: Option<(String, u64)> = None;
    let mut prev_end_time: Option<f64> = None;

    for (index, seg) in media.segments.iter().enumerate() {
        let url = urls::absolute_url(variant_url, &seg.uri)?;
        let byte_range = seg.byte_range.as_ref().and_then(|r| {
            let continued = match &prev_range {
                Some((prev_url, prev_end)) if *prev_url == url => prev_end.saturating_add(1),
                _ => 0,
            };
            resolve_byte_range(r.length, r.offset, continued)
        });
        prev_range = byte_range.map(|r| (url.clone(), r.end));

        let runtime_id = urls::segment_runtime_id(&url, byte_range);
        runtime_ids.push(runtime_id.clone());

        let external_id = u64::try_from(index)
            .ok()
            .and_then(|i| media_sequence.checked_add(i))
            .ok_or(PlaylistError::SequenceOverflow(media_sequence))?;
        if let Some(known) = ctx.segments.get_segment(variant_url, external_id) {
            prev_end_time = Some(known.end_time);
            continue;
        }
        let start_time = prev_end_time.unwrap_or(initial_start_time);
        let end_time = start_time + seg.duration as f64;
        prev_end_time = Some(end_time);
        added.push(Segment {
            runtime_id,
            external_id,
            url,
            byte_range,
            start_time,
            end_time,
        });
    }

    let mut out = String::with_capacity(raw.len() * 2);
    let mut ids_iter = runtime_ids.iter();
    let mut found_uris = 0usize;
    for (content, ending) in lines(raw) {
        if content.starts_with(TAG_MAP) {
            let map_range = attr_value(content, "BYTERANGE").and_then(parse_byterange_attr);
            out.push_str(&replace_uri_attr(content, |uri| {
                let abs = urls::absolute_url(variant_url, uri)?;
                let id = urls::segment_runtime_id(&abs, map_range);
                Ok(urls::local_url(port, &urls::segment_path(&id)))
            })?);
        } else if content.starts_with('#') {
            out.push_str(&replace_uri_attr(content, |uri| {
                Ok(urls::absolute_url(variant_url, uri)?)
            })?);
        } else if content.trim().is_empty() {
            out.push_str(content);
        } else {
            found_uris += 1;
            match ids_iter.next() {
                Some(id) => out.push_str(&urls::local_url(port, &urls::segment_path(id))),
                None => {
                    return Err(PlaylistError::UriCount {
                        expected: found_uris - 1,
                        found: found_uris,
                    })
                }
            }
        }
        out.push_str(ending);
    }
    let remaining = ids_iter.count();
    if remaining > 0 {
        return Err(PlaylistError::UriCount {
            expected: found_uris + remaining,
            found: found_uris,
        });
    }

    ctx.segments.clear_runtime_ids();
    for id in runtime_ids {
        ctx.segments.add_runtime_id(id);
    }
    let removed = ctx.segments.remove_obsolete(variant_url, media_sequence);
    for segment in &added {
        ctx.segments.add_segment(variant_url, segment.clone());
    }

    let update = UpdateStreamParams {
        stream_runtime_id: variant_url.to_string(),
        add_segments: added,
        remove_segment_ids: removed,
        is_live,
    };
    ctx.updates.put(variant_url, update.clone());

    let stream_added = ctx.streams.find(variant_url).is_none();
    if stream_added {
        ctx.streams.add(Stream {
            runtime_id: variant_url.to_string(),
            stream_type: StreamType::Main,
            index: 0,
            master_manifest_url: None,
        });
    }

    Ok(Rewritten {
        body: out,
        kind: RewriteKind::Media {
            update,
            stream_added,
        },
    })
}

/// `length` bytes at `offset`, or right after the previous sub-range when no offset is given.
fn resolve_byte_range(length: u64, offset: Option<u64>, continued: u64) -> Option<ByteRange> {
    if length == 0 {
        return None;
    }
    let start = offset.unwrap_or(continued);
    Some(ByteRange {
        start,
        end: start.checked_add(length - 1)?,
    })
}

/// `BYTERANGE="<n>[@<o>]"` attribute value (quotes already stripped).
fn parse_byterange_attr(value: &str) -> Option<ByteRange> {
    let (length, offset) = match value.split_once('@') {
        Some((l, o)) => (l.trim().parse().ok()?, Some(o.trim().parse().ok()?)),
        None => (value.trim().parse().ok()?, None),
    };
    resolve_byte_range(length, offset, 0)
}

/// Split into (line content, line ending) pairs, keeping `\r\n` / `\n` / nothing.
fn lines(raw: &str) -> impl Iterator<Item = (&str, &str)> {
    raw.split_inclusive('\n').map(|line| {
        let content = line.trim_end_matches(['\r', '\n']);
        (content, &line[content.len()..])
    })
}

/// Byte span of an attribute's value inside a tag line, without surrounding quotes.
fn attr_span(line: &str, name: &str) -> Option<(usize, usize)> {
    let needle = format!("{}=", name);
    let mut search_from = 0;
    while let Some(pos) = line[search_from..].find(&needle) {
        let at = search_from + pos;
        let boundary = at == 0 || matches!(line.as_bytes()[at - 1], b':' | b',');
        let value_start = at + needle.len();
        if boundary {
            let rest = &line[value_start..];
            if let Some(quoted) = rest.strip_prefix('"') {
                let end = quoted.find('"')?;
                return Some((value_start + 1, value_start + 1 + end));
            }
            let end = rest.find(',').unwrap_or(rest.len());
            return Some((value_start, value_start + end));
        }
        search_from = value_start;
    }
    None
}

fn attr_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    attr_span(line, name).map(|(s, e)| &line[s..e])
}

/// Rewrite the `URI` attribute of a tag line, if any.
fn replace_uri_attr<F>(line: &str, f: F) -> Result<String, PlaylistError>
where
    F: FnOnce(&str) -> Result<String, PlaylistError>,
{
    let Some((start, end)) = attr_span(line, "URI") else {
        return Ok(line.to_string());
    };
    let replacement = f(&line[start..end])?;
    let mut out = String::with_capacity(line.len() + replacement.len());
    out.push_str(&line[..start]);
    out.push_str(&replacement);
    out.push_str(&line[end..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::ExternalPlaybackProvider;
    use crate::protocol::PlaybackInfo;

    const MASTER_URL: &str = "https://cdn.example.com/live/master.m3u8";
    const VARIANT_URL: &str = "https://cdn.example.com/live/v720/index.m3u8";
    const PORT: u16 = 8081;

    const MASTER: &str = "#EXTM3U\n\
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"en\",DEFAULT=YES,URI=\"audio/en.m3u8\"\n\
#EXT-X-MEDIA:TYPE=SUBTITLES,GROUP-ID=\"subs\",NAME=\"en\",URI=\"subs/en.m3u8\"\n\
#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=1280x720,AUDIO=\"aud\"\n\
v720/index.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=640000,RESOLUTION=640x360,AUDIO=\"aud\"\n\
https://other.example.com/v360/index.m3u8\n\
#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=86000,URI=\"iframes.m3u8\"\n";

    fn live(seq: u64, count: u64) -> String {
        let mut s = format!(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:{}\n",
            seq
        );
        for i in seq..seq + count {
            s.push_str(&format!("#EXTINF:4.0,\nseg{}.ts\n", i));
        }
        s
    }

    fn vod(seq: u64, count: u64) -> String {
        live(seq, count) + "#EXT-X-ENDLIST\n"
    }

    struct Fixture {
        streams: StreamRegistry,
        segments: SegmentRepository,
        updates: UpdateParamsStore,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                streams: StreamRegistry::new(),
                segments: SegmentRepository::new(),
                updates: UpdateParamsStore::new(),
            }
        }

        fn run(
            &mut self,
            url: &str,
            raw: &str,
            playback: &dyn PlaybackProvider,
        ) -> Result<Rewritten, PlaylistError> {
            let mut ctx = ParseContext {
                manifest_url: url,
                server_port: PORT,
                streams: &mut self.streams,
                segments: &mut self.segments,
                updates: &mut self.updates,
                playback,
            };
            rewrite_playlist(&mut ctx, raw)
        }
    }

    fn at(position: f64) -> ExternalPlaybackProvider<impl Fn() -> PlaybackInfo + Send + Sync> {
        ExternalPlaybackProvider::new(move || PlaybackInfo {
            current_play_position: position,
            current_playback_speed: 1.0,
        })
    }

    fn decode_segment_line(line: &str) -> String {
        let value = line.split_once("?segment=").unwrap().1;
        urls::decode_segment_param(value).unwrap()
    }

    #[test]
    fn multivariant_registers_and_proxies_variants() {
        let mut fx = Fixture::new();
        let out = fx.run(MASTER_URL, MASTER, &at(0.0)).unwrap();
        assert_eq!(out.kind, RewriteKind::Multivariant { streams_added: 3 });

        let lines: Vec<&str> = out.body.lines().collect();
        assert_eq!(
            lines[4],
            urls::local_url(PORT, &urls::manifest_path(VARIANT_URL))
        );
        assert_eq!(
            lines[6],
            urls::local_url(
                PORT,
                &urls::manifest_path("https://other.example.com/v360/index.m3u8")
            )
        );
        let audio = urls::local_url(
            PORT,
            &urls::manifest_path("https://cdn.example.com/live/audio/en.m3u8"),
        );
        assert!(lines[1].contains(&format!("URI=\"{}\"", audio)));
        assert!(lines[2].ends_with("URI=\"https://cdn.example.com/live/subs/en.m3u8\""));
        assert!(lines[7].ends_with("URI=\"https://cdn.example.com/live/iframes.m3u8\""));
        assert_eq!(lines[3], "#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=1280x720,AUDIO=\"aud\"");

        let all = fx.streams.all();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].runtime_id, VARIANT_URL);
        assert_eq!(all[0].stream_type, StreamType::Main);
        assert_eq!(all[1].index, 1);
        assert_eq!(all[2].stream_type, StreamType::Secondary);
        assert_eq!(all[2].index, 0);
        assert!(fx.streams.does_manifest_exist(MASTER_URL));
    }

    #[test]
    fn media_vod_rewrites_every_segment_and_keeps_tags() {
        let mut fx = Fixture::new();
        let raw = vod(0, 3);
        let out = fx.run(VARIANT_URL, &raw, &at(99.0)).unwrap();

        let (update, stream_added) = match out.kind {
            RewriteKind::Media {
                update,
                stream_added,
            } => (update, stream_added),
            other => panic!("expected media, got {:?}", other),
        };
        assert!(stream_added);
        assert!(!update.is_live);
        assert_eq!(update.add_segments.len(), 3);
        assert_eq!(update.add_segments[0].start_time, 0.0);
        assert_eq!(update.add_segments[2].start_time, 8.0);
        assert_eq!(update.add_segments[2].end_time, 12.0);

        let in_lines: Vec<&str> = raw.lines().collect();
        let out_lines: Vec<&str> = out.body.lines().collect();
        assert_eq!(in_lines.len(), out_lines.len());
        for (a, b) in in_lines.iter().zip(&out_lines) {
            if a.starts_with('#') {
                assert_eq!(a, b);
            } else {
                let id = decode_segment_line(b);
                assert_eq!(id, format!("https://cdn.example.com/live/v720/{}", a));
                assert!(fx.segments.contains_runtime_id(&id));
            }
        }
        assert!(fx.updates.get(VARIANT_URL).is_some());
    }

    #[test]
    fn lines_keep_their_endings() {
        let raw = "#EXTM3U\r\na.ts\nb.ts";
        let split: Vec<(&str, &str)> = lines(raw).collect();
        assert_eq!(
            split,
            vec![("#EXTM3U", "\r\n"), ("a.ts", "\n"), ("b.ts", "")]
        );
    }

    #[test]
    fn live_reparse_adds_nothing_new() {
        let mut fx = Fixture::new();
        fx.run(VARIANT_URL, &live(10, 3), &at(50.0)).unwrap();
        let out = fx.run(VARIANT_URL, &live(10, 3), &at(60.0)).unwrap();
        match out.kind {
            RewriteKind::Media {
                update,
                stream_added,
            } => {
                assert!(!stream_added);
                assert!(update.is_live);
                assert!(update.add_segments.is_empty());
                assert!(update.remove_segment_ids.is_empty());
            }
            other => panic!("expected media, got {:?}", other),
        }
    }

    #[test]
    fn live_window_slides_and_chains_times() {
        let mut fx = Fixture::new();
        let first = fx.run(VARIANT_URL, &live(10, 3), &at(50.0)).unwrap();
        match first.kind {
            RewriteKind::Media { update, .. } => {
                assert_eq!(update.add_segments[0].external_id, 10);
                assert_eq!(update.add_segments[0].start_time, 50.0);
                assert_eq!(update.add_segments[2].end_time, 62.0);
            }
            other => panic!("expected media, got {:?}", other),
        }

        let second = fx.run(VARIANT_URL, &live(12, 3), &at(1000.0)).unwrap();
        match second.kind {
            RewriteKind::Media { update, .. } => {
                assert_eq!(
                    update.remove_segment_ids,
                    vec![
                        "https://cdn.example.com/live/v720/seg10.ts".to_string(),
                        "https://cdn.example.com/live/v720/seg11.ts".to_string(),
                    ]
                );
                assert_eq!(update.add_segments.len(), 2);
                assert_eq!(update.add_segments[0].external_id, 13);
                assert_eq!(update.add_segments[0].start_time, 62.0);
                assert_eq!(update.add_segments[1].start_time, 66.0);
            }
            other => panic!("expected media, got {:?}", other),
        }
        assert!(!fx
            .segments
            .contains_runtime_id("https://cdn.example.com/live/v720/seg11.ts"));
        assert!(fx
            .segments
            .contains_runtime_id("https://cdn.example.com/live/v720/seg14.ts"));
    }

    #[test]
    fn byte_ranges_continue_from_previous_segment() {
        let mut fx = Fixture::new();
        let raw = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-VERSION:4\n\
#EXT-X-MAP:URI=\"main.mp4\",BYTERANGE=\"720@0\"\n\
#EXTINF:4.0,\n#EXT-X-BYTERANGE:1000@720\nmain.mp4\n\
#EXTINF:4.0,\n#EXT-X-BYTERANGE:500\nmain.mp4\n\
#EXT-X-ENDLIST\n";
        let out = fx.run(VARIANT_URL, raw, &at(0.0)).unwrap();
        let segs = match out.kind {
            RewriteKind::Media { update, .. } => update.add_segments,
            other => panic!("expected media, got {:?}", other),
        };
        assert_eq!(segs[0].byte_range, Some(ByteRange { start: 720, end: 1719 }));
        assert_eq!(segs[1].byte_range, Some(ByteRange { start: 1720, end: 2219 }));
        assert_eq!(
            segs[1].runtime_id,
            "https://cdn.example.com/live/v720/main.mp4|1720-2219"
        );

        let map_line = out.body.lines().nth(3).unwrap();
        let value = attr_value(map_line, "URI").unwrap();
        assert_eq!(
            decode_segment_line(value),
            "https://cdn.example.com/live/v720/main.mp4|0-719"
        );
        assert!(map_line.ends_with(",BYTERANGE=\"720@0\""));
        assert!(!fx
            .segments
            .contains_runtime_id("https://cdn.example.com/live/v720/main.mp4|0-719"));
    }

    #[test]
    fn key_uri_made_absolute() {
        let mut fx = Fixture::new();
        let raw = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"keys/k1.bin\",IV=0x1\n\
#EXTINF:4.0,\nseg0.ts\n#EXT-X-ENDLIST\n";
        let out = fx.run(VARIANT_URL, raw, &at(0.0)).unwrap();
        assert!(out.body.contains(
            "#EXT-X-KEY:METHOD=AES-128,URI=\"https://cdn.example.com/live/v720/keys/k1.bin\",IV=0x1"
        ));
    }

    #[test]
    fn rejected_media_playlist_leaves_state_untouched() {
        let mut fx = Fixture::new();
        fx.run(VARIANT_URL, &live(0, 3), &at(0.0)).unwrap();
        let before = fx.updates.get(VARIANT_URL).cloned();

        // m3u8-rs reads the indented tag as a tag; as raw text it looks like a URI line.
        let skewed = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:1\n \
#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:00Z\n#EXTINF:4.0,\nseg3.ts\n";
        assert!(matches!(
            fx.run(VARIANT_URL, skewed, &at(0.0)),
            Err(PlaylistError::UriCount { .. })
        ));
        assert_eq!(fx.segments.segment_count(VARIANT_URL), 3);
        assert!(fx
            .segments
            .contains_runtime_id("https://cdn.example.com/live/v720/seg0.ts"));
        assert!(!fx
            .segments
            .contains_runtime_id("https://cdn.example.com/live/v720/seg3.ts"));
        assert_eq!(fx.updates.get(VARIANT_URL).cloned(), before);

        let next = fx.run(VARIANT_URL, &live(1, 3), &at(0.0)).unwrap();
        match next.kind {
            RewriteKind::Media { update, .. } => {
                assert_eq!(
                    update.remove_segment_ids,
                    vec!["https://cdn.example.com/live/v720/seg0.ts".to_string()]
                );
                assert_eq!(update.add_segments.len(), 1);
                assert_eq!(update.add_segments[0].external_id, 3);
            }
            other => panic!("expected media, got {:?}", other),
        }
    }

    #[test]
    fn media_sequence_at_u64_max_is_an_error() {
        let mut fx = Fixture::new();
        let raw = format!(
            "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:{}\n\
#EXTINF:4.0,\na.ts\n#EXTINF:4.0,\nb.ts\n",
            u64::MAX
        );
        assert!(matches!(
            fx.run(VARIANT_URL, &raw, &at(0.0)),
            Err(PlaylistError::SequenceOverflow(seq)) if seq == u64::MAX
        ));
        assert_eq!(fx.segments.segment_count(VARIANT_URL), 0);
        assert!(fx.streams.all().is_empty());
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let mut fx = Fixture::new();
        assert!(matches!(
            fx.run(VARIANT_URL, "<html>nope</html>", &at(0.0)),
            Err(PlaylistError::Parse(_))
        ));
    }

    #[test]
    fn attr_span_respects_boundaries() {
        let line = "#EXT-X-MEDIA:TYPE=AUDIO,XURI=\"no\",URI=\"yes.m3u8\"";
        assert_eq!(attr_value(line, "URI"), Some("yes.m3u8"));
        assert_eq!(attr_value(line, "TYPE"), Some("AUDIO"));
        assert_eq!(attr_value("#EXT-X-MEDIA:TYPE=CLOSED-CAPTIONS", "URI"), None);
    }

    #[test]
    fn byterange_attr_forms() {
        assert_eq!(
            parse_byterange_attr("100@5"),
            Some(ByteRange { start: 5, end: 104 })
        );
        assert_eq!(parse_byterange_attr("10"), Some(ByteRange { start: 0, end: 9 }));
        assert_eq!(parse_byterange_attr("x@1"), None);
    }
}
