//! Host-driven API: ManifestParser owns the parse-time state; the host serialises access.

use crate::playback::PlaybackProvider;
use crate::playlist::{self, ParseContext, PlaylistError, Rewritten};
use crate::protocol::{Stream, UpdateStreamParams};
use crate::registry::{SegmentRepository, StreamRegistry, UpdateParamsStore};

/// Stream/segment bookkeeping for one proxy port.
pub struct ManifestParser {
    server_port: u16,
    streams: StreamRegistry,
    segments: SegmentRepository,
    updates: UpdateParamsStore,
}

impl ManifestParser {
    pub fn new(server_port: u16) -> Self {
        Self {
            server_port,
            streams: StreamRegistry::new(),
            segments: SegmentRepository::new(),
            updates: UpdateParamsStore::new(),
        }
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    /// Rewrite a fetched playlist and update bookkeeping.
    pub fn parse(
        &mut self,
        manifest_url: &str,
        raw: &str,
        playback: &dyn PlaybackProvider,
    ) -> Result<Rewritten, PlaylistError> {
        let mut ctx = ParseContext {
            manifest_url,
            server_port: self.server_port,
            streams: &mut self.streams,
            segments: &mut self.segments,
            updates: &mut self.updates,
            playback,
        };
        playlist::rewrite_playlist(&mut ctx, raw)
    }

    /// Whether the segment is listed in the most recently parsed media playlist.
    pub fn is_current_segment(&self, runtime_id: &str) -> bool {
        self.segments.contains_runtime_id(runtime_id)
    }

    pub fn update_stream_params(&self, variant_url: &str) -> Option<UpdateStreamParams> {
        self.updates.get(variant_url).cloned()
    }

    pub fn all_update_params(&self) -> Vec<UpdateStreamParams> {
        self.updates.all().cloned().collect()
    }

    pub fn streams(&self) -> Vec<Stream> {
        self.streams.all().to_vec()
    }

    pub fn does_manifest_exist(&self, manifest_url: &str) -> bool {
        self.streams.does_manifest_exist(manifest_url)
    }

    pub fn reset(&mut self) {
        self.streams.clear_all();
        self.segments.clear_all();
        self.updates.clear_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::IdlePlaybackProvider;
    use crate::playlist::RewriteKind;

    const MASTER: &str = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1000\nlow/index.m3u8\n";
    const MEDIA: &str =
        "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\ns0.ts\n#EXTINF:6.0,\ns1.ts\n#EXT-X-ENDLIST\n";

    #[test]
    fn master_then_variant_flow() {
        let mut p = ManifestParser::new(8080);
        let master_url = "https://a.com/master.m3u8";
        let variant_url = "https://a.com/low/index.m3u8";
        assert!(!p.does_manifest_exist(master_url));

        p.parse(master_url, MASTER, &IdlePlaybackProvider).unwrap();
        assert!(p.does_manifest_exist(master_url));
        assert!(p.does_manifest_exist(variant_url));

        let out = p.parse(variant_url, MEDIA, &IdlePlaybackProvider).unwrap();
        assert!(matches!(
            out.kind,
            RewriteKind::Media {
                stream_added: false,
                ..
            }
        ));
        assert!(p.is_current_segment("https://a.com/low/s1.ts"));
        assert_eq!(
            p.update_stream_params(variant_url).unwrap().add_segments.len(),
            2
        );
        assert_eq!(p.streams().len(), 1);
        assert_eq!(p.all_update_params().len(), 1);
    }

    #[test]
    fn reset_clears_everything() {
        let mut p = ManifestParser::new(8080);
        p.parse("https://a.com/v.m3u8", MEDIA, &IdlePlaybackProvider)
            .unwrap();
        assert!(p.is_current_segment("https://a.com/s0.ts"));
        p.reset();
        assert!(!p.is_current_segment("https://a.com/s0.ts"));
        assert!(p.streams().is_empty());
        assert!(p.update_stream_params("https://a.com/v.m3u8").is_none());
    }
}
