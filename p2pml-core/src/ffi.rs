//! C ABI for linking p2pml-core as a static library from Android (NDK) or other C/C++ hosts.
//! The host owns networking; these calls rewrite playlists and build bridge frames.

use std::ffi::c_void;
use std::os::raw::c_int;
use std::slice;

use crate::playback::PlaybackProvider;
use crate::protocol::{Message, PlaybackInfo, PROTOCOL_VERSION};
use crate::service::ManifestParser;
use crate::wire::encode_frame;

/// Playback position supplied per call by the host.
struct HostPosition(f64);

impl PlaybackProvider for HostPosition {
    fn playback_info(&self) -> PlaybackInfo {
        PlaybackInfo {
            current_play_position: self.0,
            current_playback_speed: 1.0,
        }
    }
}

unsafe fn utf8<'a>(ptr: *const u8, len: usize) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    std::str::from_utf8(slice::from_raw_parts(ptr, len)).ok()
}

fn copy_out(bytes: &[u8], out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if out_buf.is_null() || bytes.len() > out_buf_len || bytes.len() > c_int::MAX as usize {
        return -1;
    }
    unsafe {
        out_buf.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
    }
    bytes.len() as c_int
}

/// Returns the bridge protocol version.
#[no_mangle]
pub extern "C" fn p2pml_core_version() -> u8 {
    PROTOCOL_VERSION
}

/// Create a parser for a proxy on `server_port`. Returns opaque handle.
#[no_mangle]
pub extern "C" fn p2pml_parser_create(server_port: u16) -> *mut c_void {
    Box::into_raw(Box::new(ManifestParser::new(server_port))) as *mut c_void
}

/// Destroy parser. No-op if h is null.
#[no_mangle]
pub extern "C" fn p2pml_parser_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut ManifestParser) };
}

/// Forget all streams and segments.
#[no_mangle]
pub extern "C" fn p2pml_parser_reset(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let parser = unsafe { &mut *(h as *mut ManifestParser) };
    parser.reset();
}

/// Rewrite a playlist fetched from `url`. `position` is the current playback position in seconds.
/// Writes the rewritten playlist to out_buf. Returns bytes written, or -1 on error or short buffer.
#[no_mangle]
pub extern "C" fn p2pml_parser_parse(
    h: *mut c_void,
    url: *const u8,
    url_len: usize,
    raw: *const u8,
    raw_len: usize,
    position: f64,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if h.is_null() {
        return -1;
    }
    let parser = unsafe { &mut *(h as *mut ManifestParser) };
    let (Some(url), Some(raw)) = (unsafe { utf8(url, url_len) }, unsafe { utf8(raw, raw_len) }) else {
        return -1;
    };
    match parser.parse(url, raw, &HostPosition(position)) {
        Ok(rewritten) => copy_out(rewritten.body.as_bytes(), out_buf, out_buf_len),
        Err(_) => -1,
    }
}

/// 1 if the segment runtime id is in the latest media playlist, 0 if not, -1 on error.
#[no_mangle]
pub extern "C" fn p2pml_parser_is_current_segment(h: *mut c_void, id: *const u8, id_len: usize) -> c_int {
    if h.is_null() {
        return -1;
    }
    let parser = unsafe { &*(h as *const ManifestParser) };
    match unsafe { utf8(id, id_len) } {
        Some(id) => c_int::from(parser.is_current_segment(id)),
        None => -1,
    }
}

/// Write a `Streams` frame listing every known stream. Returns bytes written, or -1 on error.
#[no_mangle]
pub extern "C" fn p2pml_parser_streams_frame(h: *mut c_void, out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if h.is_null() {
        return -1;
    }
    let parser = unsafe { &*(h as *const ManifestParser) };
    match encode_frame(&Message::Streams {
        streams: parser.streams(),
    }) {
        Ok(frame) => copy_out(&frame, out_buf, out_buf_len),
        Err(_) => -1,
    }
}

/// Write the `UpdateStream` frame from the last parse of `variant_url`.
/// Returns bytes written, 0 if the variant was never parsed, -1 on error.
#[no_mangle]
pub extern "C" fn p2pml_parser_update_frame(
    h: *mut c_void,
    variant_url: *const u8,
    variant_url_len: usize,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if h.is_null() {
        return -1;
    }
    let parser = unsafe { &*(h as *const ManifestParser) };
    let Some(url) = (unsafe { utf8(variant_url, variant_url_len) }) else {
        return -1;
    };
    let Some(params) = parser.update_stream_params(url) else {
        return 0;
    };
    match encode_frame(&Message::UpdateStream { params }) {
        Ok(frame) => copy_out(&frame, out_buf, out_buf_len),
        Err(_) => -1,
    }
}
