//! Playback position source used for live segment timing and engine playback updates.

use crate::protocol::PlaybackInfo;

/// Implemented by whatever drives playback (a player, or a host callback).
pub trait PlaybackProvider: Send + Sync {
    fn playback_info(&self) -> PlaybackInfo;

    /// Absolute position (seconds) assigned to the first segment of a live playlist
    /// when no earlier segment is known.
    fn absolute_playback_position(&self) -> f64 {
        self.playback_info().current_play_position
    }

    /// Forget per-stream state after the manifest changes or the loader stops.
    fn reset_data(&self) {}
}

/// Provider backed by a host closure.
pub struct ExternalPlaybackProvider<F> {
    get_playback_info: F,
}

impl<F> ExternalPlaybackProvider<F>
where
    F: Fn() -> PlaybackInfo + Send + Sync,
{
    pub fn new(get_playback_info: F) -> Self {
        Self { get_playback_info }
    }
}

impl<F> PlaybackProvider for ExternalPlaybackProvider<F>
where
    F: Fn() -> PlaybackInfo + Send + Sync,
{
    fn playback_info(&self) -> PlaybackInfo {
        (self.get_playback_info)()
    }
}

/// Provider used before a player is attached: position 0, normal speed.
#[derive(Debug, Default)]
pub struct IdlePlaybackProvider;

impl PlaybackProvider for IdlePlaybackProvider {
    fn playback_info(&self) -> PlaybackInfo {
        PlaybackInfo {
            current_play_position: 0.0,
            current_playback_speed: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_provider_uses_closure() {
        let p = ExternalPlaybackProvider::new(|| PlaybackInfo {
            current_play_position: 12.5,
            current_playback_speed: 1.5,
        });
        assert_eq!(p.absolute_playback_position(), 12.5);
        assert_eq!(p.playback_info().current_playback_speed, 1.5);
    }

    #[test]
    fn idle_provider_defaults() {
        assert_eq!(IdlePlaybackProvider.playback_info().current_play_position, 0.0);
    }
}
