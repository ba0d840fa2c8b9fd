//! Engine-wide defaults.

/// Tool calls kept active per turn by the auto-collapse window.
pub const RECENT_TOOLCALLS_PER_TURN: usize = 5;

/// Turns covered by the auto-collapse window.
pub const RECENT_TURNS_WINDOW: usize = 3;

/// Maximum length of the compact argument rendering on tool-call metadata.
pub const ARGS_DISPLAY_MAX_CHARS: usize = 120;
