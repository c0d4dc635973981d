//! Model and signal-processing constants.

// Audio preprocessing (must match the conditions the weights were trained under).
pub const SAMPLE_RATE_HZ: u32 = 16_000;
pub const MEL_BINS: usize = 128;
pub const N_FFT: usize = 1024;
pub const N_FREQ: usize = N_FFT / 2 + 1; // 513
pub const HOP_LENGTH: usize = 256; // 16ms @ 16kHz
pub const FIXED_TIME_FRAMES: usize = 128; // ~2.05s @ 16kHz

// power -> dB conversion.
pub const AMIN: f32 = 1e-10;
pub const TOP_DB: f32 = 80.0;

/// Constant written into time frames that carry no audio.
pub const PAD_VALUE: f32 = 0.0;

/// Number of output classes; index 0 is "fake", index 1 is "real".
pub const N_CLASSES: usize = 2;

/// Container/codec suffixes accepted at the upload boundary (lowercase, with dot).
pub const SUPPORTED_EXTENSIONS: [&str; 6] = [".wav", ".mp3", ".flac", ".ogg", ".m4a", ".aac"];
