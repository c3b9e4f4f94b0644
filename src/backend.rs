use crate::audio::CanonicalAudio;

/// Pluggable speaker-embedding backend used by [`crate::EmbeddingClient`].
///
/// A backend turns validated mono audio into a raw speaker vector. It is treated as a black
/// box: the client takes care of dimensionality checks and unit normalization, so backends
/// should return the model output as-is.
///
/// Implementations must be safe for concurrent use; the client bounds how many calls run at
/// once.
pub trait EmbeddingBackend: Send + Sync {
    /// Compute a raw (not necessarily normalized) embedding for `audio`.
    fn embed(&self, audio: &CanonicalAudio) -> anyhow::Result<Vec<f32>>;

    /// Short backend name for logs.
    fn name(&self) -> &str {
        "custom"
    }
}

impl<B: EmbeddingBackend + ?Sized> EmbeddingBackend for Box<B> {
    fn embed(&self, audio: &CanonicalAudio) -> anyhow::Result<Vec<f32>> {
        (**self).embed(audio)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
