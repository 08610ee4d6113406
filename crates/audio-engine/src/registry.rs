//! One-time decoder library setup.
//!
//! Every code path that builds a decode session goes through [`registry`], which
//! initializes the probe and codec tables exactly once, on first use, from whichever
//! thread gets there first.

use std::sync::OnceLock;

use symphonia::core::codecs::CodecRegistry;
use symphonia::core::probe::Probe;

/// Container probe plus codec table used by all decode sessions.
pub struct DecoderRegistry {
    probe: &'static Probe,
    codecs: &'static CodecRegistry,
}

impl DecoderRegistry {
    pub fn probe(&self) -> &'static Probe {
        self.probe
    }

    pub fn codecs(&self) -> &'static CodecRegistry {
        self.codecs
    }
}

/// Shared decoder registry, created lazily and safely across threads.
pub fn registry() -> &'static DecoderRegistry {
    static REGISTRY: OnceLock<DecoderRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        tracing::debug!("decoder registry initialized");
        DecoderRegistry {
            probe: symphonia::default::get_probe(),
            codecs: symphonia::default::get_codecs(),
        }
    })
}
