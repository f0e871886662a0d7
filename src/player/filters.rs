//! Accumulating filter chain for a player.
//!
//! The node expects the *complete* filter object on every change, so the
//! chain keeps the last-sent state and callers mutate it incrementally.

use crate::protocol::{
    ChannelMixFilter, DistortionFilter, EqualizerBand, FilterData, KaraokeFilter, LowPassFilter,
    RotationFilter, TimescaleFilter, TremoloFilter, VibratoFilter,
};

/// Builder-style wrapper over [`FilterData`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterChain {
    data: FilterData,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The payload to send to the node.
    pub fn payload(&self) -> &FilterData {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data == FilterData::default()
    }

    /// Drops every active filter.
    pub fn clear(&mut self) -> &mut Self {
        self.data = FilterData::default();
        self
    }

    pub fn set_volume(&mut self, volume: f64) -> &mut Self {
        self.data.volume = Some(volume.clamp(0.0, 5.0));
        self
    }

    pub fn set_equalizer(&mut self, bands: Vec<EqualizerBand>) -> &mut Self {
        self.data.equalizer = Some(bands);
        self
    }

    pub fn set_karaoke(&mut self, karaoke: KaraokeFilter) -> &mut Self {
        self.data.karaoke = Some(karaoke);
        self
    }

    pub fn set_timescale(&mut self, timescale: TimescaleFilter) -> &mut Self {
        self.data.timescale = Some(timescale);
        self
    }

    pub fn set_tremolo(&mut self, tremolo: TremoloFilter) -> &mut Self {
        self.data.tremolo = Some(tremolo);
        self
    }

    pub fn set_vibrato(&mut self, vibrato: VibratoFilter) -> &mut Self {
        self.data.vibrato = Some(vibrato);
        self
    }

    pub fn set_rotation(&mut self, rotation: RotationFilter) -> &mut Self {
        self.data.rotation = Some(rotation);
        self
    }

    pub fn set_distortion(&mut self, distortion: DistortionFilter) -> &mut Self {
        self.data.distortion = Some(distortion);
        self
    }

    pub fn set_channel_mix(&mut self, mix: ChannelMixFilter) -> &mut Self {
        self.data.channel_mix = Some(mix);
        self
    }

    pub fn set_low_pass(&mut self, low_pass: LowPassFilter) -> &mut Self {
        self.data.low_pass = Some(low_pass);
        self
    }

    /// Raw filter for node plugins the typed API does not know about.
    pub fn set_plugin_filter(
        &mut self,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> &mut Self {
        self.data.plugin_filters.insert(name.into(), value);
        self
    }

    // --- Presets ---

    /// Velocidad y tono arriba, el clásico nightcore.
    pub fn nightcore(&mut self) -> &mut Self {
        self.set_timescale(TimescaleFilter {
            speed: Some(1.25),
            pitch: Some(1.25),
            rate: Some(1.0),
        })
    }

    pub fn vaporwave(&mut self) -> &mut Self {
        self.set_timescale(TimescaleFilter {
            speed: Some(0.85),
            pitch: Some(0.85),
            rate: Some(1.0),
        })
    }

    /// Boosts the low equalizer bands; `gain` around 0.25 is already a lot.
    pub fn bass_boost(&mut self, gain: f64) -> &mut Self {
        let bands = (0..=4)
            .map(|band| EqualizerBand {
                band,
                gain: gain * (1.0 - f64::from(band) * 0.15),
            })
            .collect();
        self.set_equalizer(bands)
    }

    pub fn eight_d(&mut self) -> &mut Self {
        self.set_rotation(RotationFilter {
            rotation_hz: Some(0.2),
        })
    }
}
