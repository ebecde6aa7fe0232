use crate::envelope::EnvelopeStage;
use crate::voice::{Voice, VoiceId};

/// How [`VoiceMixer::add`] found room for a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Empty,
    /// Took the slot of a voice that had already finished its release.
    Reused(VoiceId),
    /// Cut off a sounding voice.
    Stolen(VoiceId),
}

impl Placement {
    /// The voice that no longer exists on the render side.
    pub fn displaced(self) -> Option<VoiceId> {
        match self {
            Placement::Empty => None,
            Placement::Reused(id) | Placement::Stolen(id) => Some(id),
        }
    }
}

/// Sums every active voice into one mono stream.
///
/// Voices live in a fixed set of slots allocated up front. Adding a voice never
/// allocates: it reuses an empty or idle slot, or steals one when all are sounding.
pub struct VoiceMixer {
    slots: Vec<Option<Voice>>,
    scratch: Vec<f32>,
}

impl VoiceMixer {
    pub fn new(max_voices: usize, max_block: usize) -> Self {
        let mut slots = Vec::with_capacity(max_voices);
        slots.resize_with(max_voices, || None);
        Self {
            slots,
            scratch: vec![0.0; max_block.max(1)],
        }
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices().filter(|voice| voice.is_active()).count()
    }

    /// Places `voice` in an empty slot, else over an idle voice, else over a sounding one.
    pub fn add(&mut self, voice: Voice) -> Placement {
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(voice);
            return Placement::Empty;
        }
        if let Some(index) = self.slot_of_oldest(|v| !v.is_active()) {
            return self.replace(index, voice).map_or(Placement::Empty, Placement::Reused);
        }

        // Steal the oldest releasing voice first, otherwise the oldest overall.
        match self
            .slot_of_oldest(|v| v.stage() == EnvelopeStage::Release)
            .or_else(|| self.slot_of_oldest(|_| true))
        {
            Some(index) => self.replace(index, voice).map_or(Placement::Empty, Placement::Stolen),
            // zero slots
            None => Placement::Stolen(voice.id()),
        }
    }

    pub fn note_off(&mut self, id: VoiceId) -> bool {
        match self.find_mut(id) {
            Some(voice) => {
                voice.note_off();
                true
            }
            None => false,
        }
    }

    pub fn release_all(&mut self) {
        for voice in self.slots.iter_mut().flatten() {
            voice.note_off();
        }
    }

    pub fn remove(&mut self, id: VoiceId) -> bool {
        match self
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().map(Voice::id) == Some(id))
        {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    /// Overwrites `out` with the clamped sum of all active voices.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let chunk_len = self.scratch.len();
        for chunk in out.chunks_mut(chunk_len) {
            let scratch = &mut self.scratch[..chunk.len()];
            for voice in self.slots.iter_mut().flatten() {
                voice.render_add(chunk, scratch);
            }
        }
        for sample in out.iter_mut() {
            *sample = limit(*sample);
        }
    }

    fn replace(&mut self, index: usize, voice: Voice) -> Option<VoiceId> {
        self.slots[index].replace(voice).map(|old| old.id())
    }

    fn voices(&self) -> impl Iterator<Item = &Voice> {
        self.slots.iter().flatten()
    }

    fn find_mut(&mut self, id: VoiceId) -> Option<&mut Voice> {
        self.slots.iter_mut().flatten().find(|v| v.id() == id)
    }

    fn slot_of_oldest(&self, filter: impl Fn(&Voice) -> bool) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (i, v)))
            .filter(|(_, v)| filter(v))
            .min_by_key(|(_, v)| v.id())
            .map(|(i, _)| i)
    }
}

/// Hard clip to the device range.
#[inline]
pub fn limit(sample: f32) -> f32 {
    sample.clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oscillator::WaveType;
    use crate::voice::VoiceSettings;

    const SR: f32 = 1000.0;

    fn held(wave_type: WaveType, amplitude: f32) -> VoiceSettings {
        VoiceSettings {
            wave_type,
            frequency: 10.0,
            amplitude,
            attack: 0.0,
            decay: 0.0,
            sustain: 1.0,
            release: 0.0,
        }
    }

    #[test]
    fn sums_voices_and_clamps() {
        let mut mixer = VoiceMixer::new(4, 16);
        // sawtooth starts at -amplitude
        mixer.add(Voice::new(VoiceId(1), &held(WaveType::Sawtooth, 0.25), SR));
        let mut out = [0.0; 1];
        mixer.render(&mut out);
        assert_eq!(out[0], -0.25);

        let mut mixer = VoiceMixer::new(8, 16);
        for i in 0..6 {
            mixer.add(Voice::new(VoiceId(i), &held(WaveType::Sawtooth, 0.5), SR));
        }
        let mut out = [0.0; 32];
        mixer.render(&mut out);
        assert_eq!(out[0], -1.0);
        assert!(out.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn blocks_longer_than_scratch_are_chunked() {
        let mut a = VoiceMixer::new(2, 7);
        let mut b = VoiceMixer::new(2, 64);
        let settings = VoiceSettings {
            frequency: 31.0,
            amplitude: 0.5,
            ..VoiceSettings::default()
        };
        a.add(Voice::new(VoiceId(1), &settings, SR));
        b.add(Voice::new(VoiceId(1), &settings, SR));

        let mut out_a = [0.0; 50];
        let mut out_b = [0.0; 50];
        a.render(&mut out_a);
        b.render(&mut out_b);
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn idle_voices_are_excluded_and_reused() {
        let mut mixer = VoiceMixer::new(1, 16);
        mixer.add(Voice::new(VoiceId(1), &held(WaveType::Square, 1.0), SR));
        assert!(mixer.note_off(VoiceId(1)));
        let mut out = [0.0; 4];
        mixer.render(&mut out);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(mixer.active_voice_count(), 0);

        assert_eq!(
            mixer.add(Voice::new(VoiceId(2), &held(WaveType::Sine, 1.0), SR)),
            Placement::Reused(VoiceId(1))
        );
        assert_eq!(mixer.active_voice_count(), 1);
    }

    #[test]
    fn empty_slots_are_taken_before_idle_ones() {
        let mut mixer = VoiceMixer::new(2, 16);
        mixer.add(Voice::new(VoiceId(1), &held(WaveType::Square, 1.0), SR));
        mixer.note_off(VoiceId(1));
        let mut out = [0.0; 4];
        mixer.render(&mut out);
        assert_eq!(mixer.active_voice_count(), 0);

        // the idle voice stays addressable until its slot is needed
        let placement = mixer.add(Voice::new(VoiceId(2), &held(WaveType::Sine, 1.0), SR));
        assert_eq!(placement, Placement::Empty);
        assert_eq!(placement.displaced(), None);
        assert!(mixer.note_off(VoiceId(1)));

        let placement = mixer.add(Voice::new(VoiceId(3), &held(WaveType::Sine, 1.0), SR));
        assert_eq!(placement, Placement::Reused(VoiceId(1)));
        assert_eq!(placement.displaced(), Some(VoiceId(1)));
    }

    #[test]
    fn full_mixer_steals_oldest_releasing_voice_first() {
        let mut settings = held(WaveType::Sine, 0.1);
        settings.release = 1.0;
        let mut mixer = VoiceMixer::new(3, 16);
        for i in 1..=3 {
            mixer.add(Voice::new(VoiceId(i), &settings, SR));
        }
        mixer.note_off(VoiceId(2));

        assert_eq!(
            mixer.add(Voice::new(VoiceId(4), &settings, SR)),
            Placement::Stolen(VoiceId(2))
        );
        assert_eq!(
            mixer.add(Voice::new(VoiceId(5), &settings, SR)),
            Placement::Stolen(VoiceId(1))
        );
        assert_eq!(mixer.active_voice_count(), 3);
    }

    #[test]
    fn remove_silences_immediately() {
        let mut mixer = VoiceMixer::new(2, 16);
        mixer.add(Voice::new(VoiceId(7), &held(WaveType::Sawtooth, 1.0), SR));
        assert!(mixer.remove(VoiceId(7)));
        assert!(!mixer.remove(VoiceId(7)));
        assert!(!mixer.note_off(VoiceId(7)));

        let mut out = [1.0; 8];
        mixer.render(&mut out);
        assert_eq!(out, [0.0; 8]);
    }
}
