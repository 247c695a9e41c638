use std::collections::BTreeMap;

use tracing::debug;

use stemscore_domain::{ArrangedTrack, AssignmentRecord, Instrument, InstrumentClass};

/// Instruments keyed by canonical class, iterated in canonical order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassBank {
    tracks: BTreeMap<InstrumentClass, Instrument>,
}

impl ClassBank {
    pub fn insert(&mut self, class: InstrumentClass, instrument: Instrument) {
        self.tracks.insert(class, instrument);
    }

    pub fn get(&self, class: InstrumentClass) -> Option<&Instrument> {
        self.tracks.get(&class)
    }

    pub fn classes(&self) -> Vec<InstrumentClass> {
        self.tracks.keys().copied().collect()
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.tracks.values()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn map_instruments<F>(self, mut f: F) -> Self
    where
        F: FnMut(&Instrument) -> Instrument,
    {
        Self {
            tracks: self
                .tracks
                .into_iter()
                .map(|(class, instrument)| (class, f(&instrument)))
                .collect(),
        }
    }

    pub fn into_tracks(self) -> Vec<ArrangedTrack> {
        self.tracks
            .into_iter()
            .map(|(class, instrument)| ArrangedTrack { class, instrument })
            .collect()
    }
}

/// Routes per-voice results into the seven-class bank.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassAssigner;

impl ClassAssigner {
    /// The drum kit is always kept when present. Pitched classes are kept only
    /// when they hold at least one note; anything missing is simply absent.
    pub fn assign(
        &self,
        mut pitched: BTreeMap<InstrumentClass, Instrument>,
        drums: Option<Instrument>,
    ) -> (ClassBank, AssignmentRecord) {
        let mut bank = ClassBank::default();

        if let Some(mut kit) = drums {
            kit.is_drum = true;
            kit.name = InstrumentClass::Drums.as_str().to_string();
            bank.insert(InstrumentClass::Drums, kit);
        }

        for class in InstrumentClass::PITCHED {
            let Some(mut instrument) = pitched.remove(&class) else {
                continue;
            };
            if !instrument.has_notes() {
                debug!(%class, "skipping empty instrument");
                continue;
            }
            instrument.name = class.as_str().to_string();
            bank.insert(class, instrument);
        }

        let record = AssignmentRecord {
            tracks: bank.classes(),
        };
        (bank, record)
    }
}
