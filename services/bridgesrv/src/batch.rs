//! Sensor batch assembly
//!
//! The controller prints one line per treatment stage,
//! `<stage>,<key>:<value>,...`. A batch is complete once every stage has
//! reported since the previous batch; the most recent line per stage wins.
//! Lines are passed through verbatim, never parsed beyond the stage token.

use std::fmt;

/// Monitored water stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    DirtyWater,
    CleanWater,
    HydroponicsWater,
}

impl Stage {
    /// Emission order
    pub const ALL: [Stage; 3] = [Stage::DirtyWater, Stage::CleanWater, Stage::HydroponicsWater];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::DirtyWater => "dirty_water",
            Stage::CleanWater => "clean_water",
            Stage::HydroponicsWater => "hydroponics_water",
        }
    }

    /// Stage named by the text before the first comma of `line`
    pub fn from_line(line: &str) -> Option<Stage> {
        let token = line.split(',').next().unwrap_or_default();
        Stage::ALL.into_iter().find(|stage| stage.as_str() == token)
    }

    fn index(self) -> usize {
        match self {
            Stage::DirtyWater => 0,
            Stage::CleanWater => 1,
            Stage::HydroponicsWater => 2,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One complete set of stage readings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    lines: [String; 3],
}

impl Batch {
    /// Raw line recorded for `stage`
    pub fn line(&self, stage: Stage) -> &str {
        &self.lines[stage.index()]
    }

    /// Lines in emission order
    pub fn lines(&self) -> &[String; 3] {
        &self.lines
    }

    /// Newline-joined lines in emission order
    pub fn to_payload(&self) -> String {
        self.lines.join("\n")
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_payload())
    }
}

/// Accumulates stage lines into [`Batch`]es
#[derive(Debug, Default)]
pub struct BatchAssembler {
    slots: [Option<String>; 3],
    discarded: u64,
}

impl BatchAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw line
    ///
    /// Returns the batch this line completed, if any. Empty lines leave the
    /// assembler untouched; lines naming no known stage are dropped.
    pub fn push(&mut self, raw: &str) -> Option<Batch> {
        let line = raw.trim();
        if line.is_empty() {
            return None;
        }

        let Some(stage) = Stage::from_line(line) else {
            self.discarded += 1;
            return None;
        };
        self.slots[stage.index()] = Some(line.to_string());

        if self.slots.iter().all(Option::is_some) {
            let [dirty, clean, hydro] = std::mem::take(&mut self.slots);
            return Some(Batch {
                lines: [
                    dirty.unwrap_or_default(),
                    clean.unwrap_or_default(),
                    hydro.unwrap_or_default(),
                ],
            });
        }
        None
    }

    /// Stages that have reported since the last emission
    pub fn pending_stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| self.slots[stage.index()].is_some())
            .collect()
    }

    /// No stage reported since the last emission
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Lines dropped because they named no known stage
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}
