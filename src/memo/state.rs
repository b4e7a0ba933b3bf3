use serde::{Deserialize, Serialize};

/// A single register write produced by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegWrite {
    pub reg: u16,
    #[serde(rename = "val")]
    pub value: u64,
}

/// Observable result of running a handler: its register writes plus the next program counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostState {
    pub writes: Vec<RegWrite>,
    pub next_pc: u64,
}

impl PostState {
    pub fn new(next_pc: u64) -> Self {
        Self {
            writes: Vec::new(),
            next_pc,
        }
    }

    pub fn with_write(mut self, reg: u16, value: u64) -> Self {
        self.writes.push(RegWrite { reg, value });
        self
    }

    /// Last value written to `reg`, if the handler wrote it at all.
    pub fn value_of(&self, reg: u16) -> Option<u64> {
        self.writes
            .iter()
            .rev()
            .find(|write| write.reg == reg)
            .map(|write| write.value)
    }

    /// Applies the writes to a flat register file, ignoring registers outside it.
    pub fn apply_to(&self, regs: &mut [u64]) {
        for write in &self.writes {
            if let Some(slot) = regs.get_mut(usize::from(write.reg)) {
                *slot = write.value;
            }
        }
    }
}
