use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sampling roles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sampling profile selected per phase. Each role maps to a temperature;
/// the model itself is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Classification and gates.
    Reflex,
    /// Compression and summarization.
    Nerves,
    /// Reasoning, planning, validation.
    Mind,
    /// Final user-facing text.
    Voice,
}

impl Role {
    pub fn temperature(self) -> f32 {
        match self {
            Role::Reflex => 0.3,
            Role::Nerves => 0.1,
            Role::Mind => 0.5,
            Role::Voice => 0.7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Role::Reflex => "reflex",
            Role::Nerves => "nerves",
            Role::Mind => "mind",
            Role::Voice => "voice",
        }
    }
}
