use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LineClass {
    Plain,
    BootCompleted,
    ShutdownDetected,
    LockConflictDetected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkerRule {
    pub pattern: String,
    pub class: LineClass,
}

impl MarkerRule {
    pub fn new(pattern: impl Into<String>, class: LineClass) -> Self {
        Self {
            pattern: pattern.into(),
            class,
        }
    }
}

pub fn default_marker_rules() -> Vec<MarkerRule> {
    vec![
        MarkerRule::new("Successfully loaded snapshot", LineClass::BootCompleted),
        MarkerRule::new("Boot completed", LineClass::BootCompleted),
        MarkerRule::new("Saving with gfxstream=1", LineClass::ShutdownDetected),
        MarkerRule::new("killing emulator, bye bye", LineClass::ShutdownDetected),
        MarkerRule::new(
            "Running multiple emulators with the same AVD",
            LineClass::LockConflictDetected,
        ),
    ]
}

/// Ordered substring rules; the first rule whose pattern occurs in a line
/// decides its class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerTable {
    rules: Vec<MarkerRule>,
}

impl MarkerTable {
    /// Rules with an empty pattern would match every line and are dropped.
    pub fn new(rules: Vec<MarkerRule>) -> Self {
        let rules = rules
            .into_iter()
            .filter(|rule| !rule.pattern.is_empty() && rule.class != LineClass::Plain)
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[MarkerRule] {
        &self.rules
    }

    pub fn classify(&self, line: &str) -> LineClass {
        self.rules
            .iter()
            .find(|rule| line.contains(rule.pattern.as_str()))
            .map_or(LineClass::Plain, |rule| rule.class)
    }
}

impl Default for MarkerTable {
    fn default() -> Self {
        Self::new(default_marker_rules())
    }
}
