use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Auto,
    Approval,
    Destructive,
}

/// A named bundle of command patterns plus a tier assignment (spec §3, §4.A).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    #[serde(default)]
    pub auto: Vec<String>,
    #[serde(default)]
    pub approval: Vec<String>,
    #[serde(default)]
    pub destructive: Vec<String>,
}

impl Skill {
    pub fn patterns_for(&self, tier: Tier) -> &[String] {
        match tier {
            Tier::Auto => &self.auto,
            Tier::Approval => &self.approval,
            Tier::Destructive => &self.destructive,
        }
    }
}
