use std::fs;
use std::path::Path;

use gcc_core::Skill;

/// Load skill definitions from a directory of `*.toml` files (one [`Skill`]
/// per file; SPEC_FULL §4.A). A file that fails to parse is logged and
/// skipped rather than aborting startup, matching the teacher's defensive
/// config-loading posture.
pub fn load_skills_dir(dir: &Path) -> Vec<Skill> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(path = %dir.display(), %err, "could not read skills directory");
            return Vec::new();
        }
    };

    let mut skills = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        match fs::read_to_string(&path).and_then(|text| {
            toml::from_str::<Skill>(&text).map_err(|err| std::io::Error::other(err.to_string()))
        }) {
            Ok(skill) => skills.push(skill),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "failed to parse skill file, skipping");
            }
        }
    }
    skills.sort_by(|a, b| a.name.cmp(&b.name));
    skills
}
