// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use crate::skills::SkillSnapshot;

/// Base assistant prompt used when the deployment does not override it.
pub const BASE_PROMPT: &str = "\
You are a capable assistant running inside a local gateway. You can use \
the provided tools to read and write workspace files, run commands, \
fetch URLs, search your memory and reach connected nodes. Prefer tools \
over guessing; report what you actually did. Keep replies concise.";

/// Compose the system prompt for one run.
///
/// Order matters: stable base first, then the optional first-run
/// bootstrap context, then the skills snapshot, then the read-only
/// notice — so the volatile pieces sit at the end of the prompt.
pub fn compose_system_prompt(
    base: &str,
    bootstrap: Option<&str>,
    skills: &SkillSnapshot,
    read_only: bool,
) -> String {
    let mut prompt = String::from(base);
    if let Some(bootstrap) = bootstrap {
        if !bootstrap.trim().is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(bootstrap.trim());
        }
    }
    if !skills.is_empty() {
        prompt.push_str("\n\n## Skills\n");
        prompt.push_str(skills.prompt_text.trim());
    }
    if read_only {
        prompt.push_str(
            "\n\nThis run is read-only: file writes, shell commands and \
             other mutating tools are unavailable and will be refused.",
        );
    }
    prompt
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_only_when_nothing_else_set() {
        let p = compose_system_prompt("base", None, &SkillSnapshot::default(), false);
        assert_eq!(p, "base");
    }

    #[test]
    fn bootstrap_and_skills_append_in_order() {
        let skills = SkillSnapshot::new("use the weather skill", 3);
        let p = compose_system_prompt("base", Some("first run"), &skills, false);
        let base_pos = p.find("base").unwrap();
        let boot_pos = p.find("first run").unwrap();
        let skills_pos = p.find("weather skill").unwrap();
        assert!(base_pos < boot_pos && boot_pos < skills_pos);
    }

    #[test]
    fn read_only_notice_is_announced() {
        let p = compose_system_prompt("base", None, &SkillSnapshot::default(), true);
        assert!(p.contains("read-only"));
    }

    #[test]
    fn empty_skill_snapshot_adds_no_section() {
        let p = compose_system_prompt("base", None, &SkillSnapshot::new("  ", 1), false);
        assert!(!p.contains("## Skills"));
    }
}
