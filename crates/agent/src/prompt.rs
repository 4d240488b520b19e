//! System prompt assembly.
//!
//! The real prompt template lives outside the core; this builder keeps
//! just enough state (workspace notes, skill index, mode) to render a
//! system message per round. Sub-agents run in minimal mode.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptMode {
    #[default]
    Full,
    /// Terse variant for short-lived sub-agent sessions.
    Minimal,
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    pub mode: PromptMode,
    pub workspace: Option<String>,
    pub skills: Vec<String>,
}

impl PromptBuilder {
    pub fn render(&self) -> String {
        if self.mode == PromptMode::Minimal {
            return "You are a keel sub-agent. Complete the given task and reply with \
                    the result only."
                .to_string();
        }

        let mut prompt = String::from(
            "You are keel, a long-running personal agent. Use the available tools \
             when a request needs them; answer directly when it doesn't.",
        );

        if let Some(ref ws) = self.workspace {
            prompt.push_str("\n\n## Workspace\n");
            prompt.push_str(ws);
        }
        if !self.skills.is_empty() {
            prompt.push_str("\n\n## Skills\n");
            for skill in &self.skills {
                prompt.push_str("- ");
                prompt.push_str(skill);
                prompt.push('\n');
            }
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mode_includes_workspace_and_skills() {
        let builder = PromptBuilder {
            mode: PromptMode::Full,
            workspace: Some("Notes about the project".into()),
            skills: vec!["search".into(), "summarize".into()],
        };
        let prompt = builder.render();
        assert!(prompt.contains("## Workspace"));
        assert!(prompt.contains("Notes about the project"));
        assert!(prompt.contains("- summarize"));
    }

    #[test]
    fn minimal_mode_is_terse() {
        let builder = PromptBuilder {
            mode: PromptMode::Minimal,
            workspace: Some("ignored".into()),
            skills: vec!["ignored".into()],
        };
        let prompt = builder.render();
        assert!(prompt.contains("sub-agent"));
        assert!(!prompt.contains("ignored"));
    }
}
