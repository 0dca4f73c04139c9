use crate::agents::{ArtifactId, ChatMessage};
use crate::injection::splice::{InjectionArtifact, Placement, PromptBuild};

/// Removes tagged injection entries with the given ids. Untagged messages are
/// never touched and unknown ids are ignored. Returns how many were removed.
pub fn remove_artifacts(messages: &mut Vec<ChatMessage>, ids: &[ArtifactId]) -> usize {
    let before = messages.len();
    messages.retain(|message| {
        !message
            .injection
            .is_some_and(|marker| ids.contains(&marker.id))
    });
    before - messages.len()
}

/// Undoes each artifact on whichever prompt surface it was placed.
pub fn remove_from_prompt(prompt: &mut PromptBuild, artifacts: &[InjectionArtifact]) -> usize {
    let mut removed = 0;

    let message_ids: Vec<ArtifactId> = artifacts
        .iter()
        .filter(|artifact| artifact.placement == Placement::Message)
        .map(InjectionArtifact::id)
        .collect();
    if !message_ids.is_empty()
        && let Some(messages) = prompt.messages.as_mut()
    {
        removed += remove_artifacts(messages, &message_ids);
    }

    for artifact in artifacts {
        match &artifact.placement {
            Placement::Message => {}
            Placement::SystemPrompt { offset } => {
                let end = offset.saturating_add(artifact.text.len());
                if let Some(system_prompt) = prompt.system_prompt.as_mut()
                    && system_prompt.get(*offset..end) == Some(artifact.text.as_str())
                {
                    system_prompt.replace_range(*offset..end, "");
                    removed += 1;
                }
            }
            Placement::ExtensionSlot { key } => {
                if let Some(slots) = prompt.extension_prompts.as_mut()
                    && slots
                        .get(key)
                        .is_some_and(|slot| slot.marker.map(|marker| marker.id) == Some(artifact.id()))
                {
                    slots.remove(key);
                    removed += 1;
                }
            }
        }
    }

    if removed > 0 {
        tracing::debug!(removed, "injection artifacts removed");
    }
    removed
}
