use poolgate_store::Role;

/// Cheap token-length heuristic over the serialized transcript. The exact
/// tokenizer lives upstream; one token per four characters is close enough
/// for a trim threshold.
pub fn token_length(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Serializes role/content pairs into the flat transcript the upstream
/// expects.
pub fn render_transcript(turns: &[(Role, String)]) -> String {
    turns
        .iter()
        .map(|(role, content)| format!("{}: {}", role.as_str(), content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Trims an over-budget turn list by removing the first two non-system
/// turns, scanning from the front. Deliberately blunt: a single pass, no
/// re-check, and no regard for user/assistant pairing.
pub fn trim_to_token_budget(turns: Vec<(Role, String)>, token_limit: usize) -> Vec<(Role, String)> {
    if token_length(&render_transcript(&turns)) <= token_limit {
        return turns;
    }

    let mut trimmed = turns;
    let mut removed = 0;
    let mut i = 0;
    while i < trimmed.len() && removed < 2 {
        if trimmed[i].0 != Role::System {
            trimmed.remove(i);
            removed += 1;
        } else {
            i += 1;
        }
    }
    trimmed
}

/// Keeps the `max` most recent attachment paths.
pub fn cap_attachments(mut paths: Vec<String>, max: usize) -> Vec<String> {
    if paths.len() > max {
        paths.drain(..paths.len() - max);
    }
    paths
}
