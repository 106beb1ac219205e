/// Total tokens one Groq request may carry when no budget is configured.
pub const DEFAULT_TOKEN_BUDGET: usize = 1500;

const CHARS_PER_TOKEN: f64 = 3.5;

/// Rough token count: characters divided by 3.5, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    (text.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as usize
}

/// Picks the newest messages that fit `budget` once `system` is counted.
///
/// Walks from the newest message backwards and stops at the first one that
/// would overflow; empty messages cost nothing. The newest message is always
/// kept so the request never goes out without the user's turn.
pub fn trim_to_budget<'a, T>(
    system: &str,
    messages: &'a [T],
    text_of: impl Fn(&T) -> &str,
    budget: usize,
) -> &'a [T] {
    let available = budget.saturating_sub(estimate_tokens(system));
    let mut running = 0;
    let mut start = messages.len();

    for (index, message) in messages.iter().enumerate().rev() {
        let tokens = estimate_tokens(text_of(message));
        let newest = index + 1 == messages.len();
        if !newest && running + tokens > available {
            break;
        }
        running += tokens;
        start = index;
    }

    &messages[start..]
}
