//! NATS subject matching.

/// Whether `subject` matches `pattern`, where `*` matches one token and a
/// trailing `>` matches one or more tokens.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pat = pattern.split('.');
    let mut sub = subject.split('.');
    loop {
        match (pat.next(), sub.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// The agent ID carried in the last token of an agent subject.
pub fn agent_id(subject: &str) -> Option<&str> {
    subject.rsplit('.').next().filter(|id| !id.is_empty())
}
